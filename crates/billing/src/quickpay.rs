//! Payment-form client
//!
//! Posts the order to the provider's quickpay form endpoint. The provider
//! answers with a redirect chain; the URL it finally lands on is the payment
//! page handed to the user.

use std::time::Duration;

use serde::Serialize;

use crate::error::{BillingError, BillingResult};

#[derive(Debug, Clone, Default)]
pub struct QuickpayConfig {
    /// Form endpoint
    pub form_url: Option<String>,
    /// Merchant wallet receiving the funds
    pub receiver: Option<String>,
    pub payment_type: Option<String>,
    /// Where the provider sends the user after paying
    pub success_url: Option<String>,
}

#[derive(Serialize)]
struct QuickpayForm<'a> {
    receiver: &'a str,
    #[serde(rename = "quickpay-form")]
    quickpay_form: &'a str,
    #[serde(rename = "paymentType")]
    payment_type: &'a str,
    sum: String,
    label: &'a str,
    #[serde(rename = "successURL")]
    success_url: &'a str,
}

#[derive(Clone)]
pub struct QuickpayClient {
    http: reqwest::Client,
    config: QuickpayConfig,
}

impl QuickpayClient {
    pub fn new(config: QuickpayConfig, timeout: Duration) -> BillingResult<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http, config })
    }

    /// Request a payment page for `order_id`
    pub async fn create_payment_link(&self, order_id: &str, amount: i64) -> BillingResult<String> {
        let (Some(form_url), Some(receiver), Some(payment_type), Some(success_url)) = (
            self.config.form_url.as_deref(),
            self.config.receiver.as_deref(),
            self.config.payment_type.as_deref(),
            self.config.success_url.as_deref(),
        ) else {
            return Err(BillingError::PaymentLink(
                "payment form is not configured".to_string(),
            ));
        };

        let form = QuickpayForm {
            receiver,
            quickpay_form: "button",
            payment_type,
            sum: amount.to_string(),
            label: order_id,
            success_url,
        };

        let response = self.http.post(form_url).form(&form).send().await?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            tracing::warn!(order_id = %order_id, status = %status, "Payment form rejected order");
            return Err(BillingError::PaymentLink(format!(
                "payment form returned {}",
                status
            )));
        }

        Ok(response.url().to_string())
    }
}
