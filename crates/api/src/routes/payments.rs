//! Payment routes: provider confirmations and payment initiation

use axum::extract::State;
use axum::Json;
use coursefunnel_billing::{ConfirmationOutcome, RawNotification};
use serde::{Deserialize, Serialize};

use super::{MessageResponse, Payload};
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Provider payment notification (form-encoded in production)
pub async fn validate_payment(
    State(state): State<AppState>,
    Payload(notification): Payload<RawNotification>,
) -> ApiResult<Json<MessageResponse>> {
    let outcome = state
        .billing
        .fulfillment
        .confirm_payment(&notification)
        .await?;

    let message = match outcome {
        ConfirmationOutcome::AlreadyProcessed => "Payment already processed",
        ConfirmationOutcome::Frozen { .. } => "Payment frozen message sent",
        ConfirmationOutcome::Fulfilled { .. } => "Payment processed successfully",
    };
    Ok(MessageResponse::new(message))
}

#[derive(Debug, Deserialize)]
pub struct GeneratePaymentRequest {
    /// Internal user id
    pub id: Option<i64>,
    pub amount: Option<i64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratePaymentResponse {
    pub message: &'static str,
    pub payment_link: String,
}

pub async fn generate_payment_process(
    State(state): State<AppState>,
    Payload(request): Payload<GeneratePaymentRequest>,
) -> ApiResult<Json<GeneratePaymentResponse>> {
    let (Some(user_id), Some(amount)) = (request.id, request.amount) else {
        tracing::warn!("Missing required parameters: id or amount");
        return Err(ApiError::BadRequest("Missing required parameters".into()));
    };

    let created = state.billing.orders.create_payment(user_id, amount).await?;

    Ok(Json(GeneratePaymentResponse {
        message: "Payment created successfully",
        payment_link: created.payment_link,
    }))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use crate::routes::test_support::{signed_notification, TestApp, INVITE_LINK};
    use async_trait::async_trait;
    use axum::http::StatusCode;
    use coursefunnel_billing::{
        AccessGrant, AccessGrantProvider, ChannelError, PaymentLedger, PaymentStatus,
        QuickpayConfig, RawNotification,
    };
    use serde_json::json;

    const VALIDATE: &str = "/api/endpoint-for-validate-payment";

    fn form_body(raw: &RawNotification) -> String {
        let fields = [
            ("notification_type", &raw.notification_type),
            ("operation_id", &raw.operation_id),
            ("amount", &raw.amount),
            ("currency", &raw.currency),
            ("datetime", &raw.datetime),
            ("sender", &raw.sender),
            ("codepro", &raw.codepro),
            ("label", &raw.label),
            ("sha1_hash", &raw.sha1_hash),
            ("unaccepted", &raw.unaccepted),
        ];
        fields
            .iter()
            .filter_map(|(name, value)| value.as_ref().map(|v| format!("{}={}", name, v)))
            .collect::<Vec<_>>()
            .join("&")
    }

    /// Grant provider that answers after a delay
    struct SlowGrant(Duration);

    #[async_trait]
    impl AccessGrantProvider for SlowGrant {
        async fn provision_grant(&self) -> Result<AccessGrant, ChannelError> {
            tokio::time::sleep(self.0).await;
            Ok(AccessGrant {
                invite_link: INVITE_LINK.to_string(),
            })
        }
    }

    async fn app_with_pending_order(order_id: &str) -> (TestApp, i64) {
        let app = TestApp::new();
        let user = app.register(5005).await;
        app.ledger.create_pending(user.id, order_id, 500).await.unwrap();
        (app, user.id)
    }

    #[tokio::test]
    async fn test_happy_path_form_notification() {
        let (app, user_id) = app_with_pending_order("order-1").await;

        let (status, body) = app
            .post_form(VALIDATE, form_body(&signed_notification("order-1", false)))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Payment processed successfully");

        let payment = app.ledger.lookup("order-1").await.unwrap().unwrap();
        assert_eq!(payment.status, PaymentStatus::Success);
        assert!(payment.processed_at.is_some());
        assert!(app.ledger.statistics(user_id).await.unwrap().unwrap().course_paid);

        let sent = app.channel.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, 5005);
        assert!(sent[0].1.contains(INVITE_LINK));
    }

    #[tokio::test]
    async fn test_request_timeout_after_commit_still_delivers_access() {
        let app = TestApp::with_grants(
            Arc::new(SlowGrant(Duration::from_millis(500))),
            Duration::from_millis(200),
        );
        let user = app.register(5005).await;
        app.ledger.create_pending(user.id, "order-1", 500).await.unwrap();
        let notification = form_body(&signed_notification("order-1", false));

        let (status, body) = app.post_form(VALIDATE, notification.clone()).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["message"], "Internal server error");
        assert!(app.ledger.lookup("order-1").await.unwrap().unwrap().is_processed());

        // Delivery finishes after the request gave up
        tokio::time::sleep(Duration::from_millis(600)).await;
        {
            let sent = app.channel.sent.lock().unwrap();
            assert_eq!(sent.len(), 1);
            assert!(sent[0].1.contains(INVITE_LINK));
        }

        // Provider redelivery is acknowledged without a second message
        let (status, body) = app.post_form(VALIDATE, notification).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Payment already processed");
        assert_eq!(app.channel.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_json_notification_with_scalar_fields() {
        let (app, _) = app_with_pending_order("order-1").await;
        let raw = signed_notification("order-1", false);

        // JSON senders may post booleans and numbers unquoted
        let body = json!({
            "notification_type": raw.notification_type,
            "operation_id": raw.operation_id,
            "amount": raw.amount,
            "currency": 643,
            "datetime": raw.datetime,
            "sender": raw.sender,
            "codepro": false,
            "label": raw.label,
            "sha1_hash": raw.sha1_hash,
            "unaccepted": false,
        });
        let (status, body) = app.post_json(VALIDATE, body).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Payment processed successfully");
    }

    #[tokio::test]
    async fn test_replay_already_processed() {
        let (app, _) = app_with_pending_order("order-1").await;
        let body = form_body(&signed_notification("order-1", false));

        app.post_form(VALIDATE, body.clone()).await;
        let (status, response) = app.post_form(VALIDATE, body).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(response["message"], "Payment already processed");
        assert_eq!(app.ledger.fulfillment_count().await, 1);
    }

    #[tokio::test]
    async fn test_frozen_notification() {
        let (app, _) = app_with_pending_order("order-1").await;

        let (status, body) = app
            .post_form(VALIDATE, form_body(&signed_notification("order-1", true)))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Payment frozen message sent");

        let payment = app.ledger.lookup("order-1").await.unwrap().unwrap();
        assert_eq!(payment.status, PaymentStatus::Pending);
    }

    #[tokio::test]
    async fn test_unknown_order_is_404() {
        let (app, _) = app_with_pending_order("order-1").await;

        let (status, body) = app
            .post_form(
                VALIDATE,
                form_body(&signed_notification("does-not-exist", false)),
            )
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["message"], "Payment not found");
        assert!(app.channel.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_tampered_amount_is_400() {
        let (app, _) = app_with_pending_order("order-1").await;
        let mut raw = signed_notification("order-1", false);
        raw.amount = Some("1.00".to_string());

        let (status, body) = app.post_form(VALIDATE, form_body(&raw)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "Hash validation failed");

        let payment = app.ledger.lookup("order-1").await.unwrap().unwrap();
        assert_eq!(payment.status, PaymentStatus::Pending);
    }

    #[tokio::test]
    async fn test_missing_fields_fail_hash_validation() {
        let (app, _) = app_with_pending_order("order-1").await;

        let (status, body) = app.post_form(VALIDATE, "label=order-1".to_string()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "Hash validation failed");
    }

    #[tokio::test]
    async fn test_generate_payment_process() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/quickpay/confirm")
            .with_status(200)
            .create_async()
            .await;
        let app = TestApp::with_quickpay(QuickpayConfig {
            form_url: Some(format!("{}/quickpay/confirm", server.url())),
            receiver: Some("4100100000000".to_string()),
            payment_type: Some("AC".to_string()),
            success_url: Some("https://example.com/thanks".to_string()),
        });
        let user = app.register(5005).await;

        let (status, body) = app
            .post_json(
                "/api/generate-payment-process",
                json!({ "id": user.id, "amount": 500 }),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Payment created successfully");
        assert_eq!(
            body["paymentLink"],
            format!("{}/quickpay/confirm", server.url())
        );
    }

    #[tokio::test]
    async fn test_generate_payment_process_validation() {
        let app = TestApp::new();
        let user = app.register(5005).await;

        let (status, body) = app
            .post_json("/api/generate-payment-process", json!({ "id": user.id }))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "Missing required parameters");

        let (status, _) = app
            .post_json(
                "/api/generate-payment-process",
                json!({ "id": user.id, "amount": 12.5 }),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = app
            .post_json(
                "/api/generate-payment-process",
                json!({ "id": user.id + 1, "amount": 500 }),
            )
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["message"], "User not found");
    }
}
