//! Payment notification signature verification
//!
//! The payment provider signs each notification by joining a fixed, ordered
//! list of fields with `&`, the notification secret shared with this service
//! sitting between `codepro` and `label`:
//!
//! ```text
//! notification_type&operation_id&amount&currency&datetime&sender&codepro&secret&label
//! ```
//!
//! and sending the hex-encoded SHA-1 of that string as `sha1_hash`. Any
//! missing field fails verification; it is never treated as an empty string.

use std::fmt;

use serde::{Deserialize, Deserializer};
use sha1::{Digest, Sha1};
use subtle::ConstantTimeEq;

use crate::error::{BillingError, BillingResult};

const FIELD_DELIMITER: &str = "&";

/// Notification as received, before verification.
///
/// Every field is optional here so that absence can be reported as a
/// verification failure instead of a deserialization error.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawNotification {
    #[serde(default, deserialize_with = "lenient_string")]
    pub notification_type: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub operation_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub amount: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub currency: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub datetime: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub sender: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub codepro: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub label: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub sha1_hash: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub unaccepted: Option<String>,
}

impl RawNotification {
    /// Signed fields in provider order, excluding the secret and `label`
    fn prefix_fields(&self) -> Result<[&str; 7], &'static str> {
        Ok([
            required(&self.notification_type, "notification_type")?,
            required(&self.operation_id, "operation_id")?,
            required(&self.amount, "amount")?,
            required(&self.currency, "currency")?,
            required(&self.datetime, "datetime")?,
            required(&self.sender, "sender")?,
            required(&self.codepro, "codepro")?,
        ])
    }
}

fn required<'a>(field: &'a Option<String>, name: &'static str) -> Result<&'a str, &'static str> {
    field.as_deref().ok_or(name)
}

/// Accepts JSON strings, booleans and numbers; form bodies are always strings
fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Scalar {
        Str(String),
        Bool(bool),
        Int(i64),
        Float(f64),
    }

    Ok(Option::<Scalar>::deserialize(deserializer)?.map(|scalar| match scalar {
        Scalar::Str(s) => s,
        Scalar::Bool(b) => b.to_string(),
        Scalar::Int(n) => n.to_string(),
        Scalar::Float(n) => n.to_string(),
    }))
}

/// A notification whose signature has been checked.
///
/// Only [`NotificationVerifier::verify`] constructs this type, so anything
/// holding one has passed verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedNotification {
    order_id: String,
    operation_id: String,
    amount: String,
    currency: String,
    unaccepted: bool,
}

impl VerifiedNotification {
    /// The provider's `label`
    pub fn order_id(&self) -> &str {
        &self.order_id
    }

    pub fn operation_id(&self) -> &str {
        &self.operation_id
    }

    pub fn amount(&self) -> &str {
        &self.amount
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }

    /// Funds are held by the provider and not yet credited
    pub fn unaccepted(&self) -> bool {
        self.unaccepted
    }
}

/// Recomputes and checks notification digests against the shared secret
#[derive(Clone)]
pub struct NotificationVerifier {
    secret: String,
}

impl fmt::Debug for NotificationVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotificationVerifier")
            .field("secret", &"[redacted]")
            .finish()
    }
}

impl NotificationVerifier {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// Hex-encoded SHA-1 over the canonical field order
    fn digest(&self, prefix: &[&str; 7], label: &str) -> String {
        let mut hasher = Sha1::new();
        for field in prefix {
            hasher.update(field.as_bytes());
            hasher.update(FIELD_DELIMITER.as_bytes());
        }
        hasher.update(self.secret.as_bytes());
        hasher.update(FIELD_DELIMITER.as_bytes());
        hasher.update(label.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Compute the digest the provider would send for `notification`
    pub fn expected_hash(&self, notification: &RawNotification) -> BillingResult<String> {
        let prefix = notification.prefix_fields().map_err(|field| {
            BillingError::InvalidNotification(format!("missing field {}", field))
        })?;
        let label = required(&notification.label, "label").map_err(|field| {
            BillingError::InvalidNotification(format!("missing field {}", field))
        })?;
        Ok(self.digest(&prefix, label))
    }

    /// Fill in `sha1_hash` the way the provider does
    pub fn sign(&self, notification: &mut RawNotification) -> BillingResult<()> {
        notification.sha1_hash = Some(self.expected_hash(notification)?);
        Ok(())
    }

    /// Check the signature and extract the fields the orchestrator needs.
    ///
    /// Missing signed fields or a missing/mismatched `sha1_hash` yield
    /// [`BillingError::SignatureInvalid`]. A malformed `unaccepted` flag on an
    /// otherwise valid notification yields [`BillingError::InvalidNotification`].
    pub fn verify(&self, notification: &RawNotification) -> BillingResult<VerifiedNotification> {
        let label = notification.label.as_deref().unwrap_or_default();

        let prefix = match notification.prefix_fields() {
            Ok(prefix) => prefix,
            Err(field) => {
                tracing::warn!(order_id = %label, field, "Notification missing signed field");
                return Err(BillingError::SignatureInvalid);
            }
        };
        let Some(order_id) = notification.label.as_deref() else {
            tracing::warn!("Notification missing signed field label");
            return Err(BillingError::SignatureInvalid);
        };
        let Some(claimed) = notification.sha1_hash.as_deref() else {
            tracing::warn!(order_id = %order_id, "Notification missing sha1_hash");
            return Err(BillingError::SignatureInvalid);
        };

        let computed = self.digest(&prefix, order_id);
        // Hex case and surrounding whitespace carry no signature bits
        let claimed = claimed.trim().to_ascii_lowercase();
        if !bool::from(computed.as_bytes().ct_eq(claimed.as_bytes())) {
            tracing::warn!(order_id = %order_id, "Notification hash validation failed");
            return Err(BillingError::SignatureInvalid);
        }

        let unaccepted = match notification.unaccepted.as_deref() {
            Some("true") => true,
            Some("false") => false,
            Some(other) => {
                tracing::warn!(order_id = %order_id, unaccepted = %other, "Malformed unaccepted flag");
                return Err(BillingError::InvalidNotification(format!(
                    "unaccepted must be \"true\" or \"false\", got \"{}\"",
                    other
                )));
            }
            None => {
                tracing::warn!(order_id = %order_id, "Notification missing unaccepted flag");
                return Err(BillingError::InvalidNotification(
                    "missing field unaccepted".to_string(),
                ));
            }
        };

        Ok(VerifiedNotification {
            order_id: order_id.to_string(),
            operation_id: prefix[1].to_string(),
            amount: prefix[2].to_string(),
            currency: prefix[3].to_string(),
            unaccepted,
        })
    }
}
