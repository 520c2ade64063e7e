//! Fulfillment orchestrator
//!
//! Drives a payment from `PENDING` to `SUCCESS` in response to a verified
//! provider notification:
//!
//! 1. Unknown order: not found, no mutation, nobody to notify
//! 2. Already processed: acknowledged, no mutation. Checked before `unaccepted`
//!    so a stale freeze redelivered after success stays a no-op
//! 3. `unaccepted = true`: tell the user the funds are frozen, no mutation
//! 4. Otherwise run the ledger transaction; the ledger re-checks
//!    `processed_at` at write time so concurrent confirmations commit once
//! 5. After commit: provision an access grant (placeholder on failure) and
//!    send the success message on a separate task. Nothing after the commit
//!    can fail or cancel it.

use std::sync::Arc;

use crate::channel::{AccessGrant, AccessGrantProvider, MessageOptions};
use crate::directory::UserDirectory;
use crate::error::{BillingError, BillingResult};
use crate::ledger::{PaymentLedger, Transition};
use crate::models::{Payment, User};
use crate::relay::NotificationRelay;
use crate::signature::{NotificationVerifier, RawNotification, VerifiedNotification};

/// Result of handling one notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmationOutcome {
    /// The payment was already `SUCCESS`; nothing written, nobody contacted
    AlreadyProcessed,
    /// Funds held by the provider; ledger untouched
    Frozen { notified: bool },
    /// This notification performed the transition
    Fulfilled { payment: Payment, notified: bool },
}

/// User-facing message templates
#[derive(Debug, Clone)]
pub struct Messages {
    support_contact: String,
}

impl Messages {
    pub fn new(support_contact: impl Into<String>) -> Self {
        Self {
            support_contact: support_contact.into(),
        }
    }

    pub fn frozen(&self, operation_id: &str) -> String {
        format!(
            "❄️ Your payment is frozen. The funds have not been credited yet.\n\
             Operation number: {}\n\
             If this is not resolved soon, contact support: {}",
            operation_id, self.support_contact
        )
    }

    pub fn fulfilled(&self, grant: &AccessGrant) -> (String, MessageOptions) {
        if grant.is_placeholder() {
            let text = format!(
                "🎉 Your payment has been processed! Course access granted.\n\n\
                 We could not create your channel invite automatically. \
                 Please contact support: {}",
                self.support_contact
            );
            return (text, MessageOptions::default());
        }

        let text = format!(
            "🎉 Your payment has been processed! Course access granted.\n\n\
             Join the channel: [Click here]({})",
            grant.invite_link
        );
        (text, MessageOptions::markdown())
    }

    pub fn technical_error(&self, operation_id: &str) -> String {
        format!(
            "⚠️ Your payment went through, but a technical error occurred.\n\
             Operation code: {}\n\
             Please contact support: {}",
            operation_id, self.support_contact
        )
    }
}

pub struct FulfillmentService {
    verifier: NotificationVerifier,
    ledger: Arc<dyn PaymentLedger>,
    notifier: Notifier,
}

impl FulfillmentService {
    pub fn new(
        verifier: NotificationVerifier,
        ledger: Arc<dyn PaymentLedger>,
        directory: Arc<dyn UserDirectory>,
        relay: NotificationRelay,
        grants: Arc<dyn AccessGrantProvider>,
        messages: Messages,
    ) -> Self {
        Self {
            verifier,
            ledger,
            notifier: Notifier {
                directory,
                relay,
                grants,
                messages,
            },
        }
    }

    /// Verify and process an inbound provider notification.
    ///
    /// Signature failures are rejected before the ledger is read.
    pub async fn confirm_payment(
        &self,
        notification: &RawNotification,
    ) -> BillingResult<ConfirmationOutcome> {
        let verified = self.verifier.verify(notification)?;
        self.process(&verified).await
    }

    pub async fn process(
        &self,
        notification: &VerifiedNotification,
    ) -> BillingResult<ConfirmationOutcome> {
        let order_id = notification.order_id();
        tracing::info!(
            order_id = %order_id,
            operation_id = %notification.operation_id(),
            amount = %notification.amount(),
            currency = %notification.currency(),
            unaccepted = notification.unaccepted(),
            "Processing payment notification"
        );

        let Some(payment) = self.ledger.lookup(order_id).await? else {
            tracing::warn!(order_id = %order_id, "Payment not found");
            return Err(BillingError::PaymentNotFound(order_id.to_string()));
        };

        if payment.is_processed() {
            tracing::warn!(order_id = %order_id, "Payment already processed");
            return Ok(ConfirmationOutcome::AlreadyProcessed);
        }

        if notification.unaccepted() {
            let notified = self.notifier.notify_frozen(&payment, notification).await;
            return Ok(ConfirmationOutcome::Frozen { notified });
        }

        let payment = match self.ledger.fulfill(order_id).await {
            Ok(Transition::Fulfilled(payment)) => payment,
            Ok(Transition::AlreadyProcessed) => {
                tracing::warn!(
                    order_id = %order_id,
                    "Concurrent confirmation committed first"
                );
                return Ok(ConfirmationOutcome::AlreadyProcessed);
            }
            Err(e) => {
                tracing::error!(
                    order_id = %order_id,
                    error = %e,
                    "Fulfillment transaction failed, payment left pending"
                );
                self.notifier
                    .notify_technical_error(&payment, notification)
                    .await;
                return Err(e);
            }
        };

        let notified = self.spawn_delivery(payment.clone()).await;
        tracing::info!(order_id = %order_id, notified, "Payment processed successfully");

        Ok(ConfirmationOutcome::Fulfilled { payment, notified })
    }

    /// Grant provisioning and the success message run on their own task.
    /// The ledger has committed, so dropping the caller (request timeout,
    /// client disconnect) must not cancel them.
    async fn spawn_delivery(&self, payment: Payment) -> bool {
        let notifier = self.notifier.clone();
        let order_id = payment.order_id.clone();
        let delivery = tokio::spawn(async move { notifier.deliver_access(&payment).await });

        match delivery.await {
            Ok(notified) => notified,
            Err(e) => {
                tracing::error!(order_id = %order_id, error = %e, "Access delivery task failed");
                false
            }
        }
    }
}

/// User-facing side of fulfillment; failures are logged and never surface
#[derive(Clone)]
struct Notifier {
    directory: Arc<dyn UserDirectory>,
    relay: NotificationRelay,
    grants: Arc<dyn AccessGrantProvider>,
    messages: Messages,
}

impl Notifier {
    async fn deliver_access(&self, payment: &Payment) -> bool {
        let Some(owner) = self.find_owner(payment).await else {
            return false;
        };

        let grant = match self.grants.provision_grant().await {
            Ok(grant) => grant,
            Err(e) => {
                tracing::warn!(
                    order_id = %payment.order_id,
                    error = %e,
                    "Access grant provisioning failed, sending placeholder"
                );
                AccessGrant::placeholder()
            }
        };

        let (text, options) = self.messages.fulfilled(&grant);
        self.relay.send(owner.external_id, &text, &options).await
    }

    async fn notify_frozen(&self, payment: &Payment, notification: &VerifiedNotification) -> bool {
        tracing::info!(order_id = %payment.order_id, "Payment frozen, funds not yet credited");
        let Some(owner) = self.find_owner(payment).await else {
            return false;
        };

        let text = self.messages.frozen(notification.operation_id());
        self.relay
            .send(owner.external_id, &text, &MessageOptions::default())
            .await
    }

    async fn notify_technical_error(&self, payment: &Payment, notification: &VerifiedNotification) {
        let Some(owner) = self.find_owner(payment).await else {
            return;
        };

        let text = self.messages.technical_error(notification.operation_id());
        self.relay
            .send(owner.external_id, &text, &MessageOptions::default())
            .await;
    }

    async fn find_owner(&self, payment: &Payment) -> Option<User> {
        match self.directory.find_by_id(payment.user_id).await {
            Ok(Some(user)) => Some(user),
            Ok(None) => {
                tracing::warn!(
                    order_id = %payment.order_id,
                    user_id = payment.user_id,
                    "Payment owner not in directory, skipping notification"
                );
                None
            }
            Err(e) => {
                tracing::error!(
                    order_id = %payment.order_id,
                    user_id = payment.user_id,
                    error = %e,
                    "Payment owner lookup failed, skipping notification"
                );
                None
            }
        }
    }
}
