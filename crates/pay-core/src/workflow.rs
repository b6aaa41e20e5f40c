//! # Checkout Workflow
//!
//! Initiation and confirmation of a gateway payment.
//!
//! ```text
//!  initiate ──► AUTHORIZED (pending record) ──confirm──► FULFILLED
//!                          │                     └─────► ABORTED
//!                          └──cancel (no change)
//! ```
//!
//! Confirmation writes the fulfillment artifact and the `completed` status in
//! one ledger transaction. A record that is already `completed` short-circuits
//! before the gateway is called again.
//!
//! A successful capture is noted on the record before fulfillment starts. If
//! fulfillment then fails, the record stays `pending` with the checkout kept,
//! and a retried callback goes straight to fulfillment without a second
//! capture.

use crate::checkout::PendingCheckout;
use crate::error::{PaymentError, PaymentResult, GENERIC_ERROR_MESSAGE};
use crate::fulfillment::handler_for;
use crate::gateway::{BoxedPaymentGateway, CheckoutUrls};
use crate::ledger::{
    Artifact, NewPaymentRecord, PaymentRecord, PaymentStatus, SharedCheckoutStore, SharedLedger,
};
use chrono::{Duration, Utc};
use serde::Serialize;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

pub const SUCCESS_MESSAGE: &str = "Transaction Successfully Completed.";
pub const CANCELLED_MESSAGE: &str = "Payment cancelled.";

/// Result of a successful `initiate`
#[derive(Debug, Clone, Serialize)]
pub struct InitiatedCheckout {
    pub record: PaymentRecord,
    /// Where the buyer approves the payment
    pub approval_url: String,
}

/// Result of a successful `confirm`
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ConfirmOutcome {
    /// This call captured and fulfilled the payment
    Fulfilled {
        record: PaymentRecord,
        artifact: Artifact,
    },
    /// An earlier call already did; nothing was written
    AlreadyCompleted { record: PaymentRecord },
}

impl ConfirmOutcome {
    pub fn record(&self) -> &PaymentRecord {
        match self {
            ConfirmOutcome::Fulfilled { record, .. } => record,
            ConfirmOutcome::AlreadyCompleted { record } => record,
        }
    }
}

#[derive(Clone)]
pub struct CheckoutWorkflow {
    gateway: BoxedPaymentGateway,
    ledger: SharedLedger,
    checkouts: SharedCheckoutStore,
    urls: CheckoutUrls,
}

impl CheckoutWorkflow {
    pub fn new(
        gateway: BoxedPaymentGateway,
        ledger: SharedLedger,
        checkouts: SharedCheckoutStore,
        urls: CheckoutUrls,
    ) -> Self {
        Self {
            gateway,
            ledger,
            checkouts,
            urls,
        }
    }

    pub fn urls(&self) -> &CheckoutUrls {
        &self.urls
    }

    pub fn provider_name(&self) -> &'static str {
        self.gateway.provider_name()
    }

    /// Create the gateway order, record it as pending, and return the
    /// approval URL.
    ///
    /// The checkout must carry everything fulfillment needs; nothing is sent
    /// to the gateway otherwise.
    ///
    /// A missing approval link is reported as a gateway error; the pending
    /// record is kept and left for the stale sweep.
    #[instrument(skip(self, checkout), fields(payable = %checkout.payable_type(), amount = %checkout.amount))]
    pub async fn initiate(
        &self,
        user_id: Uuid,
        checkout: PendingCheckout,
    ) -> PaymentResult<InitiatedCheckout> {
        let money = checkout.money()?;
        checkout.payable.validate()?;

        if let Some(challenge_id) = checkout.payable.challenge_id() {
            if !self.ledger.challenge_exists(challenge_id).await? {
                return Err(PaymentError::Validation(format!(
                    "Challenge {} not found",
                    challenge_id
                )));
            }
        }

        let order = self
            .gateway
            .create_order(&money, &self.urls.success_url(), &self.urls.cancel_url())
            .await?;

        if order.id.trim().is_empty() {
            return Err(PaymentError::gateway(GENERIC_ERROR_MESSAGE));
        }

        let record = self
            .ledger
            .create_pending(NewPaymentRecord::from_checkout(
                user_id,
                &checkout,
                money,
                self.gateway.provider_name(),
                order.id.clone(),
            ))
            .await?;

        let approval_url = match order.approval_url() {
            Some(url) => url.to_string(),
            None => {
                warn!(order_id = %order.id, "Gateway order has no approval link");
                return Err(PaymentError::gateway(GENERIC_ERROR_MESSAGE));
            }
        };

        self.checkouts.put(&order.id, &checkout).await?;

        info!(
            order_id = %order.id,
            payment_id = %record.id,
            "Checkout initiated for {}",
            money.display()
        );

        Ok(InitiatedCheckout {
            record,
            approval_url,
        })
    }

    /// Capture the order behind `token` and fulfill it.
    #[instrument(skip(self))]
    pub async fn confirm(&self, token: &str) -> PaymentResult<ConfirmOutcome> {
        let token = token.trim();
        if token.is_empty() {
            return Err(PaymentError::InvalidRequest(
                "Missing payment token".to_string(),
            ));
        }

        let existing = self
            .ledger
            .find_by_transaction_id(token)
            .await?
            .ok_or_else(|| record_not_found(token))?;

        match existing.status {
            PaymentStatus::Completed => {
                info!(payment_id = %existing.id, "Payment already completed");
                return Ok(ConfirmOutcome::AlreadyCompleted { record: existing });
            }
            PaymentStatus::Failed => return Err(expired(token)),
            PaymentStatus::Pending => {}
        }

        let checkout = match self.checkouts.get(token).await? {
            Some(checkout) => checkout,
            None => return self.confirm_without_checkout(token).await,
        };

        match existing.captured_at {
            Some(captured_at) => {
                info!(
                    payment_id = %existing.id,
                    %captured_at,
                    "Order already captured, retrying fulfillment"
                );
            }
            None => {
                let capture = self.gateway.capture_order(token).await?;
                if !capture.is_completed() {
                    warn!(status = %capture.status, "Capture not completed");
                    self.discard_checkout(token).await;
                    return Err(PaymentError::PaymentNotCompleted {
                        status: capture.status,
                        message: capture.message,
                    });
                }
                if capture.already_captured {
                    info!(payment_id = %existing.id, "Gateway reports order already captured");
                }
                self.ledger.mark_captured(existing.id, Utc::now()).await?;
            }
        }

        match self.fulfill(token, checkout).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                error!(
                    payment_id = %existing.id,
                    error = %e,
                    retryable = e.is_retryable(),
                    "Captured payment could not be fulfilled"
                );
                Err(e)
            }
        }
    }

    /// No checkout to fulfill from. A concurrent confirmation may have just
    /// completed the payment; anything else is never captured.
    async fn confirm_without_checkout(&self, token: &str) -> PaymentResult<ConfirmOutcome> {
        match self.ledger.find_by_transaction_id(token).await? {
            Some(record) if record.status == PaymentStatus::Completed => {
                Ok(ConfirmOutcome::AlreadyCompleted { record })
            }
            Some(_) => Err(PaymentError::Validation(
                "Checkout details for this payment are no longer available".to_string(),
            )),
            None => Err(record_not_found(token)),
        }
    }

    /// Steps after a successful capture, in one ledger transaction.
    async fn fulfill(
        &self,
        token: &str,
        mut checkout: PendingCheckout,
    ) -> PaymentResult<ConfirmOutcome> {
        let now = Utc::now();
        let mut tx = self.ledger.begin().await?;

        let record = tx
            .lock_payment(token)
            .await?
            .ok_or_else(|| record_not_found(token))?;

        match record.status {
            PaymentStatus::Completed => {
                // Lost the race to a concurrent confirmation
                return Ok(ConfirmOutcome::AlreadyCompleted { record });
            }
            PaymentStatus::Failed => return Err(expired(token)),
            PaymentStatus::Pending => {}
        }

        let artifact = handler_for(record.payable_type)
            .fulfill(&mut *tx, record.user_id, &mut checkout, now)
            .await?;
        let record = tx.mark_completed(record.id, now).await?;
        tx.commit().await?;

        self.discard_checkout(token).await;

        info!(
            payment_id = %record.id,
            artifact_id = %artifact.id(),
            "Payment completed and fulfilled"
        );

        Ok(ConfirmOutcome::Fulfilled { record, artifact })
    }

    /// The buyer abandoned the approval page. Nothing is written.
    pub fn cancel(&self, token: Option<&str>) -> &'static str {
        info!(token = token.unwrap_or("-"), "Checkout cancelled by buyer");
        CANCELLED_MESSAGE
    }

    /// Fail uncaptured pending records older than `max_age` and drop their
    /// checkouts.
    #[instrument(skip(self))]
    pub async fn expire_stale_pending(&self, max_age: Duration) -> PaymentResult<usize> {
        let cutoff = Utc::now() - max_age;
        let expired = self.ledger.expire_pending_before(cutoff).await?;
        for record in &expired {
            self.discard_checkout(&record.gateway_transaction_id).await;
        }
        if !expired.is_empty() {
            info!(count = expired.len(), "Expired stale pending payments");
        }
        Ok(expired.len())
    }

    async fn discard_checkout(&self, token: &str) {
        if let Err(e) = self.checkouts.remove(token).await {
            error!(error = %e, "Failed to discard checkout");
        }
    }
}

fn record_not_found(token: &str) -> PaymentError {
    PaymentError::RecordNotFound {
        transaction_id: token.to_string(),
    }
}

fn expired(token: &str) -> PaymentError {
    PaymentError::InvalidRequest(format!("Payment {} has expired", token))
}
