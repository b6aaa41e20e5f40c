//! # Fulfillment Handlers
//!
//! One handler per [`PayableType`]. A handler runs inside the confirmation's
//! ledger transaction, creates exactly one artifact, and takes the checkout
//! fields it consumed.

use crate::checkout::{Payable, PayableType, PendingCheckout};
use crate::error::{PaymentError, PaymentResult};
use crate::ledger::{Artifact, LedgerTransaction, NewCertificate, NewSubscription};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tracing::debug;
use uuid::Uuid;

#[async_trait]
pub trait FulfillmentHandler: Send + Sync {
    fn payable_type(&self) -> PayableType;

    async fn fulfill(
        &self,
        tx: &mut dyn LedgerTransaction,
        user_id: Uuid,
        checkout: &mut PendingCheckout,
        now: DateTime<Utc>,
    ) -> PaymentResult<Artifact>;
}

/// Issues a certificate for a paid challenge.
pub struct CertificateFulfillment;

/// Starts a subscription for a paid plan.
pub struct SubscriptionFulfillment;

/// Select the handler for a stored payable type.
pub fn handler_for(payable_type: PayableType) -> &'static dyn FulfillmentHandler {
    match payable_type {
        PayableType::Certificate => &CertificateFulfillment,
        PayableType::Subscription => &SubscriptionFulfillment,
    }
}

fn mismatch(expected: PayableType, found: PayableType) -> PaymentError {
    PaymentError::Validation(format!(
        "Checkout is for a {} but the payment is for a {}",
        found, expected
    ))
}

#[async_trait]
impl FulfillmentHandler for CertificateFulfillment {
    fn payable_type(&self) -> PayableType {
        PayableType::Certificate
    }

    async fn fulfill(
        &self,
        tx: &mut dyn LedgerTransaction,
        user_id: Uuid,
        checkout: &mut PendingCheckout,
        now: DateTime<Utc>,
    ) -> PaymentResult<Artifact> {
        let found = checkout.payable_type();
        let challenge_slot = match &mut checkout.payable {
            Payable::Certificate { challenge_id } => challenge_id,
            _ => return Err(mismatch(self.payable_type(), found)),
        };

        let challenge_id = (*challenge_slot).ok_or_else(|| {
            PaymentError::Validation("No challenge selected for this certificate".to_string())
        })?;

        if !tx.challenge_exists(challenge_id).await? {
            return Err(PaymentError::Validation(format!(
                "Challenge {} not found",
                challenge_id
            )));
        }

        let certificate = tx
            .insert_certificate(NewCertificate {
                user_id,
                challenge_id,
                issued_at: now,
            })
            .await?;

        challenge_slot.take();
        debug!(certificate_id = %certificate.id, challenge_id, "Certificate issued");

        Ok(Artifact::Certificate(certificate))
    }
}

#[async_trait]
impl FulfillmentHandler for SubscriptionFulfillment {
    fn payable_type(&self) -> PayableType {
        PayableType::Subscription
    }

    async fn fulfill(
        &self,
        tx: &mut dyn LedgerTransaction,
        user_id: Uuid,
        checkout: &mut PendingCheckout,
        now: DateTime<Utc>,
    ) -> PaymentResult<Artifact> {
        let found = checkout.payable_type();
        let (plan_slot, duration_slot) = match &mut checkout.payable {
            Payable::Subscription {
                plan_name,
                duration_days,
            } => (plan_name, duration_days),
            _ => return Err(mismatch(self.payable_type(), found)),
        };

        let plan_name = plan_slot
            .clone()
            .filter(|p| !p.trim().is_empty())
            .ok_or_else(|| PaymentError::Validation("No subscription plan selected".to_string()))?;

        let duration_days = (*duration_slot)
            .filter(|d| *d > 0)
            .ok_or_else(|| {
                PaymentError::Validation("Subscription duration must be positive".to_string())
            })?;

        let subscription = tx
            .insert_subscription(NewSubscription {
                user_id,
                plan_name,
                starts_at: now,
                ends_at: now + Duration::days(duration_days),
            })
            .await?;

        plan_slot.take();
        duration_slot.take();
        debug!(subscription_id = %subscription.id, duration_days, "Subscription started");

        Ok(Artifact::Subscription(subscription))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{NewPaymentRecord, PaymentLedger};
    use crate::memory::MemoryLedger;
    use crate::money::{Currency, Money};
    use rust_decimal::Decimal;

    #[tokio::test]
    async fn test_certificate_requires_existing_challenge() {
        let ledger = MemoryLedger::new().with_challenge(7, "Rust 101");
        let mut tx = ledger.begin().await.unwrap();
        let mut checkout = PendingCheckout::certificate(Decimal::new(5000, 2), 99);

        let err = CertificateFulfillment
            .fulfill(&mut *tx, Uuid::new_v4(), &mut checkout, Utc::now())
            .await
            .unwrap_err();

        assert!(matches!(err, PaymentError::Validation(_)));
        // Nothing consumed on failure
        assert!(!checkout.payable.is_consumed());
    }

    #[tokio::test]
    async fn test_certificate_issued_and_field_cleared() {
        let ledger = MemoryLedger::new().with_challenge(7, "Rust 101");
        let user_id = Uuid::new_v4();
        let now = Utc::now();
        let mut checkout = PendingCheckout::certificate(Decimal::new(5000, 2), 7);

        let mut tx = ledger.begin().await.unwrap();
        let artifact = CertificateFulfillment
            .fulfill(&mut *tx, user_id, &mut checkout, now)
            .await
            .unwrap();
        tx.commit().await.unwrap();

        match artifact {
            Artifact::Certificate(c) => {
                assert_eq!(c.challenge_id, 7);
                assert_eq!(c.user_id, user_id);
                assert_eq!(c.issued_at, now);
            }
            other => panic!("unexpected artifact {:?}", other),
        }
        assert!(checkout.payable.is_consumed());
        assert_eq!(ledger.certificates().await.len(), 1);
    }

    #[tokio::test]
    async fn test_subscription_end_date() {
        let ledger = MemoryLedger::new();
        let now = Utc::now();
        let mut checkout = PendingCheckout::subscription(Decimal::new(1999, 2), "pro", 30);

        let mut tx = ledger.begin().await.unwrap();
        let artifact = SubscriptionFulfillment
            .fulfill(&mut *tx, Uuid::new_v4(), &mut checkout, now)
            .await
            .unwrap();

        match artifact {
            Artifact::Subscription(s) => {
                assert_eq!(s.plan_name, "pro");
                assert_eq!(s.ends_at - s.starts_at, Duration::days(30));
            }
            other => panic!("unexpected artifact {:?}", other),
        }
        assert!(checkout.payable.is_consumed());
    }

    #[tokio::test]
    async fn test_subscription_rejects_missing_plan() {
        let ledger = MemoryLedger::new();
        let mut checkout = PendingCheckout::new(
            Decimal::new(1999, 2),
            Payable::Subscription {
                plan_name: None,
                duration_days: Some(30),
            },
        );

        let mut tx = ledger.begin().await.unwrap();
        let err = SubscriptionFulfillment
            .fulfill(&mut *tx, Uuid::new_v4(), &mut checkout, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::Validation(_)));
    }

    #[tokio::test]
    async fn test_handler_rejects_other_payable() {
        let ledger = MemoryLedger::new();
        let mut checkout = PendingCheckout::subscription(Decimal::new(1999, 2), "pro", 30);

        let mut tx = ledger.begin().await.unwrap();
        let err = handler_for(PayableType::Certificate)
            .fulfill(&mut *tx, Uuid::new_v4(), &mut checkout, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::Validation(_)));
    }

    #[tokio::test]
    async fn test_uncommitted_artifact_is_discarded() {
        let ledger = MemoryLedger::new().with_challenge(7, "Rust 101");
        let record = ledger
            .create_pending(NewPaymentRecord::from_checkout(
                Uuid::new_v4(),
                &PendingCheckout::certificate(Decimal::new(5000, 2), 7),
                Money::new(Decimal::new(5000, 2), Currency::USD).unwrap(),
                "paypal",
                "PAY123",
            ))
            .await
            .unwrap();
        assert_eq!(record.gateway_transaction_id, "PAY123");

        {
            let mut tx = ledger.begin().await.unwrap();
            let mut checkout = PendingCheckout::certificate(Decimal::new(5000, 2), 7);
            CertificateFulfillment
                .fulfill(&mut *tx, record.user_id, &mut checkout, Utc::now())
                .await
                .unwrap();
            // dropped without commit
        }

        assert!(ledger.certificates().await.is_empty());
    }
}
