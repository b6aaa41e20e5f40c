//! # Ledger
//!
//! Persistent payment records, fulfillment artifacts, and the storage traits
//! the workflow drives.
//!
//! Fulfillment and the completed-status write go through a
//! [`LedgerTransaction`]: nothing is visible until [`LedgerTransaction::commit`],
//! and dropping an uncommitted transaction rolls it back.

use crate::checkout::{PayableType, PendingCheckout};
use crate::error::{PaymentError, PaymentResult};
use crate::money::Money;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

/// Lifecycle of a payment record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    /// Order created, buyer not yet confirmed
    #[default]
    Pending,
    /// Captured and fulfilled
    Completed,
    /// Given up on (stale pending sweep)
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Completed => "completed",
            PaymentStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, PaymentStatus::Pending)
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = PaymentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PaymentStatus::Pending),
            "completed" => Ok(PaymentStatus::Completed),
            "failed" => Ok(PaymentStatus::Failed),
            other => Err(PaymentError::Serialization(format!(
                "Unknown payment status: {}",
                other
            ))),
        }
    }
}

/// One attempted payment, keyed by the gateway's order id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub amount: Decimal,
    pub currency: String,
    /// Payment method / provider name, e.g. `paypal`
    pub method: String,
    /// Gateway order id (unique)
    pub gateway_transaction_id: String,
    pub payable_type: PayableType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payable_id: Option<i64>,
    pub status: PaymentStatus,
    /// Set once the gateway has taken the money, even if fulfillment failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub captured_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PaymentRecord {
    /// Pending and never captured. Only these may be expired.
    pub fn is_uncaptured_pending(&self) -> bool {
        !self.status.is_terminal() && self.captured_at.is_none()
    }
}

/// Input for a new pending record
#[derive(Debug, Clone)]
pub struct NewPaymentRecord {
    pub user_id: Uuid,
    pub amount: Money,
    pub method: String,
    pub gateway_transaction_id: String,
    pub payable_type: PayableType,
    pub payable_id: Option<i64>,
}

impl NewPaymentRecord {
    pub fn from_checkout(
        user_id: Uuid,
        checkout: &PendingCheckout,
        amount: Money,
        method: impl Into<String>,
        gateway_transaction_id: impl Into<String>,
    ) -> Self {
        Self {
            user_id,
            amount,
            method: method.into(),
            gateway_transaction_id: gateway_transaction_id.into(),
            payable_type: checkout.payable_type(),
            payable_id: checkout.payable_id,
        }
    }

    /// Materialize the pending row (used by stores that don't generate ids themselves).
    pub fn into_record(self, now: DateTime<Utc>) -> PaymentRecord {
        PaymentRecord {
            id: Uuid::new_v4(),
            user_id: self.user_id,
            amount: self.amount.amount,
            currency: self.amount.currency.as_str().to_string(),
            method: self.method,
            gateway_transaction_id: self.gateway_transaction_id,
            payable_type: self.payable_type,
            payable_id: self.payable_id,
            status: PaymentStatus::Pending,
            captured_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Certificate issued for a completed challenge payment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Certificate {
    pub id: Uuid,
    pub user_id: Uuid,
    pub challenge_id: i64,
    pub issued_at: DateTime<Utc>,
}

/// Subscription started by a completed plan payment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: Uuid,
    pub user_id: Uuid,
    pub plan_name: String,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewCertificate {
    pub user_id: Uuid,
    pub challenge_id: i64,
    pub issued_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewSubscription {
    pub user_id: Uuid,
    pub plan_name: String,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
}

/// The fulfillment artifact a confirmation produced
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Artifact {
    Certificate(Certificate),
    Subscription(Subscription),
}

impl Artifact {
    pub fn id(&self) -> Uuid {
        match self {
            Artifact::Certificate(c) => c.id,
            Artifact::Subscription(s) => s.id,
        }
    }

    pub fn payable_type(&self) -> PayableType {
        match self {
            Artifact::Certificate(_) => PayableType::Certificate,
            Artifact::Subscription(_) => PayableType::Subscription,
        }
    }
}

/// A unit of work against the ledger.
#[async_trait]
pub trait LedgerTransaction: Send {
    /// Read a payment record, locking it until the transaction ends.
    async fn lock_payment(
        &mut self,
        gateway_transaction_id: &str,
    ) -> PaymentResult<Option<PaymentRecord>>;

    async fn challenge_exists(&mut self, challenge_id: i64) -> PaymentResult<bool>;

    async fn insert_certificate(&mut self, certificate: NewCertificate)
        -> PaymentResult<Certificate>;

    async fn insert_subscription(
        &mut self,
        subscription: NewSubscription,
    ) -> PaymentResult<Subscription>;

    /// Pending → completed. Fails if the record is not pending.
    async fn mark_completed(
        &mut self,
        payment_id: Uuid,
        at: DateTime<Utc>,
    ) -> PaymentResult<PaymentRecord>;

    async fn commit(self: Box<Self>) -> PaymentResult<()>;
}

/// Payment record storage
#[async_trait]
pub trait PaymentLedger: Send + Sync {
    /// Insert a `pending` record. Duplicate gateway ids are rejected.
    async fn create_pending(&self, record: NewPaymentRecord) -> PaymentResult<PaymentRecord>;

    async fn find_by_transaction_id(
        &self,
        gateway_transaction_id: &str,
    ) -> PaymentResult<Option<PaymentRecord>>;

    async fn challenge_exists(&self, challenge_id: i64) -> PaymentResult<bool>;

    /// Note that the gateway captured a pending payment. Keeps the first
    /// capture time; does nothing once the record has left `pending`.
    async fn mark_captured(&self, payment_id: Uuid, at: DateTime<Utc>) -> PaymentResult<()>;

    async fn begin(&self) -> PaymentResult<Box<dyn LedgerTransaction>>;

    /// Mark `pending` records created before `cutoff` as `failed`; returns them.
    /// Records the gateway already captured are left alone.
    async fn expire_pending_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> PaymentResult<Vec<PaymentRecord>>;
}

/// Server-side holder of checkout intent, keyed by gateway order id
#[async_trait]
pub trait CheckoutStore: Send + Sync {
    async fn put(&self, token: &str, checkout: &PendingCheckout) -> PaymentResult<()>;
    async fn get(&self, token: &str) -> PaymentResult<Option<PendingCheckout>>;
    async fn remove(&self, token: &str) -> PaymentResult<()>;
}

pub type SharedLedger = Arc<dyn PaymentLedger>;
pub type SharedCheckoutStore = Arc<dyn CheckoutStore>;
