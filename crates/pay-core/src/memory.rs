//! # In-memory adapters
//!
//! Process-local implementations of the ledger, checkout store and gateway.
//! The API falls back to the ledger and checkout store when no database is
//! configured; the scripted gateway backs workflow and HTTP tests.

use crate::checkout::PendingCheckout;
use crate::error::{PaymentError, PaymentResult};
use crate::gateway::{CaptureResult, GatewayOrder, PaymentGateway};
use crate::ledger::{
    Certificate, CheckoutStore, LedgerTransaction, NewCertificate, NewPaymentRecord,
    NewSubscription, PaymentLedger, PaymentRecord, PaymentStatus, Subscription,
};
use crate::money::Money;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard, RwLock};
use uuid::Uuid;

#[derive(Debug, Clone, Default)]
struct LedgerState {
    /// Keyed by gateway transaction id
    payments: HashMap<String, PaymentRecord>,
    certificates: Vec<Certificate>,
    subscriptions: Vec<Subscription>,
    challenges: HashMap<i64, String>,
}

/// Ledger held in process memory.
///
/// Transactions take the whole ledger lock, so concurrent confirmations are
/// fully serialized. Writes land in a working copy that replaces the shared
/// state only on commit.
#[derive(Clone, Default)]
pub struct MemoryLedger {
    state: Arc<AsyncMutex<LedgerState>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a challenge certificates can refer to.
    ///
    /// Meant for setup before the ledger is shared.
    pub fn with_challenge(self, id: i64, title: impl Into<String>) -> Self {
        if let Ok(mut state) = self.state.try_lock() {
            state.challenges.insert(id, title.into());
        }
        self
    }

    /// Register a challenge on a ledger that may already be shared.
    pub async fn add_challenge(&self, id: i64, title: impl Into<String>) {
        self.state.lock().await.challenges.insert(id, title.into());
    }

    pub async fn payments(&self) -> Vec<PaymentRecord> {
        self.state.lock().await.payments.values().cloned().collect()
    }

    pub async fn certificates(&self) -> Vec<Certificate> {
        self.state.lock().await.certificates.clone()
    }

    pub async fn subscriptions(&self) -> Vec<Subscription> {
        self.state.lock().await.subscriptions.clone()
    }
}

#[async_trait]
impl PaymentLedger for MemoryLedger {
    async fn create_pending(&self, record: NewPaymentRecord) -> PaymentResult<PaymentRecord> {
        let mut state = self.state.lock().await;
        if state.payments.contains_key(&record.gateway_transaction_id) {
            return Err(PaymentError::Database(format!(
                "Payment for transaction {} already recorded",
                record.gateway_transaction_id
            )));
        }
        let record = record.into_record(Utc::now());
        state
            .payments
            .insert(record.gateway_transaction_id.clone(), record.clone());
        Ok(record)
    }

    async fn find_by_transaction_id(
        &self,
        gateway_transaction_id: &str,
    ) -> PaymentResult<Option<PaymentRecord>> {
        Ok(self
            .state
            .lock()
            .await
            .payments
            .get(gateway_transaction_id)
            .cloned())
    }

    async fn challenge_exists(&self, challenge_id: i64) -> PaymentResult<bool> {
        Ok(self.state.lock().await.challenges.contains_key(&challenge_id))
    }

    async fn mark_captured(&self, payment_id: Uuid, at: DateTime<Utc>) -> PaymentResult<()> {
        let mut state = self.state.lock().await;
        let record = state
            .payments
            .values_mut()
            .find(|r| r.id == payment_id)
            .ok_or_else(|| PaymentError::RecordNotFound {
                transaction_id: payment_id.to_string(),
            })?;

        if record.status == PaymentStatus::Pending && record.captured_at.is_none() {
            record.captured_at = Some(at);
            record.updated_at = at;
        }
        Ok(())
    }

    async fn begin(&self) -> PaymentResult<Box<dyn LedgerTransaction>> {
        let guard = self.state.clone().lock_owned().await;
        let working = (*guard).clone();
        Ok(Box::new(MemoryTransaction { guard, working }))
    }

    async fn expire_pending_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> PaymentResult<Vec<PaymentRecord>> {
        let mut state = self.state.lock().await;
        let now = Utc::now();
        let mut expired = Vec::new();
        for record in state.payments.values_mut() {
            if record.is_uncaptured_pending() && record.created_at < cutoff {
                record.status = PaymentStatus::Failed;
                record.updated_at = now;
                expired.push(record.clone());
            }
        }
        Ok(expired)
    }
}

struct MemoryTransaction {
    guard: OwnedMutexGuard<LedgerState>,
    working: LedgerState,
}

#[async_trait]
impl LedgerTransaction for MemoryTransaction {
    async fn lock_payment(
        &mut self,
        gateway_transaction_id: &str,
    ) -> PaymentResult<Option<PaymentRecord>> {
        Ok(self.working.payments.get(gateway_transaction_id).cloned())
    }

    async fn challenge_exists(&mut self, challenge_id: i64) -> PaymentResult<bool> {
        Ok(self.working.challenges.contains_key(&challenge_id))
    }

    async fn insert_certificate(
        &mut self,
        certificate: NewCertificate,
    ) -> PaymentResult<Certificate> {
        let certificate = Certificate {
            id: Uuid::new_v4(),
            user_id: certificate.user_id,
            challenge_id: certificate.challenge_id,
            issued_at: certificate.issued_at,
        };
        self.working.certificates.push(certificate.clone());
        Ok(certificate)
    }

    async fn insert_subscription(
        &mut self,
        subscription: NewSubscription,
    ) -> PaymentResult<Subscription> {
        let subscription = Subscription {
            id: Uuid::new_v4(),
            user_id: subscription.user_id,
            plan_name: subscription.plan_name,
            starts_at: subscription.starts_at,
            ends_at: subscription.ends_at,
        };
        self.working.subscriptions.push(subscription.clone());
        Ok(subscription)
    }

    async fn mark_completed(
        &mut self,
        payment_id: Uuid,
        at: DateTime<Utc>,
    ) -> PaymentResult<PaymentRecord> {
        let record = self
            .working
            .payments
            .values_mut()
            .find(|r| r.id == payment_id)
            .ok_or_else(|| PaymentError::RecordNotFound {
                transaction_id: payment_id.to_string(),
            })?;

        if record.status != PaymentStatus::Pending {
            return Err(PaymentError::InvalidRequest(format!(
                "Payment {} is {}, not pending",
                record.gateway_transaction_id, record.status
            )));
        }

        record.status = PaymentStatus::Completed;
        record.updated_at = at;
        Ok(record.clone())
    }

    async fn commit(self: Box<Self>) -> PaymentResult<()> {
        let MemoryTransaction { mut guard, working } = *self;
        *guard = working;
        Ok(())
    }
}

/// Checkout store held in process memory.
#[derive(Clone, Default)]
pub struct MemoryCheckoutStore {
    checkouts: Arc<RwLock<HashMap<String, PendingCheckout>>>,
}

impl MemoryCheckoutStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.checkouts.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.checkouts.read().await.is_empty()
    }
}

#[async_trait]
impl CheckoutStore for MemoryCheckoutStore {
    async fn put(&self, token: &str, checkout: &PendingCheckout) -> PaymentResult<()> {
        self.checkouts
            .write()
            .await
            .insert(token.to_string(), checkout.clone());
        Ok(())
    }

    async fn get(&self, token: &str) -> PaymentResult<Option<PendingCheckout>> {
        Ok(self.checkouts.read().await.get(token).cloned())
    }

    async fn remove(&self, token: &str) -> PaymentResult<()> {
        self.checkouts.write().await.remove(token);
        Ok(())
    }
}

/// Scripted response for the next `create_order` call
#[derive(Debug, Clone)]
pub enum OrderScript {
    Order(GatewayOrder),
    Fail(String),
}

/// Gateway that answers from a script instead of the network.
#[derive(Default)]
pub struct ScriptedGateway {
    orders: Mutex<VecDeque<OrderScript>>,
    captures: Mutex<HashMap<String, VecDeque<CaptureResult>>>,
    last_amount: Mutex<Option<Money>>,
    create_calls: AtomicUsize,
    capture_calls: AtomicUsize,
}

impl ScriptedGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the answer to the next `create_order`.
    pub fn with_order(self, order: GatewayOrder) -> Self {
        self.push_order(OrderScript::Order(order));
        self
    }

    /// Queue a gateway failure for the next `create_order`.
    pub fn with_order_failure(self, message: impl Into<String>) -> Self {
        self.push_order(OrderScript::Fail(message.into()));
        self
    }

    /// Queue `result` for the next capture of `token`.
    ///
    /// Answers are used in order; the last one repeats.
    pub fn with_capture(self, token: impl Into<String>, result: CaptureResult) -> Self {
        self.captures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(token.into())
            .or_default()
            .push_back(result);
        self
    }

    pub fn push_order(&self, script: OrderScript) {
        self.orders
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(script);
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn capture_calls(&self) -> usize {
        self.capture_calls.load(Ordering::SeqCst)
    }

    /// Amount sent with the most recent `create_order`.
    pub fn last_amount(&self) -> Option<Money> {
        *self
            .last_amount
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl PaymentGateway for ScriptedGateway {
    async fn create_order(
        &self,
        amount: &Money,
        _return_url: &str,
        _cancel_url: &str,
    ) -> PaymentResult<GatewayOrder> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        *self
            .last_amount
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(*amount);

        let next = self
            .orders
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        match next {
            Some(OrderScript::Order(order)) => Ok(order),
            Some(OrderScript::Fail(message)) => Err(PaymentError::gateway(message)),
            None => Err(PaymentError::gateway("No scripted order")),
        }
    }

    async fn capture_order(&self, token: &str) -> PaymentResult<CaptureResult> {
        self.capture_calls.fetch_add(1, Ordering::SeqCst);
        let mut captures = self.captures.lock().unwrap_or_else(PoisonError::into_inner);
        let script = captures
            .get_mut(token)
            .ok_or_else(|| PaymentError::gateway(format!("Order {} not found", token)))?;
        let next = if script.len() > 1 {
            script.pop_front()
        } else {
            script.front().cloned()
        };
        next.ok_or_else(|| PaymentError::gateway(format!("Order {} not found", token)))
    }

    fn provider_name(&self) -> &'static str {
        "scripted"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::money::Currency;
    use rust_decimal::Decimal;

    fn new_record(token: &str) -> NewPaymentRecord {
        let checkout = PendingCheckout::certificate(Decimal::new(5000, 2), 7);
        NewPaymentRecord::from_checkout(
            Uuid::new_v4(),
            &checkout,
            Money::new(checkout.amount, Currency::USD).unwrap(),
            "paypal",
            token,
        )
    }

    #[tokio::test]
    async fn test_duplicate_transaction_rejected() {
        let ledger = MemoryLedger::new();
        ledger.create_pending(new_record("PAY123")).await.unwrap();

        let err = ledger.create_pending(new_record("PAY123")).await.unwrap_err();
        assert!(matches!(err, PaymentError::Database(_)));
        assert_eq!(ledger.payments().await.len(), 1);
    }

    #[tokio::test]
    async fn test_mark_completed_only_once() {
        let ledger = MemoryLedger::new();
        let record = ledger.create_pending(new_record("PAY123")).await.unwrap();

        let mut tx = ledger.begin().await.unwrap();
        tx.mark_completed(record.id, Utc::now()).await.unwrap();
        assert!(tx.mark_completed(record.id, Utc::now()).await.is_err());
        tx.commit().await.unwrap();

        let stored = ledger.find_by_transaction_id("PAY123").await.unwrap().unwrap();
        assert_eq!(stored.status, PaymentStatus::Completed);
    }

    #[tokio::test]
    async fn test_expire_only_old_pending() {
        let ledger = MemoryLedger::new();
        ledger.create_pending(new_record("OLD")).await.unwrap();

        let expired = ledger
            .expire_pending_before(Utc::now() + chrono::Duration::seconds(1))
            .await
            .unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].status, PaymentStatus::Failed);

        ledger.create_pending(new_record("NEW")).await.unwrap();
        let expired = ledger
            .expire_pending_before(Utc::now() - chrono::Duration::hours(1))
            .await
            .unwrap();
        assert!(expired.is_empty());
    }

    #[tokio::test]
    async fn test_captured_pending_survives_expiry() {
        let ledger = MemoryLedger::new();
        let record = ledger.create_pending(new_record("PAID")).await.unwrap();
        ledger.mark_captured(record.id, Utc::now()).await.unwrap();

        let expired = ledger
            .expire_pending_before(Utc::now() + chrono::Duration::seconds(1))
            .await
            .unwrap();
        assert!(expired.is_empty());

        let stored = ledger.find_by_transaction_id("PAID").await.unwrap().unwrap();
        assert_eq!(stored.status, PaymentStatus::Pending);
        assert!(stored.captured_at.is_some());
    }

    #[tokio::test]
    async fn test_mark_captured_keeps_first_time() {
        let ledger = MemoryLedger::new();
        let record = ledger.create_pending(new_record("PAY123")).await.unwrap();
        let first = Utc::now() - chrono::Duration::minutes(5);

        ledger.mark_captured(record.id, first).await.unwrap();
        ledger.mark_captured(record.id, Utc::now()).await.unwrap();

        let stored = ledger.find_by_transaction_id("PAY123").await.unwrap().unwrap();
        assert_eq!(stored.captured_at, Some(first));
    }

    #[tokio::test]
    async fn test_challenges_added_after_sharing() {
        let ledger = MemoryLedger::new().with_challenge(7, "Ownership");
        let shared = ledger.clone();

        shared.add_challenge(8, "Lifetimes").await;

        assert!(ledger.challenge_exists(7).await.unwrap());
        assert!(ledger.challenge_exists(8).await.unwrap());
        assert!(!ledger.challenge_exists(9).await.unwrap());
    }

    #[tokio::test]
    async fn test_checkout_store_round_trip() {
        let store = MemoryCheckoutStore::new();
        let checkout = PendingCheckout::subscription(Decimal::new(999, 2), "basic", 7);

        store.put("PAY1", &checkout).await.unwrap();
        assert_eq!(store.get("PAY1").await.unwrap(), Some(checkout));

        store.remove("PAY1").await.unwrap();
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_scripted_gateway_empty_script_fails() {
        let gateway = ScriptedGateway::new();
        let money = Money::new(Decimal::ONE, Currency::USD).unwrap();

        assert!(gateway.create_order(&money, "r", "c").await.is_err());
        assert_eq!(gateway.create_calls(), 1);
        assert_eq!(gateway.last_amount(), Some(money));
    }

    #[tokio::test]
    async fn test_scripted_captures_play_in_order() {
        let gateway = ScriptedGateway::new()
            .with_capture("PAY123", CaptureResult::new("COMPLETED"))
            .with_capture("PAY123", CaptureResult::already_captured());

        let first = gateway.capture_order("PAY123").await.unwrap();
        let second = gateway.capture_order("PAY123").await.unwrap();
        let third = gateway.capture_order("PAY123").await.unwrap();

        assert!(!first.already_captured);
        assert!(second.already_captured);
        assert!(third.already_captured);
        assert_eq!(gateway.capture_calls(), 3);
    }
}
