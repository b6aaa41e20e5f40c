use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pay_core::{
    Certificate, LedgerTransaction, NewCertificate, NewPaymentRecord, NewSubscription,
    PaymentError, PaymentLedger, PaymentRecord, PaymentResult, PaymentStatus, Subscription,
};
use sqlx::postgres::{PgRow, Postgres};
use sqlx::{Row, Transaction};
use uuid::Uuid;

use crate::{db_error, PostgresPersistence};

const PAYMENT_COLS: &str = r#"
    id, user_id, amount, currency, method, gateway_transaction_id,
    payable_type, payable_id, status, captured_at, created_at, updated_at
"#;

fn row_to_payment(row: &PgRow) -> PaymentResult<PaymentRecord> {
    let payable_type: String = row.try_get("payable_type").map_err(db_error)?;
    let status: String = row.try_get("status").map_err(db_error)?;

    Ok(PaymentRecord {
        id: row.try_get("id").map_err(db_error)?,
        user_id: row.try_get("user_id").map_err(db_error)?,
        amount: row.try_get("amount").map_err(db_error)?,
        currency: row.try_get("currency").map_err(db_error)?,
        method: row.try_get("method").map_err(db_error)?,
        gateway_transaction_id: row.try_get("gateway_transaction_id").map_err(db_error)?,
        payable_type: payable_type.parse()?,
        payable_id: row.try_get("payable_id").map_err(db_error)?,
        status: status.parse()?,
        captured_at: row.try_get("captured_at").map_err(db_error)?,
        created_at: row.try_get("created_at").map_err(db_error)?,
        updated_at: row.try_get("updated_at").map_err(db_error)?,
    })
}

#[async_trait]
impl PaymentLedger for PostgresPersistence {
    async fn create_pending(&self, record: NewPaymentRecord) -> PaymentResult<PaymentRecord> {
        let record = record.into_record(Utc::now());

        let row = sqlx::query(&format!(
            r#"
            INSERT INTO payments (
                id, user_id, amount, currency, method, gateway_transaction_id,
                payable_type, payable_id, status, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING {}
            "#,
            PAYMENT_COLS
        ))
        .bind(record.id)
        .bind(record.user_id)
        .bind(record.amount)
        .bind(&record.currency)
        .bind(&record.method)
        .bind(&record.gateway_transaction_id)
        .bind(record.payable_type.as_str())
        .bind(record.payable_id)
        .bind(record.status.as_str())
        .bind(record.created_at)
        .bind(record.updated_at)
        .fetch_one(&self.pool)
        .await
        .map_err(db_error)?;

        row_to_payment(&row)
    }

    async fn find_by_transaction_id(
        &self,
        gateway_transaction_id: &str,
    ) -> PaymentResult<Option<PaymentRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM payments WHERE gateway_transaction_id = $1",
            PAYMENT_COLS
        ))
        .bind(gateway_transaction_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        row.as_ref().map(row_to_payment).transpose()
    }

    async fn challenge_exists(&self, challenge_id: i64) -> PaymentResult<bool> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM challenges WHERE id = $1)")
                .bind(challenge_id)
                .fetch_one(&self.pool)
                .await
                .map_err(db_error)?;

        Ok(exists)
    }

    async fn mark_captured(&self, payment_id: Uuid, at: DateTime<Utc>) -> PaymentResult<()> {
        sqlx::query(
            r#"
            UPDATE payments
            SET captured_at = $2, updated_at = $2
            WHERE id = $1 AND status = 'pending' AND captured_at IS NULL
            "#,
        )
        .bind(payment_id)
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(())
    }

    async fn begin(&self) -> PaymentResult<Box<dyn LedgerTransaction>> {
        let tx = self.pool.begin().await.map_err(db_error)?;
        Ok(Box::new(PgLedgerTransaction { tx }))
    }

    async fn expire_pending_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> PaymentResult<Vec<PaymentRecord>> {
        let rows = sqlx::query(&format!(
            r#"
            UPDATE payments
            SET status = 'failed', updated_at = NOW()
            WHERE status = 'pending' AND captured_at IS NULL AND created_at < $1
            RETURNING {}
            "#,
            PAYMENT_COLS
        ))
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        rows.iter().map(row_to_payment).collect()
    }
}

/// Confirmation transaction. Dropping it without `commit` rolls back.
pub struct PgLedgerTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl LedgerTransaction for PgLedgerTransaction {
    async fn lock_payment(
        &mut self,
        gateway_transaction_id: &str,
    ) -> PaymentResult<Option<PaymentRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM payments WHERE gateway_transaction_id = $1 FOR UPDATE",
            PAYMENT_COLS
        ))
        .bind(gateway_transaction_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(db_error)?;

        row.as_ref().map(row_to_payment).transpose()
    }

    async fn challenge_exists(&mut self, challenge_id: i64) -> PaymentResult<bool> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM challenges WHERE id = $1)")
                .bind(challenge_id)
                .fetch_one(&mut *self.tx)
                .await
                .map_err(db_error)?;

        Ok(exists)
    }

    async fn insert_certificate(
        &mut self,
        certificate: NewCertificate,
    ) -> PaymentResult<Certificate> {
        let row = sqlx::query(
            r#"
            INSERT INTO certificates (id, user_id, challenge_id, issued_at)
            VALUES ($1, $2, $3, $4)
            RETURNING id, user_id, challenge_id, issued_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(certificate.user_id)
        .bind(certificate.challenge_id)
        .bind(certificate.issued_at)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(db_error)?;

        Ok(Certificate {
            id: row.try_get("id").map_err(db_error)?,
            user_id: row.try_get("user_id").map_err(db_error)?,
            challenge_id: row.try_get("challenge_id").map_err(db_error)?,
            issued_at: row.try_get("issued_at").map_err(db_error)?,
        })
    }

    async fn insert_subscription(
        &mut self,
        subscription: NewSubscription,
    ) -> PaymentResult<Subscription> {
        let row = sqlx::query(
            r#"
            INSERT INTO subscriptions (id, user_id, plan_name, starts_at, ends_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, user_id, plan_name, starts_at, ends_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(subscription.user_id)
        .bind(&subscription.plan_name)
        .bind(subscription.starts_at)
        .bind(subscription.ends_at)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(db_error)?;

        Ok(Subscription {
            id: row.try_get("id").map_err(db_error)?,
            user_id: row.try_get("user_id").map_err(db_error)?,
            plan_name: row.try_get("plan_name").map_err(db_error)?,
            starts_at: row.try_get("starts_at").map_err(db_error)?,
            ends_at: row.try_get("ends_at").map_err(db_error)?,
        })
    }

    async fn mark_completed(
        &mut self,
        payment_id: Uuid,
        at: DateTime<Utc>,
    ) -> PaymentResult<PaymentRecord> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE payments
            SET status = $3, updated_at = $2
            WHERE id = $1 AND status = 'pending'
            RETURNING {}
            "#,
            PAYMENT_COLS
        ))
        .bind(payment_id)
        .bind(at)
        .bind(PaymentStatus::Completed.as_str())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(db_error)?;

        match row {
            Some(row) => row_to_payment(&row),
            None => Err(PaymentError::InvalidRequest(format!(
                "Payment {} is not pending",
                payment_id
            ))),
        }
    }

    async fn commit(self: Box<Self>) -> PaymentResult<()> {
        self.tx.commit().await.map_err(db_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pay_core::{Currency, Money, PayableType};
    use rust_decimal::Decimal;
    use std::str::FromStr;

    async fn persistence() -> Option<PostgresPersistence> {
        let url = std::env::var("TEST_DATABASE_URL").ok()?;
        let pool = crate::init_db(&url, 2).await.ok()?;
        crate::run_migrations(&pool).await.ok()?;
        Some(PostgresPersistence::new(pool))
    }

    fn new_record(txn: &str) -> NewPaymentRecord {
        NewPaymentRecord {
            user_id: Uuid::new_v4(),
            amount: Money::new(Decimal::from_str("49.99").unwrap(), Currency::USD).unwrap(),
            method: "paypal".to_string(),
            gateway_transaction_id: txn.to_string(),
            payable_type: PayableType::Certificate,
            payable_id: Some(7),
        }
    }

    #[tokio::test]
    #[ignore = "requires TEST_DATABASE_URL"]
    async fn pending_record_round_trips_with_exact_amount() {
        let Some(store) = persistence().await else {
            return;
        };
        let txn = format!("PG-{}", Uuid::new_v4());

        let created = store.create_pending(new_record(&txn)).await.unwrap();
        assert_eq!(created.status, PaymentStatus::Pending);

        let found = store.find_by_transaction_id(&txn).await.unwrap().unwrap();
        assert_eq!(found.amount, Decimal::from_str("49.99").unwrap());
        assert_eq!(found.payable_id, Some(7));

        let dup = store.create_pending(new_record(&txn)).await.unwrap_err();
        assert!(matches!(dup, PaymentError::Database(_)));
    }

    #[tokio::test]
    #[ignore = "requires TEST_DATABASE_URL"]
    async fn dropped_transaction_rolls_back() {
        let Some(store) = persistence().await else {
            return;
        };
        let txn = format!("PG-{}", Uuid::new_v4());
        let created = store.create_pending(new_record(&txn)).await.unwrap();

        {
            let mut tx = store.begin().await.unwrap();
            let locked = tx.lock_payment(&txn).await.unwrap().unwrap();
            tx.mark_completed(locked.id, Utc::now()).await.unwrap();
            // dropped without commit
        }

        let found = store.find_by_transaction_id(&txn).await.unwrap().unwrap();
        assert_eq!(found.id, created.id);
        assert_eq!(found.status, PaymentStatus::Pending);

        let mut tx = store.begin().await.unwrap();
        tx.mark_completed(created.id, Utc::now()).await.unwrap();
        tx.commit().await.unwrap();

        let found = store.find_by_transaction_id(&txn).await.unwrap().unwrap();
        assert_eq!(found.status, PaymentStatus::Completed);
    }

    #[tokio::test]
    #[ignore = "requires TEST_DATABASE_URL"]
    async fn captured_pending_is_not_expired() {
        let Some(store) = persistence().await else {
            return;
        };
        let txn = format!("PG-{}", Uuid::new_v4());
        let created = store.create_pending(new_record(&txn)).await.unwrap();
        store.mark_captured(created.id, Utc::now()).await.unwrap();

        let expired = store
            .expire_pending_before(Utc::now() + chrono::Duration::seconds(1))
            .await
            .unwrap();
        assert!(expired.iter().all(|r| r.gateway_transaction_id != txn));

        let found = store.find_by_transaction_id(&txn).await.unwrap().unwrap();
        assert_eq!(found.status, PaymentStatus::Pending);
        assert!(found.captured_at.is_some());
    }

    #[tokio::test]
    #[ignore = "requires TEST_DATABASE_URL"]
    async fn locked_row_serializes_completion() {
        let Some(store) = persistence().await else {
            return;
        };
        let txn = format!("PG-{}", Uuid::new_v4());
        store.create_pending(new_record(&txn)).await.unwrap();

        let complete = |store: PostgresPersistence, txn: String| async move {
            let mut tx = store.begin().await?;
            let record = tx
                .lock_payment(&txn)
                .await?
                .ok_or_else(|| PaymentError::Internal("missing".into()))?;
            if record.status != PaymentStatus::Pending {
                return Ok(false);
            }
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            tx.mark_completed(record.id, Utc::now()).await?;
            tx.commit().await?;
            Ok::<_, PaymentError>(true)
        };

        let (a, b) = tokio::join!(
            tokio::spawn(complete(store.clone(), txn.clone())),
            tokio::spawn(complete(store.clone(), txn.clone())),
        );
        let completed = [a.unwrap().unwrap(), b.unwrap().unwrap()];

        assert_eq!(completed.iter().filter(|c| **c).count(), 1);
        let found = store.find_by_transaction_id(&txn).await.unwrap().unwrap();
        assert_eq!(found.status, PaymentStatus::Completed);
    }
}
