use async_trait::async_trait;
use pay_core::{CheckoutStore, PaymentError, PaymentResult, PendingCheckout};
use sqlx::types::Json;

use crate::{db_error, PostgresPersistence};

#[async_trait]
impl CheckoutStore for PostgresPersistence {
    async fn put(&self, token: &str, checkout: &PendingCheckout) -> PaymentResult<()> {
        sqlx::query(
            r#"
            INSERT INTO pending_checkouts (token, checkout, created_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (token) DO UPDATE SET
                checkout = EXCLUDED.checkout,
                created_at = EXCLUDED.created_at
            "#,
        )
        .bind(token)
        .bind(Json(checkout))
        .bind(checkout.created_at)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(())
    }

    async fn get(&self, token: &str) -> PaymentResult<Option<PendingCheckout>> {
        let value: Option<serde_json::Value> =
            sqlx::query_scalar("SELECT checkout FROM pending_checkouts WHERE token = $1")
                .bind(token)
                .fetch_optional(&self.pool)
                .await
                .map_err(db_error)?;

        value
            .map(|json| {
                serde_json::from_value(json).map_err(|e| {
                    tracing::warn!(token, error = %e, "Stored checkout is unreadable");
                    PaymentError::Serialization(format!("Invalid stored checkout: {}", e))
                })
            })
            .transpose()
    }

    async fn remove(&self, token: &str) -> PaymentResult<()> {
        sqlx::query("DELETE FROM pending_checkouts WHERE token = $1")
            .bind(token)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;

        Ok(())
    }
}
