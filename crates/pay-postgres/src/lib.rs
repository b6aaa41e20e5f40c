//! # pay-postgres
//!
//! Postgres storage for paypal-checkout-rs.
//!
//! `PostgresPersistence` implements both `PaymentLedger` and
//! `CheckoutStore`. Confirmation runs inside a real database transaction:
//! the payment row is taken with `SELECT ... FOR UPDATE`, so two
//! concurrent confirmations of one order serialize and only the first
//! fulfills.

pub mod checkout_store;
pub mod db;
pub mod ledger;

pub use db::{init_db, run_migrations, MIGRATOR};
pub use ledger::PgLedgerTransaction;

use pay_core::PaymentError;
use sqlx::PgPool;

#[derive(Clone)]
pub struct PostgresPersistence {
    pool: PgPool,
}

impl PostgresPersistence {
    pub fn new(pool: PgPool) -> Self {
        PostgresPersistence { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Map a sqlx failure onto the payment error taxonomy.
pub fn db_error(err: sqlx::Error) -> PaymentError {
    match &err {
        sqlx::Error::RowNotFound => PaymentError::Database("Record not found".into()),
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
            PaymentError::Database("A record with this value already exists".into())
        }
        sqlx::Error::Database(db_err) if db_err.is_foreign_key_violation() => {
            PaymentError::Validation("Referenced record not found".into())
        }
        _ => {
            // Log the actual error, but don't expose details
            tracing::error!(error = ?err, "Database error");
            PaymentError::Database("Database operation failed".into())
        }
    }
}
