//! # Checkout Types
//!
//! The checkout intent a user submits before being sent to the gateway.
//! It lives server-side in a [`CheckoutStore`](crate::ledger::CheckoutStore)
//! under the gateway order id until confirmation consumes it.

use crate::error::{PaymentError, PaymentResult};
use crate::money::{Currency, Money};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// What a payment buys. One variant per fulfillment handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayableType {
    Certificate,
    Subscription,
}

impl PayableType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PayableType::Certificate => "certificate",
            PayableType::Subscription => "subscription",
        }
    }
}

impl std::fmt::Display for PayableType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PayableType {
    type Err = PaymentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "certificate" => Ok(PayableType::Certificate),
            "subscription" => Ok(PayableType::Subscription),
            other => Err(PaymentError::Serialization(format!(
                "Unknown payable type: {}",
                other
            ))),
        }
    }
}

/// Product-specific checkout fields.
///
/// Fields are optional because handlers take them out as they consume them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Payable {
    Certificate {
        #[serde(default)]
        challenge_id: Option<i64>,
    },
    Subscription {
        #[serde(default)]
        plan_name: Option<String>,
        #[serde(default)]
        duration_days: Option<i64>,
    },
}

impl Payable {
    pub fn payable_type(&self) -> PayableType {
        match self {
            Payable::Certificate { .. } => PayableType::Certificate,
            Payable::Subscription { .. } => PayableType::Subscription,
        }
    }

    /// Check the fields fulfillment will need are present and usable.
    ///
    /// Runs before the gateway order is created so an unfulfillable
    /// checkout is never charged.
    pub fn validate(&self) -> PaymentResult<()> {
        match self {
            Payable::Certificate { challenge_id } => match challenge_id {
                Some(id) if *id > 0 => Ok(()),
                _ => Err(PaymentError::Validation(
                    "No challenge selected for this certificate".to_string(),
                )),
            },
            Payable::Subscription {
                plan_name,
                duration_days,
            } => {
                if !plan_name.as_deref().is_some_and(|p| !p.trim().is_empty()) {
                    return Err(PaymentError::Validation(
                        "No subscription plan selected".to_string(),
                    ));
                }
                if !duration_days.is_some_and(|d| d > 0) {
                    return Err(PaymentError::Validation(
                        "Subscription duration must be positive".to_string(),
                    ));
                }
                Ok(())
            }
        }
    }

    /// Challenge a certificate checkout refers to.
    pub fn challenge_id(&self) -> Option<i64> {
        match self {
            Payable::Certificate { challenge_id } => *challenge_id,
            Payable::Subscription { .. } => None,
        }
    }

    /// True once a handler has taken every field it needs.
    pub fn is_consumed(&self) -> bool {
        match self {
            Payable::Certificate { challenge_id } => challenge_id.is_none(),
            Payable::Subscription {
                plan_name,
                duration_days,
            } => plan_name.is_none() && duration_days.is_none(),
        }
    }
}

/// Checkout intent awaiting gateway approval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingCheckout {
    /// Amount to charge
    pub amount: Decimal,

    /// Currency of the charge
    #[serde(default)]
    pub currency: Currency,

    /// Product details
    pub payable: Payable,

    /// Application entity the payment refers to, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payable_id: Option<i64>,

    /// Created timestamp
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl PendingCheckout {
    pub fn new(amount: Decimal, payable: Payable) -> Self {
        Self {
            amount,
            currency: Currency::default(),
            payable,
            payable_id: None,
            created_at: Utc::now(),
        }
    }

    /// Checkout for a certificate of the given challenge
    pub fn certificate(amount: Decimal, challenge_id: i64) -> Self {
        Self::new(
            amount,
            Payable::Certificate {
                challenge_id: Some(challenge_id),
            },
        )
    }

    /// Checkout for a subscription plan
    pub fn subscription(amount: Decimal, plan_name: impl Into<String>, duration_days: i64) -> Self {
        Self::new(
            amount,
            Payable::Subscription {
                plan_name: Some(plan_name.into()),
                duration_days: Some(duration_days),
            },
        )
    }

    pub fn with_currency(mut self, currency: Currency) -> Self {
        self.currency = currency;
        self
    }

    pub fn with_payable_id(mut self, payable_id: i64) -> Self {
        self.payable_id = Some(payable_id);
        self
    }

    pub fn payable_type(&self) -> PayableType {
        self.payable.payable_type()
    }

    /// Validated amount for the gateway call.
    pub fn money(&self) -> PaymentResult<Money> {
        Money::new(self.amount, self.currency)
    }
}
