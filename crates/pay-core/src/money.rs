//! # Money Types
//!
//! Currency and decimal amounts. Amounts stay exact `Decimal` values from the
//! checkout request to the gateway payload and the ledger row.

use crate::error::{PaymentError, PaymentResult};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Supported currencies (ISO 4217)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    #[default]
    USD,
    EUR,
    GBP,
    JPY,
    CAD,
    AUD,
    CHF,
    MXN,
}

impl Currency {
    /// Returns the ISO 4217 currency code, as the gateway expects it
    pub fn as_str(&self) -> &'static str {
        match self {
            Currency::USD => "USD",
            Currency::EUR => "EUR",
            Currency::GBP => "GBP",
            Currency::JPY => "JPY",
            Currency::CAD => "CAD",
            Currency::AUD => "AUD",
            Currency::CHF => "CHF",
            Currency::MXN => "MXN",
        }
    }

    /// Returns the number of decimal places for this currency
    /// (JPY has 0 decimals, most others have 2)
    pub fn decimal_places(&self) -> u32 {
        match self {
            Currency::JPY => 0,
            _ => 2,
        }
    }
}

impl std::fmt::Display for Currency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Currency {
    type Err = PaymentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "USD" => Ok(Currency::USD),
            "EUR" => Ok(Currency::EUR),
            "GBP" => Ok(Currency::GBP),
            "JPY" => Ok(Currency::JPY),
            "CAD" => Ok(Currency::CAD),
            "AUD" => Ok(Currency::AUD),
            "CHF" => Ok(Currency::CHF),
            "MXN" => Ok(Currency::MXN),
            other => Err(PaymentError::InvalidRequest(format!(
                "Unsupported currency: {}",
                other
            ))),
        }
    }
}

/// An exact amount in a given currency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Money {
    pub amount: Decimal,
    pub currency: Currency,
}

impl Money {
    /// Build a validated amount: strictly positive, and no finer than the
    /// currency's minor unit.
    pub fn new(amount: Decimal, currency: Currency) -> PaymentResult<Self> {
        if amount <= Decimal::ZERO {
            return Err(PaymentError::InvalidRequest(
                "Amount must be greater than zero".to_string(),
            ));
        }
        let normalized = amount.normalize();
        if normalized.scale() > currency.decimal_places() {
            return Err(PaymentError::InvalidRequest(format!(
                "Amount {} has more than {} decimal places for {}",
                amount,
                currency.decimal_places(),
                currency
            )));
        }
        Ok(Self { amount, currency })
    }

    /// Gateway wire format: fixed decimal places, e.g. `"50.00"`.
    pub fn to_gateway_value(&self) -> String {
        let mut value = self.amount;
        value.rescale(self.currency.decimal_places());
        value.to_string()
    }

    /// Format for display (e.g., "$10.00")
    pub fn display(&self) -> String {
        let symbol = match self.currency {
            Currency::USD => "$",
            Currency::EUR => "€",
            Currency::GBP => "£",
            Currency::JPY => "¥",
            Currency::CAD => "C$",
            Currency::AUD => "A$",
            Currency::CHF => "CHF ",
            Currency::MXN => "MX$",
        };
        format!("{}{}", symbol, self.to_gateway_value())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gateway_value_keeps_cents() {
        let money = Money::new(Decimal::new(4999, 2), Currency::USD).unwrap();
        assert_eq!(money.to_gateway_value(), "49.99");

        let whole = Money::new(Decimal::new(50, 0), Currency::USD).unwrap();
        assert_eq!(whole.to_gateway_value(), "50.00");
    }

    #[test]
    fn test_rejects_non_positive() {
        assert!(Money::new(Decimal::ZERO, Currency::USD).is_err());
        assert!(Money::new(Decimal::new(-100, 2), Currency::USD).is_err());
    }

    #[test]
    fn test_rejects_sub_cent_precision() {
        assert!(Money::new(Decimal::new(10001, 3), Currency::USD).is_err());
        // Trailing zeros are fine
        assert!(Money::new(Decimal::new(10000, 3), Currency::USD).is_ok());
        assert!(Money::new(Decimal::new(150, 1), Currency::JPY).is_err());
    }

    #[test]
    fn test_currency_parse() {
        assert_eq!("usd".parse::<Currency>().unwrap(), Currency::USD);
        assert!("XYZ".parse::<Currency>().is_err());
    }

    #[test]
    fn test_display() {
        let money = Money::new(Decimal::new(1000, 2), Currency::EUR).unwrap();
        assert_eq!(money.display(), "€10.00");
    }
}
