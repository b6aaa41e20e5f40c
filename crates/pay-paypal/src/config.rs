//! # PayPal Configuration
//!
//! Configuration management for the PayPal integration.
//! All secrets are loaded from environment variables.

use pay_core::{Currency, PaymentError};
use std::env;
use std::time::Duration;

const SANDBOX_API_BASE: &str = "https://api-m.sandbox.paypal.com";
const LIVE_API_BASE: &str = "https://api-m.paypal.com";
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Which PayPal environment credentials belong to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayPalMode {
    Sandbox,
    Live,
}

impl PayPalMode {
    pub fn api_base_url(&self) -> &'static str {
        match self {
            PayPalMode::Sandbox => SANDBOX_API_BASE,
            PayPalMode::Live => LIVE_API_BASE,
        }
    }
}

impl std::str::FromStr for PayPalMode {
    type Err = PaymentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sandbox" => Ok(PayPalMode::Sandbox),
            "live" => Ok(PayPalMode::Live),
            other => Err(PaymentError::Configuration(format!(
                "PAYPAL_MODE must be sandbox or live, got {}",
                other
            ))),
        }
    }
}

/// PayPal REST API configuration
#[derive(Debug, Clone)]
pub struct PayPalConfig {
    /// REST app client id
    pub client_id: String,

    /// REST app secret
    pub client_secret: String,

    pub mode: PayPalMode,

    /// Currency orders are created in
    pub currency: Currency,

    /// Upper bound for each gateway HTTP call
    pub timeout: Duration,

    /// API base URL (for testing/mocking)
    pub api_base_url: String,
}

impl PayPalConfig {
    /// Load configuration from environment variables.
    ///
    /// Required env vars:
    /// - `PAYPAL_CLIENT_ID`
    /// - `PAYPAL_CLIENT_SECRET`
    ///
    /// Optional: `PAYPAL_MODE` (sandbox), `PAYPAL_CURRENCY` (USD),
    /// `PAYPAL_TIMEOUT_SECS` (30).
    pub fn from_env() -> Result<Self, PaymentError> {
        dotenvy::dotenv().ok(); // Load .env file if present

        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build configuration from any key lookup (the environment, a map).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, PaymentError> {
        let required = |key: &str| match lookup(key) {
            Some(value) if !value.trim().is_empty() => Ok(value),
            _ => Err(PaymentError::Configuration(format!("{} not set", key))),
        };

        let client_id = required("PAYPAL_CLIENT_ID")?;
        let client_secret = required("PAYPAL_CLIENT_SECRET")?;

        let mode = match lookup("PAYPAL_MODE") {
            Some(value) => value.parse()?,
            None => PayPalMode::Sandbox,
        };

        let currency = match lookup("PAYPAL_CURRENCY") {
            Some(value) => value
                .parse()
                .map_err(|e: PaymentError| PaymentError::Configuration(e.to_string()))?,
            None => Currency::USD,
        };

        let timeout_secs = match lookup("PAYPAL_TIMEOUT_SECS") {
            Some(value) => value.parse::<u64>().map_err(|_| {
                PaymentError::Configuration(
                    "PAYPAL_TIMEOUT_SECS must be a whole number of seconds".to_string(),
                )
            })?,
            None => DEFAULT_TIMEOUT_SECS,
        };

        Ok(Self::new(client_id, client_secret, mode)
            .with_currency(currency)
            .with_timeout(Duration::from_secs(timeout_secs)))
    }

    /// Create config with explicit values (for testing)
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        mode: PayPalMode,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            mode,
            currency: Currency::USD,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            api_base_url: mode.api_base_url().to_string(),
        }
    }

    pub fn is_sandbox(&self) -> bool {
        self.mode == PayPalMode::Sandbox
    }

    /// Builder: set custom API base URL (for testing)
    pub fn with_api_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_currency(mut self, currency: Currency) -> Self {
        self.currency = currency;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_mode_selects_base_url() {
        let sandbox = PayPalConfig::new("id", "secret", PayPalMode::Sandbox);
        assert!(sandbox.is_sandbox());
        assert_eq!(sandbox.api_base_url, "https://api-m.sandbox.paypal.com");

        let live = PayPalConfig::new("id", "secret", PayPalMode::Live);
        assert!(!live.is_sandbox());
        assert_eq!(live.api_base_url, "https://api-m.paypal.com");
    }

    #[test]
    fn test_mode_parse() {
        assert_eq!("LIVE".parse::<PayPalMode>().unwrap(), PayPalMode::Live);
        assert!("production".parse::<PayPalMode>().is_err());
    }

    #[test]
    fn test_base_url_override_trims_slash() {
        let config = PayPalConfig::new("id", "secret", PayPalMode::Sandbox)
            .with_api_base_url("http://127.0.0.1:9999/");
        assert_eq!(config.api_base_url, "http://127.0.0.1:9999");
    }

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_missing_client_id() {
        let err = PayPalConfig::from_lookup(lookup(&[("PAYPAL_CLIENT_SECRET", "secret")]))
            .unwrap_err();
        assert_eq!(err.to_string(), "Configuration error: PAYPAL_CLIENT_ID not set");
    }

    #[test]
    fn test_lookup_defaults() {
        let config = PayPalConfig::from_lookup(lookup(&[
            ("PAYPAL_CLIENT_ID", "id"),
            ("PAYPAL_CLIENT_SECRET", "secret"),
        ]))
        .unwrap();

        assert!(config.is_sandbox());
        assert_eq!(config.currency, Currency::USD);
        assert_eq!(config.timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_lookup_overrides() {
        let config = PayPalConfig::from_lookup(lookup(&[
            ("PAYPAL_CLIENT_ID", "id"),
            ("PAYPAL_CLIENT_SECRET", "secret"),
            ("PAYPAL_MODE", "live"),
            ("PAYPAL_CURRENCY", "EUR"),
            ("PAYPAL_TIMEOUT_SECS", "5"),
        ]))
        .unwrap();

        assert_eq!(config.mode, PayPalMode::Live);
        assert_eq!(config.currency, Currency::EUR);
        assert_eq!(config.timeout, Duration::from_secs(5));

        assert!(PayPalConfig::from_lookup(lookup(&[
            ("PAYPAL_CLIENT_ID", "id"),
            ("PAYPAL_CLIENT_SECRET", "secret"),
            ("PAYPAL_TIMEOUT_SECS", "soon"),
        ]))
        .is_err());
    }
}
