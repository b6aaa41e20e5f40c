//! # Application State
//!
//! Shared state for the Axum application.
//! Contains the checkout workflow and configuration.

use pay_core::{
    memory::{MemoryCheckoutStore, MemoryLedger},
    BoxedPaymentGateway, CheckoutUrls, CheckoutWorkflow, Currency, SharedCheckoutStore,
    SharedLedger,
};
use pay_paypal::PayPalGateway;
use pay_postgres::PostgresPersistence;
use std::sync::Arc;
use tracing::{info, warn};

/// Application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Base URL for callbacks
    pub base_url: String,
    /// Where the buyer lands when there is no page to go back to
    pub home_url: String,
    /// Environment (development, staging, production)
    pub environment: String,
    /// Postgres connection string; in-memory storage when unset
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    /// Pending payments older than this are failed by the sweep
    pub pending_ttl_hours: Option<i64>,
    pub sweep_interval_secs: u64,
    /// Challenges loaded into the in-memory ledger (`CHALLENGES=7=Ownership;8=Lifetimes`)
    pub challenges: Vec<(i64, String)>,
}

impl AppConfig {
    /// Load from environment variables
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup (the environment, a map)
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let base_url = lookup("BASE_URL")
            .unwrap_or_else(|| "http://localhost:8080".to_string())
            .trim_end_matches('/')
            .to_string();

        Self {
            host: lookup("HOST").unwrap_or_else(|| "127.0.0.1".to_string()),
            port: lookup("PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(8080),
            home_url: lookup("HOME_URL").unwrap_or_else(|| format!("{}/", base_url)),
            base_url,
            environment: lookup("ENVIRONMENT").unwrap_or_else(|| "development".to_string()),
            database_url: lookup("DATABASE_URL").filter(|url| !url.trim().is_empty()),
            database_max_connections: lookup("DATABASE_MAX_CONNECTIONS")
                .and_then(|n| n.parse().ok())
                .unwrap_or(5),
            pending_ttl_hours: lookup("PENDING_TTL_HOURS")
                .and_then(|h| h.parse().ok())
                .filter(|h: &i64| *h > 0),
            sweep_interval_secs: lookup("SWEEP_INTERVAL_SECS")
                .and_then(|s| s.parse().ok())
                .filter(|s: &u64| *s > 0)
                .unwrap_or(3600),
            challenges: lookup("CHALLENGES")
                .map(|list| parse_challenges(&list))
                .unwrap_or_default(),
        }
    }

    /// Config for a local instance at `base_url` (for testing)
    pub fn local(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            home_url: format!("{}/", base_url),
            base_url,
            environment: "test".to_string(),
            database_url: None,
            database_max_connections: 5,
            pending_ttl_hours: None,
            sweep_interval_secs: 3600,
            challenges: Vec::new(),
        }
    }

    /// Builder: register a challenge for in-memory storage
    pub fn with_challenge(mut self, id: i64, title: impl Into<String>) -> Self {
        self.challenges.push((id, title.into()));
        self
    }

    /// Get the socket address to bind to
    pub fn socket_addr(&self) -> anyhow::Result<std::net::SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid HOST/PORT {}:{}: {}", self.host, self.port, e))
    }

    /// Check if running in production
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    /// Age after which a pending payment is given up on
    pub fn pending_ttl(&self) -> Option<chrono::Duration> {
        self.pending_ttl_hours.map(chrono::Duration::hours)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

/// `id=title` pairs separated by `;`. Malformed entries are skipped.
fn parse_challenges(list: &str) -> Vec<(i64, String)> {
    list.split(';')
        .filter_map(|entry| {
            let (id, title) = entry.split_once('=')?;
            let id = id.trim().parse().ok()?;
            Some((id, title.trim().to_string()))
        })
        .collect()
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Initiate / confirm / cancel
    pub workflow: CheckoutWorkflow,
    /// Currency used when a checkout request names none
    pub default_currency: Currency,
    /// Application config
    pub config: AppConfig,
}

impl AppState {
    /// Build state from the environment: PayPal gateway, plus Postgres
    /// storage when `DATABASE_URL` is set.
    pub async fn new() -> anyhow::Result<Self> {
        let config = AppConfig::from_env();

        let gateway = PayPalGateway::from_env()
            .map_err(|e| anyhow::anyhow!("Failed to initialize PayPal: {}", e))?;
        let default_currency = gateway.config().currency;
        info!(
            sandbox = gateway.config().is_sandbox(),
            currency = %default_currency,
            "PayPal gateway ready"
        );

        Self::with_gateway(config, Arc::new(gateway), default_currency).await
    }

    /// Wire storage from `config` around an already-built gateway.
    pub async fn with_gateway(
        config: AppConfig,
        gateway: BoxedPaymentGateway,
        default_currency: Currency,
    ) -> anyhow::Result<Self> {
        let (ledger, checkouts): (SharedLedger, SharedCheckoutStore) = match &config.database_url
        {
            Some(url) => {
                let pool = pay_postgres::init_db(url, config.database_max_connections).await?;
                pay_postgres::run_migrations(&pool).await?;
                let persistence = Arc::new(PostgresPersistence::new(pool));
                (
                    persistence.clone() as SharedLedger,
                    persistence as SharedCheckoutStore,
                )
            }
            None => {
                if config.is_production() {
                    warn!("DATABASE_URL not set in production; payments will not survive a restart");
                } else {
                    warn!("DATABASE_URL not set, using in-memory storage");
                }
                if config.challenges.is_empty() {
                    warn!("CHALLENGES not set; certificate checkouts will be refused");
                }

                let ledger = MemoryLedger::new();
                for (id, title) in &config.challenges {
                    ledger.add_challenge(*id, title.clone()).await;
                }
                (
                    Arc::new(ledger) as SharedLedger,
                    Arc::new(MemoryCheckoutStore::new()) as SharedCheckoutStore,
                )
            }
        };

        let urls = CheckoutUrls::new(&config.base_url);
        let workflow = CheckoutWorkflow::new(gateway, ledger, checkouts, urls);

        Ok(Self {
            workflow,
            default_currency,
            config,
        })
    }

    /// Assemble state from already-built parts (for testing)
    pub fn from_parts(config: AppConfig, workflow: CheckoutWorkflow) -> Self {
        Self {
            workflow,
            default_currency: Currency::USD,
            config,
        }
    }

    pub fn storage_name(&self) -> &'static str {
        if self.config.database_url.is_some() {
            "postgres"
        } else {
            "memory"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pay_core::{
        memory::ScriptedGateway, GatewayLink, GatewayOrder, PaymentError, PendingCheckout,
    };
    use rust_decimal::Decimal;
    use std::collections::HashMap;
    use uuid::Uuid;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    fn order(id: &str) -> GatewayOrder {
        GatewayOrder {
            id: id.to_string(),
            status: Some("CREATED".to_string()),
            links: vec![GatewayLink::new(
                "approve",
                format!("https://paypal.test/checkoutnow?token={id}"),
            )],
        }
    }

    #[test]
    fn test_app_config_defaults() {
        let config = AppConfig::from_lookup(lookup(&[]));
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 8080);
        assert_eq!(config.base_url, "http://localhost:8080");
        assert_eq!(config.home_url, "http://localhost:8080/");
        assert!(config.database_url.is_none());
        assert!(config.pending_ttl().is_none());
        assert!(config.challenges.is_empty());
    }

    #[test]
    fn test_app_config_from_lookup() {
        let config = AppConfig::from_lookup(lookup(&[
            ("BASE_URL", "https://academy.test/"),
            ("PORT", "3000"),
            ("DATABASE_URL", "  "),
            ("PENDING_TTL_HOURS", "0"),
            ("CHALLENGES", "7=Borrow checker basics; 8 = Lifetimes;oops;x=Bad"),
        ]));

        assert_eq!(config.base_url, "https://academy.test");
        assert_eq!(config.port, 3000);
        assert!(config.database_url.is_none());
        assert!(config.pending_ttl_hours.is_none());
        assert_eq!(
            config.challenges,
            vec![
                (7, "Borrow checker basics".to_string()),
                (8, "Lifetimes".to_string())
            ]
        );
    }

    #[test]
    fn test_socket_addr() {
        let mut config = AppConfig::local("http://localhost:3000");
        config.host = "0.0.0.0".to_string();
        config.port = 3000;

        let addr = config.socket_addr().unwrap();
        assert_eq!(addr.to_string(), "0.0.0.0:3000");
    }

    #[test]
    fn test_invalid_host_is_error() {
        let mut config = AppConfig::local("http://localhost:3000");
        config.host = "not a host".to_string();
        assert!(config.socket_addr().is_err());
    }

    #[test]
    fn test_local_config_home_url() {
        let config = AppConfig::local("https://shop.test/");
        assert_eq!(config.base_url, "https://shop.test");
        assert_eq!(config.home_url, "https://shop.test/");
        assert!(!config.is_production());
    }

    #[test]
    fn test_pending_ttl() {
        let mut config = AppConfig::local("http://localhost:8080");
        config.pending_ttl_hours = Some(24);
        assert_eq!(config.pending_ttl(), Some(chrono::Duration::hours(24)));
    }

    #[tokio::test]
    async fn test_memory_storage_seeds_challenges() {
        let config = AppConfig::local("https://academy.test").with_challenge(7, "Ownership");
        let gateway = Arc::new(ScriptedGateway::new().with_order(order("PAY123")));
        let state = AppState::with_gateway(config, gateway.clone(), Currency::USD)
            .await
            .unwrap();
        assert_eq!(state.storage_name(), "memory");

        let initiated = state
            .workflow
            .initiate(
                Uuid::new_v4(),
                PendingCheckout::certificate(Decimal::new(5000, 2), 7),
            )
            .await
            .unwrap();
        assert_eq!(
            initiated.approval_url,
            "https://paypal.test/checkoutnow?token=PAY123"
        );

        let err = state
            .workflow
            .initiate(
                Uuid::new_v4(),
                PendingCheckout::certificate(Decimal::new(5000, 2), 8),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::Validation(_)));
        assert_eq!(gateway.create_calls(), 1);
    }

    #[tokio::test]
    async fn test_unseeded_memory_storage_refuses_certificates_before_charging() {
        let config = AppConfig::local("https://academy.test");
        let gateway = Arc::new(ScriptedGateway::new().with_order(order("PAY123")));
        let state = AppState::with_gateway(config, gateway.clone(), Currency::USD)
            .await
            .unwrap();

        let err = state
            .workflow
            .initiate(
                Uuid::new_v4(),
                PendingCheckout::certificate(Decimal::new(5000, 2), 7),
            )
            .await
            .unwrap_err();

        assert_eq!(err.user_message(), "Challenge 7 not found");
        assert_eq!(gateway.create_calls(), 0);
    }
}
