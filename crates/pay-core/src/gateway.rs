//! # Payment Gateway Trait
//!
//! The seam between the workflow and the payment provider's REST API.
//! The provider owns order creation, buyer approval and capture; this crate
//! only interprets what it answers.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    PaymentGateway (trait)                   │
//! │  ├── create_order()                                         │
//! │  ├── capture_order()                                        │
//! │  └── provider_name()                                        │
//! └─────────────────────────────────────────────────────────────┘
//!                            ▲
//!                 ┌──────────┴──────────┐
//!         ┌───────┴───────┐     ┌───────┴───────┐
//!         │ PayPalGateway │     │ScriptedGateway│
//!         │ (pay-paypal)  │     │   (tests)     │
//!         └───────────────┘     └───────────────┘
//! ```

use crate::error::PaymentResult;
use crate::money::Money;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Link relation the buyer is redirected to for approval
pub const APPROVE_REL: &str = "approve";

/// Capture status the gateway reports for a successful capture
pub const CAPTURE_COMPLETED: &str = "COMPLETED";

/// A HATEOAS link returned with a gateway order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayLink {
    pub rel: String,
    pub href: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
}

impl GatewayLink {
    pub fn new(rel: impl Into<String>, href: impl Into<String>) -> Self {
        Self {
            rel: rel.into(),
            href: href.into(),
            method: None,
        }
    }
}

/// Order as created by the gateway
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayOrder {
    /// Gateway order id, later echoed back as the confirmation token
    pub id: String,
    /// Gateway-side order status (e.g. `CREATED`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default)]
    pub links: Vec<GatewayLink>,
}

impl GatewayOrder {
    /// The buyer approval URL, if the gateway sent one.
    pub fn approval_url(&self) -> Option<&str> {
        self.links
            .iter()
            .find(|link| link.rel == APPROVE_REL)
            .map(|link| link.href.as_str())
    }
}

/// Outcome of a capture call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureResult {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// The gateway refused the capture because an earlier one went through
    #[serde(default)]
    pub already_captured: bool,
}

impl CaptureResult {
    pub fn new(status: impl Into<String>) -> Self {
        Self {
            status: status.into(),
            message: None,
            already_captured: false,
        }
    }

    /// An earlier capture of the same order succeeded; counts as completed.
    pub fn already_captured() -> Self {
        Self {
            already_captured: true,
            ..Self::new(CAPTURE_COMPLETED)
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn is_completed(&self) -> bool {
        self.status == CAPTURE_COMPLETED
    }
}

/// Payment provider operations used by the checkout workflow.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Create an order for `amount` and return its id and links.
    ///
    /// The buyer comes back to `return_url` (with `?token=<order id>`)
    /// after approving, or to `cancel_url` after abandoning.
    async fn create_order(
        &self,
        amount: &Money,
        return_url: &str,
        cancel_url: &str,
    ) -> PaymentResult<GatewayOrder>;

    /// Capture an approved order.
    ///
    /// A refusal because the order was already captured is reported as
    /// [`CaptureResult::already_captured`], not as a failure.
    async fn capture_order(&self, token: &str) -> PaymentResult<CaptureResult>;

    /// Get the provider name (for logging and the ledger's method column).
    fn provider_name(&self) -> &'static str;
}

/// Type alias for a shared gateway (dynamic dispatch)
pub type BoxedPaymentGateway = Arc<dyn PaymentGateway>;

/// Configuration for URLs the gateway sends the buyer back to
#[derive(Debug, Clone)]
pub struct CheckoutUrls {
    /// Base URL of the application (e.g., "https://academy.example")
    pub base_url: String,
    /// Success page path (e.g., "/checkout/success")
    pub success_path: String,
    /// Cancel page path (e.g., "/checkout/cancel")
    pub cancel_path: String,
}

impl CheckoutUrls {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            success_path: "/checkout/success".to_string(),
            cancel_path: "/checkout/cancel".to_string(),
        }
    }

    pub fn success_url(&self) -> String {
        format!("{}{}", self.base_url, self.success_path)
    }

    pub fn cancel_url(&self) -> String {
        format!("{}{}", self.base_url, self.cancel_path)
    }
}

impl Default for CheckoutUrls {
    fn default() -> Self {
        Self::new("http://localhost:8080")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checkout_urls() {
        let urls = CheckoutUrls::new("https://academy.example/");

        assert_eq!(urls.success_url(), "https://academy.example/checkout/success");
        assert_eq!(urls.cancel_url(), "https://academy.example/checkout/cancel");
    }

    #[test]
    fn test_approval_url_lookup() {
        let order = GatewayOrder {
            id: "PAY123".into(),
            status: Some("CREATED".into()),
            links: vec![
                GatewayLink::new("self", "https://gw/orders/PAY123"),
                GatewayLink::new("approve", "https://gw/approve/PAY123"),
            ],
        };
        assert_eq!(order.approval_url(), Some("https://gw/approve/PAY123"));

        let no_approve = GatewayOrder {
            links: vec![GatewayLink::new("self", "https://gw/orders/PAY123")],
            ..order
        };
        assert_eq!(no_approve.approval_url(), None);
    }

    #[test]
    fn test_capture_completed() {
        assert!(CaptureResult::new("COMPLETED").is_completed());
        assert!(!CaptureResult::new("FAILED").is_completed());
        assert!(!CaptureResult::new("completed").is_completed());
        assert!(CaptureResult::already_captured().is_completed());
    }
}
