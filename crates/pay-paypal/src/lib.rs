//! # pay-paypal
//!
//! PayPal gateway for paypal-checkout-rs.
//!
//! `PayPalGateway` implements `pay_core::PaymentGateway` on top of the
//! PayPal Orders v2 REST API:
//!
//! - `create_order` posts a `CAPTURE` order and returns its approval link
//! - `capture_order` captures the order once the buyer is back
//!
//! Credentials come from `PAYPAL_CLIENT_ID` / `PAYPAL_CLIENT_SECRET`;
//! `PAYPAL_MODE` picks sandbox or live.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use pay_paypal::PayPalGateway;
//! use pay_core::PaymentGateway;
//!
//! let gateway = PayPalGateway::from_env()?;
//!
//! let order = gateway
//!     .create_order(&amount, "https://example.com/checkout/success", "https://example.com/checkout/cancel")
//!     .await?;
//!
//! // Redirect the buyer to order.approval_url()
//! ```

pub mod config;
pub mod orders;

// Re-exports
pub use config::{PayPalConfig, PayPalMode};
pub use orders::PayPalGateway;
