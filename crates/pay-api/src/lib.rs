//! # pay-api
//!
//! HTTP API layer for paypal-checkout-rs.
//!
//! This crate provides:
//! - Axum-based HTTP server
//! - Browser redirects into and back from PayPal
//! - Flash-cookie notices for the page the buyer lands on
//!
//! ## Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | GET | `/health` | Health check |
//! | POST | `/checkout/start` | Create order, redirect to PayPal |
//! | GET | `/checkout/success` | PayPal return URL |
//! | GET | `/checkout/cancel` | PayPal cancel URL |
//! | GET | `/flash` | Read and clear the flash message |

pub mod handlers;
pub mod routes;
pub mod state;
pub mod sweep;

pub use routes::create_router;
pub use state::{AppConfig, AppState};
