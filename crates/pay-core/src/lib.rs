//! # pay-core
//!
//! Core types and traits for the PayPal checkout service.
//!
//! This crate provides:
//! - `PaymentGateway` trait for the payment provider's order/capture API
//! - `PendingCheckout` and `Payable` for checkout intent
//! - `PaymentLedger`, `LedgerTransaction` and `CheckoutStore` for persistence
//! - `FulfillmentHandler` implementations for certificates and subscriptions
//! - `CheckoutWorkflow` tying them together (initiate / confirm / cancel)
//! - `PaymentError` for typed error handling
//!
//! ## Example
//!
//! ```rust,ignore
//! use pay_core::{CheckoutWorkflow, PendingCheckout};
//!
//! let workflow = CheckoutWorkflow::new(gateway, ledger, checkouts, urls);
//!
//! // Send the buyer to the gateway
//! let initiated = workflow
//!     .initiate(user_id, PendingCheckout::certificate(dec, challenge_id))
//!     .await?;
//! // redirect to initiated.approval_url
//!
//! // Buyer returns with ?token=<order id>
//! let outcome = workflow.confirm(&token).await?;
//! ```

pub mod checkout;
pub mod error;
pub mod fulfillment;
pub mod gateway;
pub mod ledger;
pub mod memory;
pub mod money;
pub mod workflow;

// Re-exports for convenience
pub use checkout::{Payable, PayableType, PendingCheckout};
pub use error::{PaymentError, PaymentResult, GENERIC_ERROR_MESSAGE};
pub use fulfillment::{
    handler_for, CertificateFulfillment, FulfillmentHandler, SubscriptionFulfillment,
};
pub use gateway::{
    BoxedPaymentGateway, CaptureResult, CheckoutUrls, GatewayLink, GatewayOrder, PaymentGateway,
    APPROVE_REL, CAPTURE_COMPLETED,
};
pub use ledger::{
    Artifact, Certificate, CheckoutStore, LedgerTransaction, NewCertificate, NewPaymentRecord,
    NewSubscription, PaymentLedger, PaymentRecord, PaymentStatus, SharedCheckoutStore,
    SharedLedger, Subscription,
};
pub use money::{Currency, Money};
pub use workflow::{
    CheckoutWorkflow, ConfirmOutcome, InitiatedCheckout, CANCELLED_MESSAGE, SUCCESS_MESSAGE,
};
