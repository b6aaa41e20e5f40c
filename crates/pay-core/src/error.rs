//! # Payment Error Types
//!
//! Typed error handling for the checkout workflow.
//! All payment operations return `Result<T, PaymentError>`.

use thiserror::Error;

/// Shown to the user when an error carries nothing presentable.
pub const GENERIC_ERROR_MESSAGE: &str = "Something went wrong.";

/// Core error type for all payment operations
#[derive(Debug, Error)]
pub enum PaymentError {
    /// Configuration errors (missing keys, invalid config)
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Invalid request data
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The gateway rejected the call or answered with something unusable
    #[error("Gateway error: {message}")]
    GatewayError { message: String },

    /// Network/HTTP error communicating with the gateway
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Capture finished with a status other than success
    #[error("Payment not completed (status {status})")]
    PaymentNotCompleted {
        status: String,
        message: Option<String>,
    },

    /// Confirmation for an order this service never initiated
    #[error("Payment record not found: {transaction_id}")]
    RecordNotFound { transaction_id: String },

    /// Checkout details incomplete or referencing a missing entity
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Persistence failure
    #[error("Database error: {0}")]
    Database(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Internal error (should not happen)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl PaymentError {
    /// Shorthand for a gateway failure with the given message.
    pub fn gateway(message: impl Into<String>) -> Self {
        PaymentError::GatewayError {
            message: message.into(),
        }
    }

    /// Returns true if the same call may succeed when simply repeated
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PaymentError::NetworkError(_) | PaymentError::Database(_)
        )
    }

    /// Message suitable for flashing back to the user.
    ///
    /// Gateway and validation messages are passed through; anything that
    /// could leak internals collapses to [`GENERIC_ERROR_MESSAGE`].
    pub fn user_message(&self) -> String {
        match self {
            PaymentError::GatewayError { message } if !message.trim().is_empty() => {
                message.clone()
            }
            PaymentError::PaymentNotCompleted {
                message: Some(message),
                ..
            } if !message.trim().is_empty() => message.clone(),
            PaymentError::InvalidRequest(msg) | PaymentError::Validation(msg) => msg.clone(),
            PaymentError::RecordNotFound { .. } => "Payment not found.".to_string(),
            PaymentError::NetworkError(_) => {
                "The payment provider could not be reached. Please try again.".to_string()
            }
            _ => GENERIC_ERROR_MESSAGE.to_string(),
        }
    }
}

/// Result type alias for payment operations
pub type PaymentResult<T> = Result<T, PaymentError>;
