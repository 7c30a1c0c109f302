//! Paywall Error Types

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, PaywallError>;

/// Paywall-related errors
///
/// Business-ambiguity cases (unhandled event type, unresolvable identity)
/// are deliberately not errors: they surface as acknowledged webhook
/// outcomes so the payment provider does not retry them.
#[derive(Error, Debug)]
pub enum PaywallError {
    /// Caller sent an unusable request (missing or invalid identity)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Webhook signature verification failed
    #[error("Webhook signature invalid: {0}")]
    SignatureInvalid(String),

    /// Webhook payload parsing failed after a valid signature
    #[error("Webhook payload invalid: {0}")]
    PayloadParse(String),

    /// Payment provider rejected a request or is unreachable
    #[error("Payment provider error: {0}")]
    Upstream(String),

    /// Key-value store error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl PaywallError {
    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, PaywallError::Upstream(_) | PaywallError::Storage(_))
    }

    /// Get user-friendly message
    pub fn user_message(&self) -> &str {
        match self {
            PaywallError::InvalidRequest(_) => "Request could not be processed. Reload and try again.",
            PaywallError::SignatureInvalid(_) => "Request signature could not be verified.",
            PaywallError::Upstream(_) => "Payment processing failed. Please try again.",
            PaywallError::Config(_) => "Service configuration error.",
            _ => "An error occurred processing your request.",
        }
    }
}
