//! Error types for budget allocation.

use thiserror::Error;

/// Type alias for Result using the allocation error type.
pub type Result<T> = std::result::Result<T, AllocationError>;

/// Everything that can stop an allocation from being produced.
///
/// Errors are reported synchronously; a failed call never returns a partial
/// allocation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AllocationError {
    #[error("Budget must be a finite non-negative number, got {0}")]
    InvalidBudget(f64),

    #[error("No channels provided")]
    NoChannels,

    #[error("Invalid channel '{channel}': {reason}")]
    InvalidChannel { channel: String, reason: String },

    #[error(
        "Channel bounds cannot be satisfied within budget {budget}: \
         minimum spend {minimum}, maximum spend {maximum}"
    )]
    InfeasibleConstraints {
        minimum: f64,
        maximum: f64,
        budget: f64,
    },

    #[error("Invalid optimizer configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid response curve: {0}")]
    InvalidCurve(String),

    #[error("Response of channel '{channel}' is not finite at spend {spend}")]
    NonFiniteResponse { channel: String, spend: f64 },

    #[error("Optimizer did not converge after {iterations} iterations")]
    NonConvergence { iterations: usize },
}

impl AllocationError {
    pub(crate) fn invalid_channel(channel: &str, reason: impl Into<String>) -> Self {
        Self::InvalidChannel {
            channel: channel.to_string(),
            reason: reason.into(),
        }
    }
}
