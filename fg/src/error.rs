//! Flow control error types

use thiserror::Error;

use crate::fairqueue::RejectReason;

/// Errors that can occur while classifying or admitting requests
#[derive(Debug, Error)]
pub enum FlowControlError {
    #[error("Invalid configuration for {object}: {message}")]
    Configuration { object: String, message: String },

    #[error("No flow schema matched the request and no catch-all is configured")]
    NoMatchingFlowSchema,

    #[error("Priority level not found: {name}")]
    UnknownPriorityLevel { name: String },

    #[error("All queues in the hand are full for priority level {priority_level}")]
    QueueFull { priority_level: String },

    #[error("Request was cancelled before a decision was made")]
    Cancelled,

    #[error("Request rejected at priority level {priority_level}: {reason}")]
    Rejected { priority_level: String, reason: RejectReason },

    #[error("Request {request_id} released more than once at priority level {priority_level}")]
    DoubleRelease { priority_level: String, request_id: u64 },

    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

impl FlowControlError {
    /// Shorthand for a configuration error against a named object
    pub fn configuration(object: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Configuration {
            object: object.into(),
            message: message.into(),
        }
    }

    /// Configuration problems an operator has to fix
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            FlowControlError::Configuration { .. }
                | FlowControlError::NoMatchingFlowSchema
                | FlowControlError::UnknownPriorityLevel { .. }
        )
    }

    /// Accounting invariant violations
    pub fn is_invariant_violation(&self) -> bool {
        matches!(self, FlowControlError::DoubleRelease { .. })
    }

    /// Expected outcomes the caller recovers from locally
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            FlowControlError::QueueFull { .. } | FlowControlError::Cancelled | FlowControlError::Rejected { .. }
        )
    }
}

/// Result type for flow control operations
pub type FlowControlResult<T> = Result<T, FlowControlError>;
