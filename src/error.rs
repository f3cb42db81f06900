//! Error taxonomy shared by the store, the service and the HTTP server.
//!
//! Errors travel as `eyre::Report`; a `FlowError` inside the report decides
//! the status a caller sees. Anything else is an internal failure.

use crate::types::ValidationError;

/// Errors that can occur while serving flows.
#[derive(Debug)]
pub enum FlowError {
    /// Missing, invalid or expired credential.
    Unauthenticated(String),
    /// Field validation failed.
    Validation(ValidationError),
    /// A required request field was absent.
    MissingField(&'static str),
    /// Cursor could not be decoded.
    InvalidCursor,
    /// Flow absent or not owned by the caller.
    NotFound(String),
    /// Conditional write saw a different version.
    VersionConflict { expected: u64, actual: u64 },
    /// Backing store timed out or is unreachable. Safe to retry.
    StoreUnavailable(String),
}

impl std::fmt::Display for FlowError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FlowError::Unauthenticated(reason) => write!(f, "unauthenticated: {}", reason),
            FlowError::Validation(e) => write!(f, "validation error: {}", e),
            FlowError::MissingField(field) => write!(f, "missing required field: {}", field),
            FlowError::InvalidCursor => write!(f, "invalid cursor"),
            FlowError::NotFound(id) => write!(f, "flow not found: {}", id),
            FlowError::VersionConflict { expected, actual } => {
                write!(f, "version conflict: expected {}, found {}", expected, actual)
            }
            FlowError::StoreUnavailable(reason) => write!(f, "store unavailable: {}", reason),
        }
    }
}

impl std::error::Error for FlowError {}

impl From<ValidationError> for FlowError {
    fn from(e: ValidationError) -> Self {
        FlowError::Validation(e)
    }
}

impl FlowError {
    /// HTTP status for this error.
    pub fn status(&self) -> u16 {
        match self {
            FlowError::Unauthenticated(_) => 401,
            FlowError::Validation(_) | FlowError::MissingField(_) | FlowError::InvalidCursor => 400,
            FlowError::NotFound(_) => 404,
            FlowError::VersionConflict { .. } => 409,
            FlowError::StoreUnavailable(_) => 500,
        }
    }

    /// Whether the caller may retry the same request unchanged.
    pub fn is_transient(&self) -> bool {
        matches!(self, FlowError::StoreUnavailable(_))
    }
}

/// Find the `FlowError` inside a report, if there is one.
pub fn flow_error(report: &eyre::Report) -> Option<&FlowError> {
    report.chain().find_map(|cause| cause.downcast_ref::<FlowError>())
}

/// Status and public message for a report. Internal details stay out of
/// 500 responses.
pub fn classify(report: &eyre::Report) -> (u16, String) {
    match flow_error(report) {
        Some(FlowError::StoreUnavailable(_)) => (500, "store temporarily unavailable".to_string()),
        Some(e) => (e.status(), e.to_string()),
        None => (500, "internal error".to_string()),
    }
}
