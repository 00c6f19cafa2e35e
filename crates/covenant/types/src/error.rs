use thiserror::Error;

/// Result type for engine operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Error taxonomy surfaced by every engine operation.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("external service error: {0}")]
    ExternalService(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("operation cancelled")]
    Cancelled,
}

impl CoreError {
    /// Short machine-readable reason code, used in audit payloads.
    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::Forbidden(_) => "forbidden",
            Self::Validation(_) => "validation",
            Self::Conflict(_) => "conflict",
            Self::ExternalService(_) => "external_service",
            Self::Storage(_) => "storage",
            Self::Cancelled => "cancelled",
        }
    }
}
