// Error taxonomy for the command pipeline
// One enum per stage; CommandError is what crosses the pipeline boundary.

use std::time::Duration;
use thiserror::Error;

// ============================================================================
// COMPLETION PROVIDER / GATEWAY
// ============================================================================

/// Failure of a single provider attempt. Every variant feeds the retry loop.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("provider returned HTTP {status}: {body}")]
    Api { status: u16, body: String },

    #[error("provider attempt timed out after {0:?}")]
    Timeout(Duration),

    #[error("invalid provider response: {0}")]
    InvalidResponse(String),

    #[error("{0}")]
    Other(String),
}

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("AI call failed after {attempts} attempts: {last}")]
    ExhaustedRetries {
        attempts: u32,
        #[source]
        last: ProviderError,
    },

    #[error("Empty AI response")]
    EmptyResponse,

    #[error("Command cancelled before completion")]
    Cancelled,
}

// ============================================================================
// PARSING / RESOLUTION / EXECUTION
// ============================================================================

/// A grammar rule matched but one of its captured values failed coercion.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("Invalid payment amount format: {0}")]
    InvalidAmountFormat(String),

    #[error("Invalid date format: {0}")]
    InvalidDateFormat(String),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ResolutionError {
    #[error("Borrower \"{0}\" not found.")]
    BorrowerNotFound(String),

    #[error("Loan \"{0}\" not found for borrower.")]
    LoanNotFound(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    /// The store refused the write (schema validation or loan-total invariant).
    #[error("{0}")]
    Rejected(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("record store lock poisoned")]
    Poisoned,
}

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("Payment not found")]
    PaymentNotFound,

    /// Passed through unchanged from the record store.
    #[error("{0}")]
    InvariantViolation(String),

    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for ExecutionError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Rejected(message) => ExecutionError::InvariantViolation(message),
            other => ExecutionError::Store(other),
        }
    }
}

// ============================================================================
// PIPELINE BOUNDARY
// ============================================================================

#[derive(Debug, Error)]
pub enum CommandError {
    #[error(transparent)]
    Generation(#[from] GenerationError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for CommandError {
    fn from(err: StoreError) -> Self {
        CommandError::Execution(err.into())
    }
}

impl CommandError {
    /// Errors reported by the executor stage (parse, resolve, mutate) rather
    /// than by the provider or the runtime.
    pub fn is_execution_failure(&self) -> bool {
        match self {
            CommandError::Validation(_) | CommandError::Resolution(_) => true,
            CommandError::Execution(ExecutionError::Store(_)) => false,
            CommandError::Execution(_) => true,
            CommandError::Generation(_) | CommandError::Internal(_) => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            CommandError::Resolution(_) | CommandError::Execution(ExecutionError::PaymentNotFound)
        )
    }
}
