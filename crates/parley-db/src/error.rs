use thiserror::Error;

pub type StoreResult<T> = Result<T, StoreError>;

/// Failures scoped to a single store operation. None of them leave partial
/// writes behind.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Malformed or policy-violating input
    #[error("Validation error: {0}")]
    Validation(String),

    /// The actor does not own the record they tried to mutate
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Database lock poisoned")]
    LockPoisoned,
}
