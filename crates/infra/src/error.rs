use thiserror::Error;

use batchstore_core::DomainError;

use crate::store::StoreError;

/// Error raised by the repository layer.
///
/// ## Propagation
///
/// - `Validation` and `UniquenessViolation` are raised before any write.
/// - `ConcurrencyConflict` is surfaced as-is; nothing in this crate retries
///   or merges.
/// - `Store` wraps the backing store error unchanged. Use
///   [`RepositoryError::is_transient`] to decide whether a retry is safe.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// A required field is missing or an entity is in the wrong state for the
    /// requested operation.
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// A conditional update matched no document: the caller's version is stale.
    #[error("concurrency conflict on {entity} {id}: expected version {expected}, stored {actual:?}")]
    ConcurrencyConflict {
        entity: &'static str,
        id: i64,
        expected: u32,
        /// Version found by a follow-up read, `None` if the document is gone.
        actual: Option<u32>,
    },

    #[error("uniqueness violation: {0}")]
    UniquenessViolation(String),

    /// A value or key could not be encoded or restored.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// Stored data contradicts an invariant the repository relies on.
    #[error("inconsistent stored state: {0}")]
    Inconsistency(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl RepositoryError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn encoding(msg: impl Into<String>) -> Self {
        Self::Encoding(msg.into())
    }

    pub fn inconsistency(msg: impl Into<String>) -> Self {
        Self::Inconsistency(msg.into())
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, RepositoryError::Store(e) if e.is_transient())
    }
}

impl From<DomainError> for RepositoryError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::Validation(msg) | DomainError::InvalidId(msg) => Self::Validation(msg),
            unknown @ DomainError::UnknownStatus(_) => Self::Encoding(unknown.to_string()),
        }
    }
}

pub type RepositoryResult<T> = Result<T, RepositoryError>;
