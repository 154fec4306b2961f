use thiserror::Error;

pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Error, Debug)]
pub enum PipelineError {
    /// Gateway or issuance call failed in a way that is worth retrying.
    #[error("transient gateway error: {0}")]
    TransientGateway(String),
    /// Gateway rejected the operation permanently; surfaced to the user.
    #[error("permanent gateway error: {0}")]
    PermanentGateway(String),
    /// Referenced application or order does not exist.
    #[error("not found: {0}")]
    NotFound(String),
    /// Event was already processed; callers treat this as a no-op.
    #[error("duplicate event: {0}")]
    DuplicateEvent(String),
    /// The idempotency ledger itself could not be written. Handlers fail
    /// open on this variant and raise an operational alert.
    #[error("idempotency ledger write failed: {0}")]
    LedgerWrite(String),
    #[error("validation error: {0}")]
    Validation(String),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl PipelineError {
    /// Whether a failed outbound call may be retried by the recovery
    /// scheduler or the worker pool.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientGateway(_))
    }
}

#[cfg(feature = "storage-rocksdb")]
impl From<rocksdb::Error> for PipelineError {
    fn from(e: rocksdb::Error) -> Self {
        Self::Storage(e.to_string())
    }
}
