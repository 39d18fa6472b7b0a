/// Errors raised by the prescription datastore.
///
/// Conflict outcomes are distinct variants because callers react to them
/// differently: a duplicate insert is a business reject, while a stale SCN
/// on update means the message lost a race and should be requeued.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("item already exists: {0}")]
    Duplicate(String),
    #[error("conditional update failed for {0}, stored item is newer")]
    ConditionalUpdateFailure(String),
    #[error("record missing: {0}")]
    MissingRecord(String),
    #[error("record present but empty: {0}")]
    EmptyRecord(String),
    #[error("invalid store access: {0}")]
    AccessError(String),
    #[error("invalid date value: {0}")]
    InvalidDate(String),
    #[error("failed to serialize record: {0}")]
    Serialization(serde_json::Error),
    #[error("failed to deserialize record: {0}")]
    Deserialization(serde_json::Error),
    #[error("record operation failed: {0}")]
    Core(#[from] eps_core::EpsError),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

impl From<StoreError> for eps_core::EpsError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::ConditionalUpdateFailure(key) => {
                eps_core::EpsError::ImmediateRequeue(format!("stale update for {key}"))
            }
            StoreError::Core(inner) => inner,
            other => eps_core::EpsError::SystemFailure(other.to_string()),
        }
    }
}
