/// Reason codes returned when a cancellation cannot be applied.
///
/// These map onto the refusal codes carried back to the prescribing system,
/// so the variants mirror that vocabulary rather than collapsing to a single
/// "cannot cancel" error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelRejection {
    PrescriptionNotFound,
    NotCancelledDispensed,
    NotCancelledNotDispensed,
    NotCancelledCancelled,
    NotCancelledExpired,
    NotCancelledWithDispenser,
    NotCancelledWithDispenserActive,
}

#[derive(Debug, thiserror::Error)]
pub enum EpsError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("mandatory item {0} missing")]
    MissingField(String),
    #[error("issue {0} not present on record")]
    IssueNotFound(u32),
    #[error("line item {0} not present on issue")]
    LineItemNotFound(String),
    #[error("line item status change {from} -> {to} is not permitted")]
    InvalidLineStateTransition { from: String, to: String },
    #[error("line item repeat count does not match the prescription")]
    MaxRepeatMismatch,
    #[error("record consistency check failure")]
    ConsistencyCheckFailure,
    #[error("unrecognised status code: {0}")]
    Code(#[from] eps_types::CodeError),
    #[error("prescription id error: {0}")]
    Id(#[from] eps_id::IdError),
    #[error("invalid date value: {0}")]
    InvalidDate(String),

    #[error("message failure: {0}")]
    MessageFailure(String),
    #[error("system failure: {0}")]
    SystemFailure(String),
    #[error("update conflict, message should be requeued: {0}")]
    ImmediateRequeue(String),
    #[error("development failure: {0}")]
    DevelopmentFailure(String),

    #[error("failed to read configuration: {0}")]
    ConfigRead(std::io::Error),
    #[error("failed to deserialize YAML: {0}")]
    YamlDeserialization(serde_yaml::Error),
    #[error("failed to serialize record: {0}")]
    Serialization(serde_json::Error),
    #[error("failed to deserialize record: {0}")]
    Deserialization(serde_json::Error),
}

pub type EpsResult<T> = std::result::Result<T, EpsError>;
