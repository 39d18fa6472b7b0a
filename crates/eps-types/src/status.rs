use crate::CodeError;

/// Prescription issue status.
///
/// Each status has a fixed four-character wire code; the enum serialises to
/// that code. State-family predicates mirror the lifecycle rules: a status
/// is either awaiting action, with a dispenser, completed, or scheduled for
/// a future issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PrescriptionStatus {
    AwaitingReleaseReady,
    ToBeDispensed,
    WithDispenser,
    WithDispenserActive,
    Expired,
    Cancelled,
    Dispensed,
    NotDispensed,
    Claimed,
    NoClaimed,
    RepeatDispenseFutureInstance,
    FutureDatedPrescription,
    PendingCancellation,
}

impl PrescriptionStatus {
    pub const ALL: [PrescriptionStatus; 13] = [
        PrescriptionStatus::AwaitingReleaseReady,
        PrescriptionStatus::ToBeDispensed,
        PrescriptionStatus::WithDispenser,
        PrescriptionStatus::WithDispenserActive,
        PrescriptionStatus::Expired,
        PrescriptionStatus::Cancelled,
        PrescriptionStatus::Dispensed,
        PrescriptionStatus::NotDispensed,
        PrescriptionStatus::Claimed,
        PrescriptionStatus::NoClaimed,
        PrescriptionStatus::RepeatDispenseFutureInstance,
        PrescriptionStatus::FutureDatedPrescription,
        PrescriptionStatus::PendingCancellation,
    ];

    /// The four-character wire code for this status.
    pub fn code(&self) -> &'static str {
        match self {
            PrescriptionStatus::AwaitingReleaseReady => "0000",
            PrescriptionStatus::ToBeDispensed => "0001",
            PrescriptionStatus::WithDispenser => "0002",
            PrescriptionStatus::WithDispenserActive => "0003",
            PrescriptionStatus::Expired => "0004",
            PrescriptionStatus::Cancelled => "0005",
            PrescriptionStatus::Dispensed => "0006",
            PrescriptionStatus::NotDispensed => "0007",
            PrescriptionStatus::Claimed => "0008",
            PrescriptionStatus::NoClaimed => "0009",
            PrescriptionStatus::RepeatDispenseFutureInstance => "9000",
            PrescriptionStatus::FutureDatedPrescription => "9001",
            PrescriptionStatus::PendingCancellation => "9005",
        }
    }

    /// Decode a wire code.
    pub fn from_code(code: &str) -> Result<Self, CodeError> {
        PrescriptionStatus::ALL
            .iter()
            .find(|status| status.code() == code)
            .copied()
            .ok_or_else(|| CodeError::Unrecognised(code.to_owned()))
    }

    /// Human-readable status name.
    pub fn display_name(&self) -> &'static str {
        match self {
            PrescriptionStatus::AwaitingReleaseReady => "Awaiting Release Ready",
            PrescriptionStatus::ToBeDispensed => "To Be Dispensed",
            PrescriptionStatus::WithDispenser => "With Dispenser",
            PrescriptionStatus::WithDispenserActive => "With Dispenser - Active",
            PrescriptionStatus::Expired => "Expired",
            PrescriptionStatus::Cancelled => "Cancelled",
            PrescriptionStatus::Dispensed => "Dispensed",
            PrescriptionStatus::NotDispensed => "Not Dispensed",
            PrescriptionStatus::Claimed => "Claimed",
            PrescriptionStatus::NoClaimed => "No-Claimed",
            PrescriptionStatus::RepeatDispenseFutureInstance => {
                "Repeat Dispense future instance"
            }
            PrescriptionStatus::FutureDatedPrescription => "Prescription future instance",
            PrescriptionStatus::PendingCancellation => "Cancelled future instance",
        }
    }

    /// Statuses from which a cancellation can be applied directly.
    pub fn is_cancellable(&self) -> bool {
        matches!(
            self,
            PrescriptionStatus::AwaitingReleaseReady
                | PrescriptionStatus::ToBeDispensed
                | PrescriptionStatus::RepeatDispenseFutureInstance
                | PrescriptionStatus::FutureDatedPrescription
        )
    }

    pub fn is_with_dispenser(&self) -> bool {
        matches!(
            self,
            PrescriptionStatus::WithDispenser | PrescriptionStatus::WithDispenserActive
        )
    }

    /// An issue currently live in the dispensing workflow.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            PrescriptionStatus::AwaitingReleaseReady
                | PrescriptionStatus::ToBeDispensed
                | PrescriptionStatus::WithDispenser
                | PrescriptionStatus::WithDispenserActive
        )
    }

    /// An issue scheduled for the future, not yet actionable.
    pub fn is_future(&self) -> bool {
        matches!(
            self,
            PrescriptionStatus::FutureDatedPrescription
                | PrescriptionStatus::RepeatDispenseFutureInstance
        )
    }

    /// Terminal states: nothing further happens to the issue except deletion.
    pub fn is_completed(&self) -> bool {
        matches!(
            self,
            PrescriptionStatus::Expired
                | PrescriptionStatus::Cancelled
                | PrescriptionStatus::Dispensed
                | PrescriptionStatus::NotDispensed
                | PrescriptionStatus::Claimed
                | PrescriptionStatus::NoClaimed
        )
    }

    /// Statuses whose details include the dispensing performer.
    pub fn includes_performer(&self) -> bool {
        matches!(
            self,
            PrescriptionStatus::WithDispenser
                | PrescriptionStatus::WithDispenserActive
                | PrescriptionStatus::Dispensed
                | PrescriptionStatus::NotDispensed
                | PrescriptionStatus::Claimed
                | PrescriptionStatus::NoClaimed
        )
    }

    /// Statuses an expiry pass must not touch.
    pub fn is_expiry_immutable(&self) -> bool {
        self.is_completed()
    }

    /// Statuses on which no dispensing action has yet been taken.
    pub fn is_unactioned(&self) -> bool {
        matches!(
            self,
            PrescriptionStatus::AwaitingReleaseReady
                | PrescriptionStatus::ToBeDispensed
                | PrescriptionStatus::WithDispenser
                | PrescriptionStatus::RepeatDispenseFutureInstance
                | PrescriptionStatus::PendingCancellation
        )
    }

    /// The terminal status an expiry moves this status to, where one exists.
    ///
    /// A part-dispensed issue expires to `Dispensed`; every other expirable
    /// status expires to `Expired`.
    pub fn expiry_status(&self) -> Option<PrescriptionStatus> {
        match self {
            PrescriptionStatus::AwaitingReleaseReady
            | PrescriptionStatus::ToBeDispensed
            | PrescriptionStatus::WithDispenser
            | PrescriptionStatus::RepeatDispenseFutureInstance
            | PrescriptionStatus::FutureDatedPrescription
            | PrescriptionStatus::PendingCancellation => Some(PrescriptionStatus::Expired),
            PrescriptionStatus::WithDispenserActive => Some(PrescriptionStatus::Dispensed),
            _ => None,
        }
    }
}

impl std::fmt::Display for PrescriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code())
    }
}

impl std::str::FromStr for PrescriptionStatus {
    type Err = CodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PrescriptionStatus::from_code(s)
    }
}

impl serde::Serialize for PrescriptionStatus {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.code())
    }
}

impl<'de> serde::Deserialize<'de> for PrescriptionStatus {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let code = String::deserialize(deserializer)?;
        PrescriptionStatus::from_code(&code).map_err(serde::de::Error::custom)
    }
}
