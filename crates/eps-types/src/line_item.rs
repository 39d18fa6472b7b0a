use crate::{CodeError, PrescriptionStatus};

/// Line item status within a prescription issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LineItemStatus {
    FullyDispensed,
    NotDispensed,
    PartialDispensed,
    NotDispensedOwing,
    Cancelled,
    Expired,
    ToBeDispensed,
    WithDispenser,
}

impl LineItemStatus {
    pub const ALL: [LineItemStatus; 8] = [
        LineItemStatus::FullyDispensed,
        LineItemStatus::NotDispensed,
        LineItemStatus::PartialDispensed,
        LineItemStatus::NotDispensedOwing,
        LineItemStatus::Cancelled,
        LineItemStatus::Expired,
        LineItemStatus::ToBeDispensed,
        LineItemStatus::WithDispenser,
    ];

    pub fn code(&self) -> &'static str {
        match self {
            LineItemStatus::FullyDispensed => "0001",
            LineItemStatus::NotDispensed => "0002",
            LineItemStatus::PartialDispensed => "0003",
            LineItemStatus::NotDispensedOwing => "0004",
            LineItemStatus::Cancelled => "0005",
            LineItemStatus::Expired => "0006",
            LineItemStatus::ToBeDispensed => "0007",
            LineItemStatus::WithDispenser => "0008",
        }
    }

    pub fn from_code(code: &str) -> Result<Self, CodeError> {
        LineItemStatus::ALL
            .iter()
            .find(|status| status.code() == code)
            .copied()
            .ok_or_else(|| CodeError::Unrecognised(code.to_owned()))
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            LineItemStatus::FullyDispensed => "Item fully dispensed",
            LineItemStatus::NotDispensed => "Item not dispensed",
            LineItemStatus::PartialDispensed => "Item dispensed - partial",
            LineItemStatus::NotDispensedOwing => "Item not dispensed owing",
            LineItemStatus::Cancelled => "Item Cancelled",
            LineItemStatus::Expired => "Expired",
            LineItemStatus::ToBeDispensed => "To Be Dispensed",
            LineItemStatus::WithDispenser => "Item with dispenser",
        }
    }

    pub fn is_cancellable(&self) -> bool {
        matches!(self, LineItemStatus::ToBeDispensed)
    }

    pub fn is_with_dispenser(&self) -> bool {
        matches!(
            self,
            LineItemStatus::WithDispenser | LineItemStatus::PartialDispensed
        )
    }

    /// An item still in play: further dispensing events can change it.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            LineItemStatus::ToBeDispensed
                | LineItemStatus::WithDispenser
                | LineItemStatus::PartialDispensed
                | LineItemStatus::NotDispensedOwing
        )
    }

    pub fn includes_performer(&self) -> bool {
        matches!(
            self,
            LineItemStatus::WithDispenser
                | LineItemStatus::PartialDispensed
                | LineItemStatus::FullyDispensed
                | LineItemStatus::NotDispensed
                | LineItemStatus::NotDispensedOwing
        )
    }

    /// Item statuses an expiry pass must not touch.
    pub fn is_expiry_immutable(&self) -> bool {
        matches!(
            self,
            LineItemStatus::FullyDispensed
                | LineItemStatus::NotDispensed
                | LineItemStatus::Expired
                | LineItemStatus::Cancelled
        )
    }

    /// The terminal status an expiry moves this item to, where one exists.
    ///
    /// Partially dispensed items settle as fully dispensed, owing items as
    /// not dispensed.
    pub fn expiry_status(&self) -> Option<LineItemStatus> {
        match self {
            LineItemStatus::ToBeDispensed | LineItemStatus::WithDispenser => {
                Some(LineItemStatus::Expired)
            }
            LineItemStatus::PartialDispensed => Some(LineItemStatus::FullyDispensed),
            LineItemStatus::NotDispensedOwing => Some(LineItemStatus::NotDispensed),
            _ => None,
        }
    }

    /// The item statuses permitted while the owning issue holds the given
    /// status. Returns the empty slice for issue statuses with no items
    /// (pending cancellation before receipt).
    pub fn valid_states_for(issue_status: PrescriptionStatus) -> &'static [LineItemStatus] {
        use LineItemStatus::*;
        match issue_status {
            PrescriptionStatus::AwaitingReleaseReady
            | PrescriptionStatus::ToBeDispensed
            | PrescriptionStatus::RepeatDispenseFutureInstance
            | PrescriptionStatus::FutureDatedPrescription => {
                &[Cancelled, Expired, ToBeDispensed]
            }
            PrescriptionStatus::WithDispenser => &[Cancelled, Expired, WithDispenser],
            PrescriptionStatus::WithDispenserActive => &[
                FullyDispensed,
                NotDispensed,
                PartialDispensed,
                NotDispensedOwing,
                Cancelled,
                Expired,
                WithDispenser,
            ],
            PrescriptionStatus::Expired | PrescriptionStatus::Cancelled => &[Cancelled, Expired],
            PrescriptionStatus::Dispensed
            | PrescriptionStatus::Claimed
            | PrescriptionStatus::NoClaimed => &[FullyDispensed, NotDispensed, Cancelled, Expired],
            PrescriptionStatus::NotDispensed => &[NotDispensed, Cancelled, Expired],
            PrescriptionStatus::PendingCancellation => &[],
        }
    }
}

impl std::fmt::Display for LineItemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code())
    }
}

impl std::str::FromStr for LineItemStatus {
    type Err = CodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        LineItemStatus::from_code(s)
    }
}

impl serde::Serialize for LineItemStatus {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.code())
    }
}

impl<'de> serde::Deserialize<'de> for LineItemStatus {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let code = String::deserialize(deserializer)?;
        LineItemStatus::from_code(&code).map_err(serde::de::Error::custom)
    }
}
