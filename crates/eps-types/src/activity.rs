use crate::CodeError;

/// A scheduled system activity against a prescription record.
///
/// Activities are persisted by name in the next-activity index, so the
/// `Display`/`FromStr` forms are part of the storage contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Activity {
    /// Expire the issue once its validity window has passed
    Expire,
    /// A nominated release window opens
    Ready,
    /// Synthesise a no-claim closure for an unclaimed dispense
    CreateNoClaim,
    /// Remove the record once its retention period has passed
    Delete,
    /// Remove the record immediately at the scheduled date
    Purge,
    /// Make a future issue available for nominated download
    NominatedDownload,
}

/// Activities that win when two fall due on the same date. Patient-visible
/// activities take precedence over housekeeping.
pub const USER_IMPACTING_ACTIVITY: [Activity; 1] = [Activity::Ready];

impl Activity {
    pub const ALL: [Activity; 6] = [
        Activity::Expire,
        Activity::Ready,
        Activity::CreateNoClaim,
        Activity::Delete,
        Activity::Purge,
        Activity::NominatedDownload,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Activity::Expire => "Expire",
            Activity::Ready => "Ready",
            Activity::CreateNoClaim => "CreateNoClaim",
            Activity::Delete => "Delete",
            Activity::Purge => "Purge",
            Activity::NominatedDownload => "NominatedDownload",
        }
    }

    pub fn from_name(name: &str) -> Result<Self, CodeError> {
        Activity::ALL
            .iter()
            .find(|activity| activity.name() == name)
            .copied()
            .ok_or_else(|| CodeError::Unrecognised(name.to_owned()))
    }
}

impl std::fmt::Display for Activity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for Activity {
    type Err = CodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Activity::from_name(s)
    }
}

impl serde::Serialize for Activity {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.name())
    }
}

impl<'de> serde::Deserialize<'de> for Activity {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let name = String::deserialize(deserializer)?;
        Activity::from_name(&name).map_err(serde::de::Error::custom)
    }
}

/// An action requested against a record, either because a scheduled
/// activity fell due or through an administrative instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordAction {
    Delete,
    NominatedDownload,
    Expire,
    CreateNoClaim,
    ResetCurrentInstance,
    DispenseReset,
    ApplyPendingCancellations,
    ResetNextActivity,
}

impl RecordAction {
    pub const ALL: [RecordAction; 8] = [
        RecordAction::Delete,
        RecordAction::NominatedDownload,
        RecordAction::Expire,
        RecordAction::CreateNoClaim,
        RecordAction::ResetCurrentInstance,
        RecordAction::DispenseReset,
        RecordAction::ApplyPendingCancellations,
        RecordAction::ResetNextActivity,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            RecordAction::Delete => "Delete",
            RecordAction::NominatedDownload => "NominatedDownload",
            RecordAction::Expire => "Expire",
            RecordAction::CreateNoClaim => "CreateNoClaim",
            RecordAction::ResetCurrentInstance => "ResetCurrentInstance",
            RecordAction::DispenseReset => "DispenseReset",
            RecordAction::ApplyPendingCancellations => "ApplyPendingCancellations",
            RecordAction::ResetNextActivity => "ResetNAD",
        }
    }

    pub fn from_name(name: &str) -> Result<Self, CodeError> {
        RecordAction::ALL
            .iter()
            .find(|action| action.name() == name)
            .copied()
            .ok_or_else(|| CodeError::Unrecognised(name.to_owned()))
    }

    /// The scheduled activity an issue must be carrying for this action to
    /// apply to it. Administrative actions apply regardless.
    pub fn matching_activity(&self) -> Option<Activity> {
        match self {
            RecordAction::Delete => Some(Activity::Delete),
            RecordAction::NominatedDownload => Some(Activity::Ready),
            RecordAction::Expire => Some(Activity::Expire),
            RecordAction::CreateNoClaim => Some(Activity::CreateNoClaim),
            _ => None,
        }
    }
}

impl std::fmt::Display for RecordAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn activity_names_round_trip() {
        for activity in Activity::ALL {
            assert_eq!(Activity::from_name(activity.name()).unwrap(), activity);
        }
    }

    #[test]
    fn precedence_names_ready_only() {
        assert_eq!(USER_IMPACTING_ACTIVITY, [Activity::Ready]);
    }

    #[test]
    fn nominated_download_action_matches_ready_activity() {
        assert_eq!(
            RecordAction::NominatedDownload.matching_activity(),
            Some(Activity::Ready)
        );
        assert_eq!(RecordAction::ResetCurrentInstance.matching_activity(), None);
    }
}
