//! Message handling context shared by every record operation.

use chrono::NaiveDateTime;

use crate::time::{date_part, format_date_time};

/// Identity and timing of the message currently being applied to a record.
#[derive(Debug, Clone)]
pub struct MessageContext {
    /// Correlation id carried through every log line for this message.
    pub internal_id: String,
    /// GUID of the message, used to key change log entries.
    pub message_id: String,
    /// HL7 interaction id of the message.
    pub interaction_id: String,
    /// Time the message is being handled.
    pub handle_time: NaiveDateTime,
    /// Organisation the sending agent is acting for.
    pub agent_organization: Option<String>,
    pub agent_person_role: Option<String>,
    pub agent_role_profile_code_id: Option<String>,
}

impl MessageContext {
    /// Build a context for an incoming message, minting a fresh
    /// correlation id for it.
    pub fn new(
        message_id: impl Into<String>,
        interaction_id: impl Into<String>,
        handle_time: NaiveDateTime,
    ) -> Self {
        MessageContext {
            internal_id: uuid::Uuid::new_v4().to_string(),
            message_id: message_id.into(),
            interaction_id: interaction_id.into(),
            handle_time,
            agent_organization: None,
            agent_person_role: None,
            agent_role_profile_code_id: None,
        }
    }

    /// `YYYYMMDDHHMMSS` form of the handle time.
    pub fn handle_time_string(&self) -> String {
        format_date_time(self.handle_time)
    }

    /// `YYYYMMDD` form of the handle time.
    pub fn handle_date_string(&self) -> String {
        date_part(&self.handle_time_string()).to_owned()
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use chrono::NaiveDate;

    pub fn message_context() -> MessageContext {
        MessageContext {
            internal_id: "test-internal-id".to_owned(),
            message_id: "msg-0001".to_owned(),
            interaction_id: "PORX_IN060102UK30".to_owned(),
            handle_time: NaiveDate::from_ymd_opt(2026, 8, 27)
                .unwrap()
                .and_hms_opt(14, 30, 0)
                .unwrap(),
            agent_organization: Some("FA111".to_owned()),
            agent_person_role: Some("R8000".to_owned()),
            agent_role_profile_code_id: Some("100102238986".to_owned()),
        }
    }
}
