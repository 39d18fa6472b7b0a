//! The prescription record aggregate.
//!
//! A record holds one prescription, its issues (a single issue for acute and
//! repeat prescribing, one per repeat for repeat dispensing), and the audit
//! structures that travel with it. All lifecycle operations mutate a record
//! in memory; persistence is a separate concern.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use eps_types::{Activity, LineItemStatus, PrescriptionStatus, TreatmentType};

use crate::{EpsError, EpsResult};

/// One prescribed item on an issue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineItem {
    pub id: String,
    pub status: LineItemStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_status: Option<LineItemStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_repeats: Option<u32>,
}

/// Dispensing state for one issue.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dispense {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dispensing_organization: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_dispense_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_dispense_status: Option<PrescriptionStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_dispense_notification_msg_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_dispense_notification_guid: Option<String>,
}

/// Reimbursement claim state for one issue.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Claim {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub received_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guid: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub historic_guids: Vec<String>,
}

/// What a cancellation request targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CancellationTarget {
    Prescription,
    LineItem,
}

/// A cancellation request recorded against the prescription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cancellation {
    pub id: String,
    pub target: CancellationTarget,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_item_ref: Option<String>,
    /// `YYYYMMDDHHMMSS` timestamp of the cancellation request.
    pub time: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_organization: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reasons: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

/// Snapshot of issue state taken at each dispense event, keyed by the
/// notification message id. The release entry is kept under a fixed key so
/// a dispense withdrawal can rewind to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispenseHistoryEntry {
    pub status: PrescriptionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_dispense_status: Option<PrescriptionStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_dispense_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dispensing_organization: Option<String>,
    pub line_items: Vec<LineItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_date: Option<String>,
}

/// Key under which the release snapshot sits in the dispense history.
pub const RELEASE_HISTORY_KEY: &str = "release";

/// The next activity the scheduler has decided for an issue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NextActivity {
    pub activity: Activity,
    /// `YYYYMMDD` date on which the activity falls due.
    pub date: String,
}

/// One issue of a prescription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Issue {
    pub number: u32,
    pub status: PrescriptionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_status: Option<PrescriptionStatus>,
    pub line_items: Vec<LineItem>,
    #[serde(default)]
    pub dispense: Dispense,
    #[serde(default)]
    pub claim: Claim,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cancellations: Vec<Cancellation>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub dispense_history: BTreeMap<String, DispenseHistoryEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dispense_window_low_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dispense_window_high_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nominated_download_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_issue_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_activity: Option<NextActivity>,
}

impl Issue {
    pub fn new(number: u32, status: PrescriptionStatus, line_items: Vec<LineItem>) -> Self {
        Issue {
            number,
            status,
            previous_status: None,
            line_items,
            dispense: Dispense::default(),
            claim: Claim::default(),
            cancellations: Vec::new(),
            dispense_history: BTreeMap::new(),
            completion_date: None,
            expiry_date: None,
            dispense_window_low_date: None,
            dispense_window_high_date: None,
            nominated_download_date: None,
            release_date: None,
            previous_issue_date: None,
            next_activity: None,
        }
    }

    pub fn line_item(&self, id: &str) -> Option<&LineItem> {
        self.line_items.iter().find(|item| item.id == id)
    }

    pub fn line_item_mut(&mut self, id: &str) -> Option<&mut LineItem> {
        self.line_items.iter_mut().find(|item| item.id == id)
    }

    /// True if any line item is still in an active state.
    pub fn has_active_line_item(&self) -> bool {
        self.line_items.iter().any(|item| item.status.is_active())
    }

    /// Set a new issue status, preserving the old one.
    pub fn set_status(&mut self, status: PrescriptionStatus) {
        self.previous_status = Some(self.status);
        self.status = status;
    }
}

/// Patient exemption date limits derived from the birth date at release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExemptionDates {
    pub lower_age_limit: String,
    pub higher_age_limit: String,
}

/// Pharmacy nomination state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Nomination {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nominated_performer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nominated_performer_type: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub nomination_history: Vec<String>,
}

/// Prescription-level detail shared by every issue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Prescription {
    pub prescription_id: String,
    pub treatment_type: TreatmentType,
    /// `YYYYMMDDHHMMSS` time the prescription was written.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prescription_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signed_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prescription_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_repeats: Option<u32>,
    pub current_issue_number: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub days_supply: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nhs_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub birth_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prescribing_organization: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prescription_msg_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exemption: Option<ExemptionDates>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unsuccessful_cancellations: Vec<Cancellation>,
}

/// The full prescription record aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    pub prescription: Prescription,
    /// Issues keyed by issue number, starting at 1.
    pub issues: BTreeMap<u32, Issue>,
    #[serde(default)]
    pub nomination: Nomination,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pending_cancellations: Vec<Cancellation>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub change_log: BTreeMap<String, crate::changelog::ChangeLogEntry>,
    /// Message references of the stored documents belonging to this record.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub documents: Vec<String>,
    /// System change number, incremented on every persisted update and used
    /// as the optimistic concurrency condition on writes.
    #[serde(default = "crate::changelog::initial_scn")]
    pub scn: i64,
    /// Issue number a completed dispense has queued up as the next current
    /// issue. Applied by [`crate::record::roll_forward_instance`], never
    /// persisted.
    #[serde(skip)]
    pub pending_instance_change: Option<u32>,
}

impl Record {
    pub fn scn(&self) -> i64 {
        self.scn
    }

    pub fn increment_scn(&mut self) {
        self.scn += 1;
    }

    pub fn issue(&self, number: u32) -> EpsResult<&Issue> {
        self.issues.get(&number).ok_or(EpsError::IssueNotFound(number))
    }

    pub fn issue_mut(&mut self, number: u32) -> EpsResult<&mut Issue> {
        self.issues
            .get_mut(&number)
            .ok_or(EpsError::IssueNotFound(number))
    }

    pub fn current_issue(&self) -> EpsResult<&Issue> {
        self.issue(self.prescription.current_issue_number)
    }

    pub fn current_issue_mut(&mut self) -> EpsResult<&mut Issue> {
        self.issue_mut(self.prescription.current_issue_number)
    }

    /// Maximum number of issues. One except for repeat dispensing.
    pub fn max_repeats(&self) -> u32 {
        match self.prescription.treatment_type {
            TreatmentType::RepeatDispensing => self.prescription.max_repeats.unwrap_or(1),
            _ => 1,
        }
    }

    pub fn future_issues_available(&self) -> bool {
        self.prescription.current_issue_number < self.max_repeats()
    }

    /// Issue numbers from `start` upwards, in order.
    pub fn issue_numbers_from(&self, start: u32) -> Vec<u32> {
        self.issues.keys().copied().filter(|n| *n >= start).collect()
    }

    /// Whether an issue is the final one: last by number, or no later issue
    /// carries a status.
    pub fn is_final_issue(&self, number: u32) -> bool {
        if number >= self.max_repeats() {
            return true;
        }
        !self.issues.keys().any(|n| *n > number)
    }

    /// Move the current issue pointer to the first issue, scanning from the
    /// present current issue upwards, that is in an active or future state.
    /// Falls back to the last issue when none qualifies. Returns the old and
    /// new issue numbers.
    pub fn reset_current_instance(&mut self) -> (u32, u32) {
        let old = self.prescription.current_issue_number;
        let mut new = self.issues.keys().copied().last().unwrap_or(old);
        for (number, issue) in self.issues.range(old..) {
            if issue.status.is_active() || issue.status.is_future() {
                new = *number;
                break;
            }
        }
        self.prescription.current_issue_number = new;
        (old, new)
    }

    /// Advance the current issue pointer to the next issue that is not
    /// completed, scanning forward from the current issue.
    pub fn force_current_instance_increment(&mut self, internal_id: &str) {
        let current = self.prescription.current_issue_number;
        let max = self.max_repeats();
        for number in current..=max {
            match self.issues.get(&number) {
                Some(issue) if !issue.status.is_completed() => {
                    if number != current {
                        tracing::info!(
                            internal_id,
                            from = current,
                            to = number,
                            "EPS0625 current issue moved forward"
                        );
                        self.prescription.current_issue_number = number;
                    }
                    return;
                }
                _ => {}
            }
        }
        tracing::info!(
            internal_id,
            current,
            "EPS0625b no later issue available, current issue unchanged"
        );
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn line_item(id: &str, status: LineItemStatus) -> LineItem {
        LineItem {
            id: id.to_owned(),
            status,
            previous_status: None,
            max_repeats: None,
        }
    }

    pub fn acute_record(status: PrescriptionStatus) -> Record {
        let items = vec![
            line_item("item-1", LineItemStatus::ToBeDispensed),
            line_item("item-2", LineItemStatus::ToBeDispensed),
        ];
        let mut issues = BTreeMap::new();
        issues.insert(1, Issue::new(1, status, items));
        Record {
            prescription: Prescription {
                prescription_id: "7D9625-Z72BF2-11E3A".to_owned(),
                treatment_type: TreatmentType::Acute,
                prescription_time: Some("20260801120000".to_owned()),
                signed_time: Some("20260801120000".to_owned()),
                prescription_type: Some("0101".to_owned()),
                max_repeats: None,
                current_issue_number: 1,
                days_supply: None,
                nhs_number: Some("9434765919".to_owned()),
                birth_time: Some("19800115".to_owned()),
                prescribing_organization: Some("A99968".to_owned()),
                prescription_msg_ref: Some("doc-parent".to_owned()),
                exemption: None,
                unsuccessful_cancellations: Vec::new(),
            },
            issues,
            nomination: Nomination::default(),
            pending_cancellations: Vec::new(),
            change_log: BTreeMap::new(),
            documents: Vec::new(),
            scn: crate::changelog::INITIAL_SCN,
            pending_instance_change: None,
        }
    }

    pub fn repeat_dispense_record(max_repeats: u32) -> Record {
        let mut record = acute_record(PrescriptionStatus::ToBeDispensed);
        record.prescription.treatment_type = TreatmentType::RepeatDispensing;
        record.prescription.max_repeats = Some(max_repeats);
        record.prescription.days_supply = Some(28);
        let template = record.issues.get(&1).unwrap().clone();
        for number in 2..=max_repeats {
            let mut issue = template.clone();
            issue.number = number;
            issue.status = PrescriptionStatus::RepeatDispenseFutureInstance;
            record.issues.insert(number, issue);
        }
        record
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn acute_max_repeats_is_one() {
        let record = acute_record(PrescriptionStatus::ToBeDispensed);
        assert_eq!(record.max_repeats(), 1);
        assert!(!record.future_issues_available());
    }

    #[test]
    fn reset_skips_completed_issues() {
        let mut record = repeat_dispense_record(3);
        record.issue_mut(1).unwrap().status = PrescriptionStatus::Cancelled;
        let (old, new) = record.reset_current_instance();
        assert_eq!(old, 1);
        assert_eq!(new, 2);
        assert_eq!(record.prescription.current_issue_number, 2);
    }

    #[test]
    fn reset_falls_back_to_last_issue() {
        let mut record = repeat_dispense_record(2);
        record.issue_mut(1).unwrap().status = PrescriptionStatus::Cancelled;
        record.issue_mut(2).unwrap().status = PrescriptionStatus::Cancelled;
        let (_, new) = record.reset_current_instance();
        assert_eq!(new, 2);
    }

    #[test]
    fn force_increment_stays_put_when_current_is_open() {
        let mut record = repeat_dispense_record(3);
        record.force_current_instance_increment("test-internal-id");
        assert_eq!(record.prescription.current_issue_number, 1);
    }

    #[test]
    fn force_increment_moves_past_completed_issue() {
        let mut record = repeat_dispense_record(3);
        record.issue_mut(1).unwrap().status = PrescriptionStatus::Dispensed;
        record.force_current_instance_increment("test-internal-id");
        assert_eq!(record.prescription.current_issue_number, 2);
    }

    #[test]
    fn record_serialises_with_camel_case_fields() {
        let record = acute_record(PrescriptionStatus::ToBeDispensed);
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["prescription"]["prescriptionId"], "7D9625-Z72BF2-11E3A");
        assert_eq!(json["issues"]["1"]["status"], "0001");
        assert_eq!(json["issues"]["1"]["lineItems"][0]["status"], "0007");
    }
}
