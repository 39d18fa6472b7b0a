//! Administrative record corrections.
//!
//! Support tooling can patch individual attributes of a record when normal
//! message flow has left it inconsistent. Only fields present on the update
//! are touched, each change is logged, and an overdue expiry detected on
//! the way in forces the affected issues to expire instead.

use std::collections::BTreeMap;

use eps_types::{Activity, LineItemStatus, PrescriptionStatus};

use crate::context::MessageContext;
use crate::model::Record;
use crate::{EpsError, EpsResult};

/// Which issues an administrative update applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstanceSelection {
    /// Every issue on the record.
    All,
    /// The current issue and everything after it.
    Available,
    /// The current issue only.
    Current,
    /// An explicit list of issue numbers.
    Explicit(Vec<u32>),
}

/// Attribute patch for one or more issues. Absent fields are untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdminUpdate {
    pub prescription_status: Option<PrescriptionStatus>,
    pub completion_date: Option<String>,
    pub dispense_window_low_date: Option<String>,
    pub nominated_download_date: Option<String>,
    pub release_date: Option<String>,
    pub dispensing_organization: Option<String>,
    /// Explicitly clear the dispensing organisation.
    pub dispensing_organization_null: bool,
    pub last_dispense_date: Option<String>,
    /// Stored as the claim received date.
    pub claim_sent_date: Option<String>,
    /// New status per line item id.
    pub line_items: BTreeMap<String, LineItemStatus>,
    pub nominated_performer: Option<String>,
    pub nominated_performer_type: Option<String>,
}

/// Resolve an instance selection against the record.
fn instances_to_update(
    record: &Record,
    selection: &InstanceSelection,
    internal_id: &str,
) -> EpsResult<Vec<u32>> {
    let current = record.prescription.current_issue_number;
    let max = record.max_repeats();
    let numbers = match selection {
        InstanceSelection::All => (1..=max).collect(),
        InstanceSelection::Available => (current..=max).collect(),
        InstanceSelection::Current => vec![current],
        InstanceSelection::Explicit(numbers) => {
            for number in numbers {
                if record.issue(*number).is_err() {
                    tracing::warn!(
                        internal_id,
                        issue = number,
                        "EPS0297b admin update names an issue that does not exist"
                    );
                    return Err(EpsError::IssueNotFound(*number));
                }
            }
            numbers.clone()
        }
    };
    tracing::info!(
        internal_id,
        instances = ?numbers,
        "EPS0297a issues selected for admin update"
    );
    Ok(numbers)
}

/// Expire issues whose scheduled expiry has already passed.
///
/// An admin update arriving after the expiry date would otherwise patch an
/// issue the housekeeping worker is about to expire anyway, so the expiry
/// is applied first and the patch constrained to it.
fn is_overdue_expiry(record: &Record, number: u32, today: &str) -> bool {
    record
        .issue(number)
        .ok()
        .and_then(|issue| issue.next_activity.as_ref())
        .map(|next| next.activity == Activity::Expire && next.date.as_str() < today)
        .unwrap_or(false)
}

fn log_attribute_change(internal_id: &str, issue: u32, attribute: &str, value: &str) {
    tracing::info!(
        internal_id,
        issue,
        attribute,
        value,
        "EPS0071 admin attribute change"
    );
}

/// Apply an administrative update to the selected issues.
pub fn update_by_admin(
    record: &mut Record,
    update: &AdminUpdate,
    selection: &InstanceSelection,
    context: &MessageContext,
) -> EpsResult<()> {
    let internal_id = context.internal_id.clone();
    let today = context.handle_date_string();
    let numbers = instances_to_update(record, selection, &internal_id)?;

    for number in numbers {
        let overdue_expiry = is_overdue_expiry(record, number, &today);
        if overdue_expiry {
            tracing::info!(
                internal_id = %internal_id,
                issue = number,
                "EPS0335 overdue expiry detected during admin update"
            );
        }
        let issue = record.issue_mut(number)?;

        if overdue_expiry {
            if !issue.status.is_expiry_immutable() {
                let expired = PrescriptionStatus::Expired;
                issue.set_status(expired);
                log_attribute_change(&internal_id, number, "prescriptionStatus", expired.code());
            }
            if issue.completion_date.is_none() {
                issue.completion_date = Some(today.clone());
                log_attribute_change(&internal_id, number, "completionDate", &today);
            }
        } else if let Some(status) = update.prescription_status {
            issue.set_status(status);
            log_attribute_change(&internal_id, number, "prescriptionStatus", status.code());
        }

        if let Some(value) = &update.completion_date {
            issue.completion_date = Some(value.clone());
            log_attribute_change(&internal_id, number, "completionDate", value);
        }
        if let Some(value) = &update.dispense_window_low_date {
            issue.dispense_window_low_date = Some(value.clone());
            log_attribute_change(&internal_id, number, "dispenseWindowLowDate", value);
        }
        if let Some(value) = &update.nominated_download_date {
            issue.nominated_download_date = Some(value.clone());
            log_attribute_change(&internal_id, number, "nominatedDownloadDate", value);
        }
        if let Some(value) = &update.release_date {
            issue.release_date = Some(value.clone());
            log_attribute_change(&internal_id, number, "releaseDate", value);
        }
        if update.dispensing_organization_null {
            issue.dispense.dispensing_organization = None;
            log_attribute_change(&internal_id, number, "dispensingOrganization", "");
        } else if let Some(value) = &update.dispensing_organization {
            issue.dispense.dispensing_organization = Some(value.clone());
            log_attribute_change(&internal_id, number, "dispensingOrganization", value);
        }
        if let Some(value) = &update.last_dispense_date {
            issue.dispense.last_dispense_date = Some(value.clone());
            log_attribute_change(&internal_id, number, "lastDispenseDate", value);
        }
        if let Some(value) = &update.claim_sent_date {
            issue.claim.received_date = Some(value.clone());
            log_attribute_change(&internal_id, number, "claimSentDate", value);
        }

        for item in &mut issue.line_items {
            if overdue_expiry {
                if !item.status.is_expiry_immutable() {
                    item.previous_status = Some(item.status);
                    item.status = LineItemStatus::Expired;
                    tracing::info!(
                        internal_id = %internal_id,
                        issue = number,
                        line_item = %item.id,
                        "EPS0072 line item expired by admin update"
                    );
                }
            } else if let Some(status) = update.line_items.get(&item.id) {
                item.previous_status = Some(item.status);
                item.status = *status;
                tracing::info!(
                    internal_id = %internal_id,
                    issue = number,
                    line_item = %item.id,
                    status = %status,
                    "EPS0072 line item status set by admin update"
                );
            }
        }
    }

    if let Some(performer) = &update.nominated_performer {
        record.nomination.nominated_performer = Some(performer.clone());
    }
    if let Some(performer_type) = &update.nominated_performer_type {
        record.nomination.nominated_performer_type = Some(performer_type.clone());
    }
    Ok(())
}
