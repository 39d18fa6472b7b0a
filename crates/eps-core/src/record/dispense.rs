//! Dispense notifications and repeat-issue rollover.

use chrono::Days;

use eps_types::{LineItemStatus, PrescriptionStatus, TreatmentType};

use crate::config::CoreConfig;
use crate::context::MessageContext;
use crate::model::{DispenseHistoryEntry, Record, RELEASE_HISTORY_KEY};
use crate::time::{date_part, format_date, parse_date};
use crate::{EpsError, EpsResult};

/// The dispensing outcome carried by a dispense notification.
#[derive(Debug, Clone)]
pub struct DispenseUpdate {
    /// Issue status the notification asserts.
    pub status: PrescriptionStatus,
    /// New status per line item id.
    pub line_items: Vec<(String, LineItemStatus)>,
    pub dispensing_organization: Option<String>,
    /// `YYYYMMDD`; the handle date when absent.
    pub dispense_date: Option<String>,
    pub notification_msg_ref: Option<String>,
    /// Issue an amendment targets; the current issue otherwise.
    pub target_instance: Option<u32>,
    /// Leave the issue status untouched (used when rewinding to an amended
    /// notification that is not the latest).
    pub maintain_instance_status: bool,
}

/// Apply a dispense notification to the record.
///
/// When the asserted status completes the issue, the completion date is
/// set, the following issue is seeded with its prior-issue date, and the
/// rollover to the next repeat issue is prepared. The rollover is only
/// applied to the current-issue pointer by [`roll_forward_instance`], after
/// the caller has finished reading the pre-rollover state.
pub fn update_for_dispense(
    record: &mut Record,
    update: &DispenseUpdate,
    context: &MessageContext,
    config: &CoreConfig,
) -> EpsResult<()> {
    let issue_number = update
        .target_instance
        .unwrap_or(record.prescription.current_issue_number);
    let dispense_date = update
        .dispense_date
        .clone()
        .unwrap_or_else(|| context.handle_date_string());

    {
        let issue = record.issue_mut(issue_number)?;
        issue.dispense.last_dispense_date = Some(dispense_date.clone());
        issue.dispense.last_dispense_status = Some(update.status);
        if update.dispensing_organization.is_some() {
            issue.dispense.dispensing_organization = update.dispensing_organization.clone();
        }
        if update.notification_msg_ref.is_some() {
            issue.dispense.last_dispense_notification_msg_ref =
                update.notification_msg_ref.clone();
        }
    }

    if update.status.is_completed() {
        record.issue_mut(issue_number)?.completion_date = Some(dispense_date.clone());
        set_next_instance_prior_issue_date(record, issue_number, &dispense_date)?;
        release_next_instance(record, issue_number, Some(&dispense_date), context, config)?;
    }

    {
        let issue = record.issue_mut(issue_number)?;
        for (id, new_status) in &update.line_items {
            let item = issue
                .line_item_mut(id)
                .ok_or_else(|| EpsError::LineItemNotFound(id.clone()))?;
            item.previous_status = Some(item.status);
            item.status = *new_status;
        }
        if !update.maintain_instance_status {
            issue.set_status(update.status);
        }
    }
    Ok(())
}

/// Validate the line items on a dispense notification against the stored
/// issue.
///
/// The notification must cover exactly the stored item set, and every
/// status change must be one the caller's transition table allows. Repeat
/// counts are reconciled for repeat prescriptions: repeat prescribing only
/// logs a mismatch, repeat dispensing refuses it unless the claimed count
/// matches the prescription-level count.
pub fn compare_line_items_for_dispense(
    record: &Record,
    issue_number: u32,
    passed: &[(String, LineItemStatus, Option<u32>)],
    valid_transitions: &[(LineItemStatus, LineItemStatus)],
    internal_id: &str,
) -> EpsResult<()> {
    let issue = record.issue(issue_number)?;

    let mut stored_ids: Vec<&str> = issue.line_items.iter().map(|i| i.id.as_str()).collect();
    let mut passed_ids: Vec<&str> = passed.iter().map(|(id, _, _)| id.as_str()).collect();
    stored_ids.sort_unstable();
    passed_ids.sort_unstable();
    if stored_ids != passed_ids {
        tracing::warn!(
            internal_id,
            issue = issue_number,
            "EPS0146 dispense line items do not match the stored prescription"
        );
        return Err(EpsError::LineItemNotFound(passed_ids.join(",")));
    }

    for (id, new_status, passed_max_repeats) in passed {
        let stored = issue
            .line_item(id)
            .ok_or_else(|| EpsError::LineItemNotFound(id.clone()))?;

        if !valid_transitions.contains(&(stored.status, *new_status)) {
            tracing::warn!(
                internal_id,
                line_item = %id,
                from = %stored.status,
                to = %new_status,
                "EPS0148 invalid line item status change on dispense"
            );
            return Err(EpsError::InvalidLineStateTransition {
                from: stored.status.to_string(),
                to: new_status.to_string(),
            });
        }

        if record.prescription.treatment_type == TreatmentType::Acute {
            continue;
        }
        if *passed_max_repeats == stored.max_repeats {
            continue;
        }
        if record.prescription.treatment_type == TreatmentType::RepeatPrescribing {
            tracing::info!(
                internal_id,
                line_item = %id,
                "EPS0147b repeat count mismatch on repeat prescribing, continuing"
            );
            continue;
        }
        let (Some(claimed), Some(_)) = (*passed_max_repeats, stored.max_repeats) else {
            tracing::warn!(
                internal_id,
                line_item = %id,
                "EPS0147d repeat count missing on one side"
            );
            return Err(EpsError::MaxRepeatMismatch);
        };
        if Some(claimed) == record.prescription.max_repeats {
            tracing::info!(
                internal_id,
                line_item = %id,
                "EPS0147c repeat count matches the prescription level count"
            );
            continue;
        }
        tracing::warn!(internal_id, line_item = %id, "EPS0147 repeat count mismatch");
        return Err(EpsError::MaxRepeatMismatch);
    }
    Ok(())
}

fn find_next_future_issue_number(
    record: &Record,
    current: u32,
    skip_status_check: bool,
) -> Option<u32> {
    let next = current + 1;
    let issue = record.issues.get(&next)?;
    if skip_status_check || issue.status == PrescriptionStatus::RepeatDispenseFutureInstance {
        Some(next)
    } else {
        None
    }
}

/// Record the completed issue's dispense time on the issue that follows it.
pub fn set_next_instance_prior_issue_date(
    record: &mut Record,
    current: u32,
    dispense_time: &str,
) -> EpsResult<()> {
    if let Some(next) = find_next_future_issue_number(record, current, true) {
        record.issue_mut(next)?.previous_issue_date = Some(dispense_time.to_owned());
    }
    Ok(())
}

/// Prepare the next repeat issue for release.
///
/// The next issue's nominated download date is either derived from the
/// prescribing date (prescribe date + days-supply x completed issues, less
/// the download lead days) or from the dispense date just recorded. When
/// that date has not yet arrived the issue waits as AwaitingReleaseReady;
/// otherwise it is immediately ToBeDispensed. The resulting issue number is
/// parked on the record as the pending instance change.
pub fn release_next_instance(
    record: &mut Record,
    current: u32,
    dispense_date: Option<&str>,
    context: &MessageContext,
    config: &CoreConfig,
) -> EpsResult<()> {
    let next = match find_next_future_issue_number(record, current, false) {
        Some(next) => next,
        None => {
            record.pending_instance_change = None;
            return Ok(());
        }
    };

    let handle_date = parse_date(&context.handle_date_string())?;
    let dispense_date = match dispense_date {
        Some(raw) => parse_date(date_part(raw))?,
        None => handle_date,
    };
    let days_supply = u64::from(record.prescription.days_supply.unwrap_or(0));
    let lead_days = u64::from(config.nominated_download_lead_days());

    let nominated_download = if config.nominated_download_date_enabled() {
        let prescribe_date = record
            .prescription
            .prescription_time
            .as_deref()
            .map(date_part)
            .map(parse_date)
            .transpose()?
            .unwrap_or(handle_date);
        let offset = days_supply * u64::from(next - 1);
        let date = prescribe_date
            .checked_add_days(Days::new(offset))
            .and_then(|d| d.checked_sub_days(Days::new(lead_days)))
            .ok_or_else(|| EpsError::InvalidDate(format!("{prescribe_date}")))?;
        tracing::info!(
            internal_id = %context.internal_id,
            next_issue = next,
            download_date = %format_date(date),
            "EPS0675 next issue download date derived from prescribing date"
        );
        date
    } else {
        let date = dispense_date
            .checked_add_days(Days::new(days_supply))
            .and_then(|d| d.checked_sub_days(Days::new(lead_days)))
            .ok_or_else(|| EpsError::InvalidDate(format!("{dispense_date}")))?;
        tracing::info!(
            internal_id = %context.internal_id,
            next_issue = next,
            download_date = %format_date(date),
            "EPS0676 next issue download date derived from dispense date"
        );
        date
    };

    let status = if nominated_download >= handle_date {
        PrescriptionStatus::AwaitingReleaseReady
    } else {
        PrescriptionStatus::ToBeDispensed
    };

    let issue = record.issue_mut(next)?;
    issue.set_status(status);
    issue.dispense_window_low_date = Some(format_date(dispense_date));
    issue.nominated_download_date = Some(format_date(nominated_download));
    record.pending_instance_change = Some(next);
    Ok(())
}

/// Apply a pending instance change to the current-issue pointer.
pub fn roll_forward_instance(record: &mut Record) {
    if let Some(next) = record.pending_instance_change {
        record.prescription.current_issue_number = next;
    }
}

/// Snapshot the issue's dispensing state under the notification's GUID.
///
/// When no dispense has been recorded yet the release date stands in for
/// the last dispense date.
pub fn create_dispense_history_entry(record: &mut Record, issue_number: u32, guid: &str) -> EpsResult<()> {
    let issue = record.issue_mut(issue_number)?;
    let last_dispense_date = issue
        .dispense
        .last_dispense_date
        .clone()
        .or_else(|| issue.release_date.clone());
    let entry = DispenseHistoryEntry {
        status: issue.status,
        last_dispense_status: issue.dispense.last_dispense_status,
        last_dispense_date,
        dispensing_organization: issue.dispense.dispensing_organization.clone(),
        line_items: issue.line_items.clone(),
        completion_date: issue.completion_date.clone(),
    };
    issue.dispense_history.insert(guid.to_owned(), entry);
    Ok(())
}

/// Drop every dispense notification snapshot, keeping only the release
/// snapshot. Used when a withdrawal rewinds the issue to its release state.
pub fn clear_dispense_notifications_from_history(record: &mut Record, issue_number: u32) -> EpsResult<()> {
    let issue = record.issue_mut(issue_number)?;
    issue
        .dispense_history
        .retain(|key, _| key == RELEASE_HISTORY_KEY);
    Ok(())
}
