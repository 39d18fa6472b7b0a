//! Scheduled and administrative actions against a record.
//!
//! The housekeeping worker scans the next-activity index and replays each
//! due activity onto its record through [`update_by_action`]. Admin tooling
//! uses the same path with an explicit target issue.

use eps_types::{PrescriptionStatus, RecordAction};

use crate::config::CoreConfig;
use crate::context::MessageContext;
use crate::model::Record;
use crate::record::dispense::{release_next_instance, roll_forward_instance};
use crate::record::release::update_for_return;
use crate::EpsResult;

/// Which issues an action request targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceTarget {
    /// Every issue whose next activity matches and is due. Used by the
    /// housekeeping worker.
    Available,
    /// One explicit issue, from a test or admin system.
    Specific(u32),
}

/// What an action did, for the caller to persist or act on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActionOutcome {
    pub instances_updated: Vec<u32>,
    /// False when the record finished unchanged and need not be written.
    pub updates_to_apply: bool,
    /// Set by a delete action: the record key to remove.
    pub record_to_delete: Option<String>,
    /// Set by a delete action: the document keys to remove.
    pub documents_to_delete: Vec<String>,
}

/// Expire one issue: status and line items move through the expiry lookup,
/// completion date is stamped. Already-completed issues keep their status.
fn expire_issue(record: &mut Record, number: u32, handle_date: &str, internal_id: &str) -> EpsResult<()> {
    let release_version =
        eps_id::ReleaseVersion::from_prescription_id(&record.prescription.prescription_id);
    let issue = record.issue_mut(number)?;
    let current_status = issue.status;

    if !current_status.is_expiry_immutable() {
        if let Some(new_status) = current_status.expiry_status() {
            issue.set_status(new_status);
            if current_status.is_unactioned() {
                tracing::info!(
                    internal_id,
                    previous_status = %current_status,
                    release_version = %release_version,
                    "EPS0616 unactioned prescription issue expired"
                );
            }
        }
    }

    for item in &mut issue.line_items {
        if !item.status.is_expiry_immutable() {
            if let Some(new_status) = item.status.expiry_status() {
                item.previous_status = Some(item.status);
                item.status = new_status;
            }
        }
    }

    tracing::info!(internal_id, issue = number, "EPS0403 issue expired");
    issue.completion_date = Some(handle_date.to_owned());
    Ok(())
}

/// Resolve which issues an action applies to.
///
/// An explicit target bypasses the applicability test. Otherwise each issue
/// is matched against the action's activity with a due date on or before
/// the handle date; administrative actions use their own selection rules
/// instead of the activity match.
pub fn find_instances_to_action_update(
    record: &Record,
    action: RecordAction,
    target: InstanceTarget,
    context: &MessageContext,
) -> Vec<u32> {
    if let InstanceTarget::Specific(number) = target {
        tracing::info!(
            internal_id = %context.internal_id,
            action = %action,
            instance = number,
            "EPS0407b explicit target instance for action"
        );
        return vec![number];
    }

    let handle_date = context.handle_date_string();
    let activity_to_look_for = action.matching_activity();
    let mut issues_to_update = Vec::new();
    let mut rejected = Vec::new();

    for (number, issue) in &record.issues {
        // Records migrated without a next activity still need their
        // schedule reset.
        if issue.status == PrescriptionStatus::AwaitingReleaseReady
            && action == RecordAction::ResetNextActivity
        {
            issues_to_update.push(*number);
        }
        if action == RecordAction::ResetCurrentInstance {
            issues_to_update.push(*number);
            break;
        }
        // A hung release is only resettable while the issue is still
        // sitting with the dispenser untouched.
        if action == RecordAction::DispenseReset
            && issue.status == PrescriptionStatus::WithDispenser
        {
            issues_to_update.push(*number);
        }
        // Cancellation applies to the first cancellable issue and all that
        // follow it, so only the first needs identifying.
        if action == RecordAction::ApplyPendingCancellations {
            if issue.status.is_cancellable() {
                issues_to_update.push(*number);
                break;
            }
            continue;
        }

        if let (Some(activity), Some(next)) = (activity_to_look_for, issue.next_activity.as_ref())
        {
            // Dates are YYYYMMDD strings, so lexicographic order is date
            // order. The date check matters: every issue starts with an
            // expire activity.
            if next.activity == activity && next.date <= handle_date {
                issues_to_update.push(*number);
            } else {
                rejected.push(format!("{}|{}|{}", number, next.activity, next.date));
            }
        }
    }

    if issues_to_update.is_empty() {
        tracing::info!(
            internal_id = %context.internal_id,
            handle_date = %handle_date,
            action = %action,
            rejected = ?rejected,
            "EPS0405 no issues eligible for action"
        );
    } else {
        tracing::info!(
            internal_id = %context.internal_id,
            action = %action,
            instances = ?issues_to_update,
            "EPS0407 issues selected for action"
        );
    }
    issues_to_update
}

/// Apply an action to the record.
///
/// Deletion is prescription wide: it verifies every issue has delete as its
/// next activity and then emits the record and document keys to remove.
/// Every other action applies per selected issue, maintaining consistent
/// record state as it goes.
pub fn update_by_action(
    record: &mut Record,
    action: RecordAction,
    target: InstanceTarget,
    context: &MessageContext,
    config: &CoreConfig,
) -> EpsResult<ActionOutcome> {
    let mut outcome = ActionOutcome {
        updates_to_apply: true,
        ..ActionOutcome::default()
    };

    if action == RecordAction::Delete {
        update_delete(record, context, &mut outcome);
        return Ok(outcome);
    }

    let instances = find_instances_to_action_update(record, action, target, context);
    for number in instances {
        perform_instance_specific_update(record, action, number, context, config, &mut outcome)?;
        outcome.instances_updated.push(number);
    }
    Ok(outcome)
}

fn perform_instance_specific_update(
    record: &mut Record,
    action: RecordAction,
    number: u32,
    context: &MessageContext,
    config: &CoreConfig,
    outcome: &mut ActionOutcome,
) -> EpsResult<()> {
    let handle_date = context.handle_date_string();
    match action {
        RecordAction::NominatedDownload => {
            record.issue_mut(number)?.set_status(PrescriptionStatus::ToBeDispensed);
            tracing::info!(
                internal_id = %context.internal_id,
                issue = number,
                "EPS0402 issue made available for nominated download"
            );
        }
        RecordAction::ResetCurrentInstance => {
            let (old, new) = record.reset_current_instance();
            if old != new {
                tracing::info!(
                    internal_id = %context.internal_id,
                    old_current_issue = old,
                    new_current_issue = new,
                    prescription_id = %record.prescription.prescription_id,
                    "EPS0401c current issue reset"
                );
            } else {
                outcome.updates_to_apply = false;
            }
        }
        RecordAction::DispenseReset => {
            update_for_return(record, true)?;
        }
        RecordAction::ApplyPendingCancellations => {
            // Applied by the cancellation worker, nothing to do per issue.
        }
        RecordAction::Expire => {
            // Expiring an issue expires every later issue too, and the
            // current issue indicator jumps to the last issue.
            for later in record.issue_numbers_from(number) {
                expire_issue(record, later, &handle_date, &context.internal_id)?;
            }
            record.prescription.current_issue_number = record.max_repeats();
        }
        RecordAction::CreateNoClaim => {
            {
                let issue = record.issue_mut(number)?;
                issue.set_status(PrescriptionStatus::NoClaimed);
                issue.claim.received_date = Some(handle_date.clone());
                issue.completion_date = Some(handle_date.clone());
            }
            tracing::info!(
                internal_id = %context.internal_id,
                issue = number,
                "EPS0406 no claim recorded"
            );
            if number < record.max_repeats() {
                release_next_instance(record, number, None, context, config)?;
                roll_forward_instance(record);
            }
        }
        RecordAction::ResetNextActivity => {
            // The rollup recalculates on write; just record the touch.
            tracing::info!(
                internal_id = %context.internal_id,
                prescription_id = %record.prescription.prescription_id,
                "EPS0401b next activity reset requested"
            );
        }
        RecordAction::Delete => {
            // handled record-wide by the caller
        }
    }
    Ok(())
}

fn update_delete(record: &Record, context: &MessageContext, outcome: &mut ActionOutcome) {
    for (number, issue) in &record.issues {
        let next = issue.next_activity.as_ref().map(|n| n.activity);
        if next != Some(eps_types::Activity::Delete) {
            tracing::info!(
                internal_id = %context.internal_id,
                prescription_id = %record.prescription.prescription_id,
                next_activity = ?next,
                issue = number,
                "EPS0404b deletion refused, issue not due for delete"
            );
            return;
        }
    }

    outcome.documents_to_delete = record.documents.clone();
    outcome.record_to_delete = Some(
        eps_id::prescription_id_without_check_digit(&record.prescription.prescription_id)
            .to_owned(),
    );
    outcome.updates_to_apply = false;
    tracing::info!(
        internal_id = %context.internal_id,
        record_ref = outcome.record_to_delete.as_deref().unwrap_or(""),
        document_refs = ?outcome.documents_to_delete,
        "EPS0404 record marked for deletion"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::fixtures::message_context;
    use crate::model::fixtures::{acute_record, repeat_dispense_record};
    use crate::model::NextActivity;
    use eps_types::{Activity, LineItemStatus};

    fn set_next_activity(record: &mut Record, number: u32, activity: Activity, date: &str) {
        record.issue_mut(number).unwrap().next_activity = Some(NextActivity {
            activity,
            date: date.to_owned(),
        });
    }

    #[test]
    fn due_expire_activity_selects_the_issue() {
        let mut record = acute_record(PrescriptionStatus::ToBeDispensed);
        set_next_activity(&mut record, 1, Activity::Expire, "20260827");
        let selected = find_instances_to_action_update(
            &record,
            RecordAction::Expire,
            InstanceTarget::Available,
            &message_context(),
        );
        assert_eq!(selected, vec![1]);
    }

    #[test]
    fn undue_activity_is_rejected() {
        let mut record = acute_record(PrescriptionStatus::ToBeDispensed);
        set_next_activity(&mut record, 1, Activity::Expire, "20270201");
        let selected = find_instances_to_action_update(
            &record,
            RecordAction::Expire,
            InstanceTarget::Available,
            &message_context(),
        );
        assert!(selected.is_empty());
    }

    #[test]
    fn nominated_download_matches_ready_activity() {
        let mut record = acute_record(PrescriptionStatus::AwaitingReleaseReady);
        set_next_activity(&mut record, 1, Activity::Ready, "20260826");
        let selected = find_instances_to_action_update(
            &record,
            RecordAction::NominatedDownload,
            InstanceTarget::Available,
            &message_context(),
        );
        assert_eq!(selected, vec![1]);
    }

    #[test]
    fn explicit_target_bypasses_the_date_check() {
        let record = acute_record(PrescriptionStatus::ToBeDispensed);
        let selected = find_instances_to_action_update(
            &record,
            RecordAction::Expire,
            InstanceTarget::Specific(1),
            &message_context(),
        );
        assert_eq!(selected, vec![1]);
    }

    #[test]
    fn expire_action_expires_all_later_issues() {
        let mut record = repeat_dispense_record(3);
        record.issue_mut(1).unwrap().status = PrescriptionStatus::WithDispenserActive;
        set_next_activity(&mut record, 1, Activity::Expire, "20260820");
        let outcome = update_by_action(
            &mut record,
            RecordAction::Expire,
            InstanceTarget::Available,
            &message_context(),
            &CoreConfig::default(),
        )
        .unwrap();
        assert_eq!(outcome.instances_updated, vec![1]);
        // Active dispensing completes as dispensed on expiry; the future
        // issues expire outright.
        assert_eq!(record.issue(1).unwrap().status, PrescriptionStatus::Dispensed);
        assert_eq!(record.issue(2).unwrap().status, PrescriptionStatus::Expired);
        assert_eq!(record.issue(3).unwrap().status, PrescriptionStatus::Expired);
        assert_eq!(record.prescription.current_issue_number, 3);
        for item in &record.issue(2).unwrap().line_items {
            assert_eq!(item.status, LineItemStatus::Expired);
        }
        assert_eq!(
            record.issue(2).unwrap().completion_date.as_deref(),
            Some("20260827")
        );
    }

    #[test]
    fn no_claim_action_completes_and_rolls_forward() {
        let mut record = repeat_dispense_record(2);
        record.issue_mut(1).unwrap().status = PrescriptionStatus::Dispensed;
        set_next_activity(&mut record, 1, Activity::CreateNoClaim, "20260820");
        let outcome = update_by_action(
            &mut record,
            RecordAction::CreateNoClaim,
            InstanceTarget::Available,
            &message_context(),
            &CoreConfig::default(),
        )
        .unwrap();
        assert_eq!(outcome.instances_updated, vec![1]);
        let issue = record.issue(1).unwrap();
        assert_eq!(issue.status, PrescriptionStatus::NoClaimed);
        assert_eq!(issue.claim.received_date.as_deref(), Some("20260827"));
        assert_eq!(issue.completion_date.as_deref(), Some("20260827"));
        // The next repeat issue opened and became current.
        assert_eq!(record.prescription.current_issue_number, 2);
    }

    #[test]
    fn delete_refused_unless_every_issue_is_due_for_delete() {
        let mut record = repeat_dispense_record(2);
        set_next_activity(&mut record, 1, Activity::Delete, "20260801");
        set_next_activity(&mut record, 2, Activity::Expire, "20270801");
        let outcome = update_by_action(
            &mut record,
            RecordAction::Delete,
            InstanceTarget::Available,
            &message_context(),
            &CoreConfig::default(),
        )
        .unwrap();
        assert!(outcome.record_to_delete.is_none());
    }

    #[test]
    fn delete_emits_record_and_document_keys() {
        let mut record = acute_record(PrescriptionStatus::Expired);
        record.documents = vec!["doc-1".to_owned(), "doc-2".to_owned()];
        record.prescription.prescription_id = "7D9625-Z72BF2-11E3AC".to_owned();
        set_next_activity(&mut record, 1, Activity::Delete, "20260801");
        let outcome = update_by_action(
            &mut record,
            RecordAction::Delete,
            InstanceTarget::Available,
            &message_context(),
            &CoreConfig::default(),
        )
        .unwrap();
        assert_eq!(outcome.record_to_delete.as_deref(), Some("7D9625-Z72BF2-11E3A"));
        assert_eq!(outcome.documents_to_delete.len(), 2);
        assert!(!outcome.updates_to_apply);
    }

    #[test]
    fn reset_current_instance_without_movement_skips_the_write() {
        let mut record = acute_record(PrescriptionStatus::ToBeDispensed);
        let outcome = update_by_action(
            &mut record,
            RecordAction::ResetCurrentInstance,
            InstanceTarget::Available,
            &message_context(),
            &CoreConfig::default(),
        )
        .unwrap();
        assert!(!outcome.updates_to_apply);
    }
}
