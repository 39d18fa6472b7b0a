//! Prescription and line item cancellation.

use eps_types::PrescriptionStatus;

use crate::error::CancelRejection;
use crate::model::{Cancellation, CancellationTarget, Issue, Record};
use crate::time::{date_part, parse_date_time};
use crate::EpsResult;

/// Why the current issue cannot be cancelled, or `None` when it can.
pub fn cancellation_rejection(record: &Record) -> EpsResult<Option<CancelRejection>> {
    let issue = record.current_issue()?;
    let status = issue.status;
    if status.is_cancellable() || status == PrescriptionStatus::PendingCancellation {
        return Ok(None);
    }

    tracing::info!(
        current_instance = record.prescription.current_issue_number,
        current_status = %status,
        cancellation_type = "prescription",
        "EPS0262 cancellation refused for current status"
    );

    let rejection = match status {
        PrescriptionStatus::Expired => CancelRejection::NotCancelledExpired,
        PrescriptionStatus::Cancelled => CancelRejection::NotCancelledCancelled,
        PrescriptionStatus::NotDispensed => CancelRejection::NotCancelledNotDispensed,
        PrescriptionStatus::WithDispenser => CancelRejection::NotCancelledWithDispenser,
        PrescriptionStatus::WithDispenserActive => {
            CancelRejection::NotCancelledWithDispenserActive
        }
        _ => CancelRejection::NotCancelledDispensed,
    };
    Ok(Some(rejection))
}

/// Why a line item on the current issue cannot be cancelled.
pub fn line_cancellation_rejection(
    record: &Record,
    line_item_ref: &str,
) -> EpsResult<Option<CancelRejection>> {
    use eps_types::LineItemStatus;

    let issue = record.current_issue()?;
    let status = match issue.line_item(line_item_ref) {
        Some(item) => item.status,
        None => {
            tracing::info!(
                cancellation_type = "lineItem",
                line_item = %line_item_ref,
                "EPS0262 cancellation target not found"
            );
            return Ok(Some(CancelRejection::PrescriptionNotFound));
        }
    };
    if status == LineItemStatus::ToBeDispensed {
        return Ok(None);
    }

    tracing::info!(
        current_instance = record.prescription.current_issue_number,
        cancellation_type = "lineItem",
        current_status = %status,
        "EPS0262 line item cancellation refused for current status"
    );

    let rejection = match status {
        LineItemStatus::FullyDispensed => CancelRejection::NotCancelledDispensed,
        LineItemStatus::NotDispensed => CancelRejection::NotCancelledNotDispensed,
        LineItemStatus::Cancelled => CancelRejection::NotCancelledCancelled,
        LineItemStatus::Expired => CancelRejection::NotCancelledExpired,
        _ => CancelRejection::NotCancelledWithDispenserActive,
    };
    Ok(Some(rejection))
}

fn process_instance_cancellation(issue: &mut Issue, cancellation: &Cancellation) -> EpsResult<()> {
    parse_date_time(&cancellation.time)?;
    issue.set_status(PrescriptionStatus::Cancelled);
    issue.cancellations.push(cancellation.clone());
    issue.completion_date = Some(date_part(&cancellation.time).to_owned());
    Ok(())
}

fn process_line_cancellation(issue: &mut Issue, cancellation: &Cancellation) -> EpsResult<()> {
    let mut active_line_item = false;
    for item in &mut issue.line_items {
        if cancellation.line_item_ref.as_deref() != Some(item.id.as_str()) {
            if item.status.is_active() {
                active_line_item = true;
            }
            continue;
        }
        item.previous_status = Some(item.status);
        item.status = eps_types::LineItemStatus::Cancelled;
    }
    issue.cancellations.push(cancellation.clone());

    if !active_line_item {
        process_instance_cancellation(issue, cancellation)?;
    }
    Ok(())
}

/// Apply a validated cancellation from `start_issue` (the current issue by
/// default) upwards, then re-resolve the current issue.
///
/// Returns the cancellation id and the issue numbers it touched.
pub fn apply_cancellation(
    record: &mut Record,
    cancellation: &Cancellation,
    start_issue: Option<u32>,
) -> EpsResult<(String, Vec<u32>)> {
    let start = start_issue.unwrap_or(record.prescription.current_issue_number);
    let issue_numbers = record.issue_numbers_from(start);
    for number in &issue_numbers {
        let issue = record.issue_mut(*number)?;
        match cancellation.target {
            CancellationTarget::LineItem => process_line_cancellation(issue, cancellation)?,
            CancellationTarget::Prescription => {
                process_instance_cancellation(issue, cancellation)?
            }
        }
    }
    record.reset_current_instance();
    Ok((cancellation.id.clone(), issue_numbers))
}

fn target_key(cancellation: &Cancellation) -> String {
    match cancellation.target {
        CancellationTarget::Prescription => "Prescription".to_owned(),
        CancellationTarget::LineItem => format!(
            "LineItem_{}",
            cancellation.line_item_ref.as_deref().unwrap_or("")
        ),
    }
}

fn log_duplicate_pending(pending: &Cancellation, cancellation: &Cancellation) {
    tracing::info!(
        pending_org = pending.agent_organization.as_deref().unwrap_or(""),
        cancellation_target = %target_key(cancellation),
        cancellation_org = cancellation.agent_organization.as_deref().unwrap_or(""),
        "EPS0264a duplicate pending cancellation"
    );
}

/// Uniqueness check for a pending cancellation queued before the
/// prescription has been received.
///
/// A queued whole-prescription cancellation conflicts with every further
/// request, since it will cancel everything on receipt. Returns whether the
/// request is unique and, when it is not, whether the requesting
/// organisation matches the queued one.
pub fn check_pending_cancellation_unique(
    record: &Record,
    cancellation: &Cancellation,
) -> (bool, Option<bool>) {
    if record.pending_cancellations.is_empty() {
        return (true, None);
    }
    let cancellation_target = target_key(cancellation);

    for pending in &record.pending_cancellations {
        let whole_prescription = pending.target == CancellationTarget::Prescription;
        let pending_target = target_key(pending);
        if pending_target == cancellation_target || whole_prescription {
            let org_match = pending.agent_organization == cancellation.agent_organization;
            log_duplicate_pending(pending, cancellation);
            return (false, Some(org_match));
        }
    }
    (true, None)
}

/// Uniqueness check for a pending cancellation queued while the
/// prescription is with a dispenser.
///
/// Here a whole-prescription cancellation and a line item cancellation are
/// independent requests: depending on what the dispenser does, either, both
/// or neither may eventually apply. Only a same-target duplicate conflicts.
pub fn check_pending_cancellation_unique_with_dispenser(
    record: &Record,
    cancellation: &Cancellation,
) -> (bool, Option<bool>) {
    if record.pending_cancellations.is_empty() {
        return (true, None);
    }
    let cancellation_target = target_key(cancellation);

    for pending in &record.pending_cancellations {
        if target_key(pending) == cancellation_target {
            let org_match = pending.agent_organization == cancellation.agent_organization;
            log_duplicate_pending(pending, cancellation);
            return (false, Some(org_match));
        }
    }
    (true, None)
}

/// Queue a cancellation that arrived ahead of the prescription, or while
/// the prescription cannot yet be cancelled.
///
/// When the prescription itself has not arrived, issue 1 parks in
/// PendingCancellation, and the first queued cancellation backfills the
/// missing prescription time so scheduling has a date to work from.
pub fn set_pending_cancellation(
    record: &mut Record,
    cancellation: Cancellation,
    prescription_present: bool,
) -> EpsResult<()> {
    if !prescription_present {
        record
            .issue_mut(1)?
            .set_status(PrescriptionStatus::PendingCancellation);
    }

    if record.pending_cancellations.is_empty() {
        let cancellation_date = date_part(&cancellation.time).to_owned();
        if record.prescription.prescription_time.is_none() {
            tracing::info!(
                cancellation_date = %cancellation_date,
                prescription_id = %record.prescription.prescription_id,
                "EPS0340 prescription time backfilled from pending cancellation"
            );
            record.prescription.prescription_time = Some(cancellation_date);
        }
    }
    record.pending_cancellations.push(cancellation);
    Ok(())
}

/// Drop the queued cancellations once they have been actioned.
pub fn remove_pending_cancellations(record: &mut Record) {
    record.pending_cancellations.clear();
}

/// Record a cancellation that could not be applied, with its failure
/// reason. Used for failed pending cancellations and duplicates, not for
/// requests that were simply invalid.
pub fn set_unsuccessful_cancellation(
    record: &mut Record,
    mut cancellation: Cancellation,
    failure_reason: &str,
) {
    cancellation.failure_reason = Some(failure_reason.to_owned());
    record
        .prescription
        .unsuccessful_cancellations
        .push(cancellation);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures::{acute_record, repeat_dispense_record};
    use eps_types::LineItemStatus;

    fn cancellation(target: CancellationTarget, line_item_ref: Option<&str>) -> Cancellation {
        Cancellation {
            id: "cancel-1".to_owned(),
            target,
            line_item_ref: line_item_ref.map(str::to_owned),
            time: "20260827150000".to_owned(),
            agent_organization: Some("A99968".to_owned()),
            reasons: vec!["0001".to_owned()],
            failure_reason: None,
        }
    }

    #[test]
    fn prescription_cancellation_cancels_all_remaining_issues() {
        let mut record = repeat_dispense_record(3);
        let c = cancellation(CancellationTarget::Prescription, None);
        let (id, issues) = apply_cancellation(&mut record, &c, None).unwrap();
        assert_eq!(id, "cancel-1");
        assert_eq!(issues, vec![1, 2, 3]);
        for number in 1..=3 {
            let issue = record.issue(number).unwrap();
            assert_eq!(issue.status, PrescriptionStatus::Cancelled);
            assert_eq!(issue.completion_date.as_deref(), Some("20260827"));
        }
        // Every issue cancelled: current resolves to the last one.
        assert_eq!(record.prescription.current_issue_number, 3);
    }

    #[test]
    fn line_cancellation_leaves_issue_open_while_items_remain() {
        let mut record = acute_record(PrescriptionStatus::ToBeDispensed);
        let c = cancellation(CancellationTarget::LineItem, Some("item-1"));
        apply_cancellation(&mut record, &c, None).unwrap();
        let issue = record.issue(1).unwrap();
        assert_eq!(issue.status, PrescriptionStatus::ToBeDispensed);
        assert_eq!(
            issue.line_item("item-1").unwrap().status,
            LineItemStatus::Cancelled
        );
        assert_eq!(
            issue.line_item("item-2").unwrap().status,
            LineItemStatus::ToBeDispensed
        );
    }

    #[test]
    fn cancelling_the_last_active_item_cancels_the_issue() {
        let mut record = acute_record(PrescriptionStatus::ToBeDispensed);
        record.issue_mut(1).unwrap().line_item_mut("item-2").unwrap().status =
            LineItemStatus::Cancelled;
        let c = cancellation(CancellationTarget::LineItem, Some("item-1"));
        apply_cancellation(&mut record, &c, None).unwrap();
        assert_eq!(record.issue(1).unwrap().status, PrescriptionStatus::Cancelled);
    }

    #[test]
    fn rejection_maps_the_issue_status() {
        let record = acute_record(PrescriptionStatus::WithDispenser);
        assert_eq!(
            cancellation_rejection(&record).unwrap(),
            Some(CancelRejection::NotCancelledWithDispenser)
        );
        let record = acute_record(PrescriptionStatus::Claimed);
        assert_eq!(
            cancellation_rejection(&record).unwrap(),
            Some(CancelRejection::NotCancelledDispensed)
        );
        let record = acute_record(PrescriptionStatus::ToBeDispensed);
        assert_eq!(cancellation_rejection(&record).unwrap(), None);
    }

    #[test]
    fn unknown_line_item_maps_to_not_found() {
        let record = acute_record(PrescriptionStatus::ToBeDispensed);
        assert_eq!(
            line_cancellation_rejection(&record, "item-9").unwrap(),
            Some(CancelRejection::PrescriptionNotFound)
        );
    }

    #[test]
    fn pending_cancellation_backfills_prescription_time() {
        let mut record = acute_record(PrescriptionStatus::ToBeDispensed);
        record.prescription.prescription_time = None;
        let c = cancellation(CancellationTarget::Prescription, None);
        set_pending_cancellation(&mut record, c, false).unwrap();
        assert_eq!(
            record.issue(1).unwrap().status,
            PrescriptionStatus::PendingCancellation
        );
        assert_eq!(
            record.prescription.prescription_time.as_deref(),
            Some("20260827")
        );
        assert_eq!(record.pending_cancellations.len(), 1);
    }

    #[test]
    fn whole_prescription_pending_conflicts_with_everything_before_receipt() {
        let mut record = acute_record(PrescriptionStatus::ToBeDispensed);
        let whole = cancellation(CancellationTarget::Prescription, None);
        set_pending_cancellation(&mut record, whole, false).unwrap();

        let line = cancellation(CancellationTarget::LineItem, Some("item-1"));
        let (unique, org_match) = check_pending_cancellation_unique(&record, &line);
        assert!(!unique);
        assert_eq!(org_match, Some(true));

        // With a dispenser the same pair is independent.
        let (unique, _) = check_pending_cancellation_unique_with_dispenser(&record, &line);
        assert!(unique);
    }

    #[test]
    fn same_target_conflicts_with_a_dispenser() {
        let mut record = acute_record(PrescriptionStatus::WithDispenser);
        let mut queued = cancellation(CancellationTarget::LineItem, Some("item-1"));
        queued.agent_organization = Some("B11111".to_owned());
        set_pending_cancellation(&mut record, queued, true).unwrap();

        let line = cancellation(CancellationTarget::LineItem, Some("item-1"));
        let (unique, org_match) =
            check_pending_cancellation_unique_with_dispenser(&record, &line);
        assert!(!unique);
        assert_eq!(org_match, Some(false));
    }

    #[test]
    fn unsuccessful_cancellation_is_recorded_with_its_reason() {
        let mut record = acute_record(PrescriptionStatus::ToBeDispensed);
        let c = cancellation(CancellationTarget::Prescription, None);
        set_unsuccessful_cancellation(&mut record, c, "duplicate");
        let failed = &record.prescription.unsuccessful_cancellations[0];
        assert_eq!(failed.failure_reason.as_deref(), Some("duplicate"));
    }
}
