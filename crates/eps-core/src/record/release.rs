//! Release to a dispenser, dispense return, and withdrawal status mapping.

use chrono::{Days, Months};

use eps_types::{LineItemStatus, PrescriptionStatus, TreatmentType};

use crate::context::MessageContext;
use crate::model::{DispenseHistoryEntry, ExemptionDates, Issue, Record, RELEASE_HISTORY_KEY};
use crate::time::{date_part, format_date, parse_date};
use crate::{EpsError, EpsResult};

/// Age at which the young-person exemption ends.
const YOUNG_AGE_EXEMPTION_YEARS: u32 = 16;
/// Age at which the older-person exemption begins.
const OLD_AGE_EXEMPTION_YEARS: u32 = 60;

/// Release the current issue to the requesting dispenser.
///
/// The issue moves to WithDispenser, its undispensed line items follow, and
/// the requesting organisation and release date are recorded. Exemption
/// dates are derived here because the dispenser needs them on the response.
pub fn update_for_release(record: &mut Record, context: &MessageContext) -> EpsResult<()> {
    set_exemption_dates(record)?;
    let agent_organization = context.agent_organization.clone();
    let release_date = context.handle_date_string();

    let issue = record.current_issue_mut()?;
    issue.set_status(PrescriptionStatus::WithDispenser);
    issue.dispense.dispensing_organization = agent_organization;
    issue.release_date = Some(release_date);
    for item in &mut issue.line_items {
        if item.status == LineItemStatus::ToBeDispensed {
            item.previous_status = Some(item.status);
            item.status = LineItemStatus::WithDispenser;
        }
    }
    Ok(())
}

/// Derive the patient's age-exemption date limits from the birth time.
///
/// The lower limit is the day before the sixteenth birthday; the higher
/// limit is the sixtieth birthday.
pub fn set_exemption_dates(record: &mut Record) -> EpsResult<()> {
    let birth = match record.prescription.birth_time.as_deref() {
        Some(raw) => parse_date(date_part(raw))?,
        None => return Ok(()),
    };
    let lower = birth
        .checked_add_months(Months::new(YOUNG_AGE_EXEMPTION_YEARS * 12))
        .and_then(|d| d.checked_sub_days(Days::new(1)))
        .ok_or_else(|| EpsError::InvalidDate(format!("{birth}")))?;
    let higher = birth
        .checked_add_months(Months::new(OLD_AGE_EXEMPTION_YEARS * 12))
        .ok_or_else(|| EpsError::InvalidDate(format!("{birth}")))?;
    record.prescription.exemption = Some(ExemptionDates {
        lower_age_limit: format_date(lower),
        higher_age_limit: format_date(higher),
    });
    Ok(())
}

/// Snapshot the issue as released, under the fixed release history key, so
/// a later dispense withdrawal can rewind to the point of release.
pub fn create_release_history_entry(issue: &mut Issue, release_time: &str) {
    let mut line_items = issue.line_items.clone();
    for item in &mut line_items {
        if !matches!(
            item.status,
            LineItemStatus::Cancelled | LineItemStatus::Expired
        ) {
            item.status = LineItemStatus::WithDispenser;
        }
    }
    let entry = DispenseHistoryEntry {
        status: issue.status,
        last_dispense_status: issue.dispense.last_dispense_status,
        last_dispense_date: Some(release_time.to_owned()),
        dispensing_organization: issue.dispense.dispensing_organization.clone(),
        line_items,
        completion_date: issue.completion_date.clone(),
    };
    issue
        .dispense_history
        .insert(RELEASE_HISTORY_KEY.to_owned(), entry);
}

/// Return the current issue from the dispenser.
///
/// The dispensing organisation is cleared and the issue goes back to
/// ToBeDispensed. Unless the caller retains it, the nomination is retired
/// into the nomination history so the next download is not steered to the
/// pharmacy that just gave the prescription back.
pub fn update_for_return(record: &mut Record, retain_nomination: bool) -> EpsResult<()> {
    let issue = record.current_issue_mut()?;
    issue.dispense.dispensing_organization = None;
    issue.set_status(PrescriptionStatus::ToBeDispensed);
    for item in &mut issue.line_items {
        if item.status == LineItemStatus::WithDispenser {
            item.previous_status = Some(item.status);
            item.status = LineItemStatus::ToBeDispensed;
        }
    }

    if !retain_nomination {
        if let Some(performer) = record.nomination.nominated_performer.take() {
            if !record.nomination.nomination_history.contains(&performer) {
                record.nomination.nomination_history.push(performer);
            }
            record.nomination.nominated_performer_type = None;
        }
    }
    Ok(())
}

/// Map a requested withdrawal status for the record kind.
///
/// A repeat dispense issue cannot go back past WithDispenserActive once
/// dispensing has started on it.
pub fn withdrawn_status(
    treatment_type: TreatmentType,
    requested: PrescriptionStatus,
) -> PrescriptionStatus {
    if treatment_type == TreatmentType::RepeatDispensing
        && requested == PrescriptionStatus::WithDispenser
    {
        return PrescriptionStatus::WithDispenserActive;
    }
    requested
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::fixtures::message_context;
    use crate::model::fixtures::acute_record;

    #[test]
    fn release_moves_issue_and_items_to_with_dispenser() {
        let mut record = acute_record(PrescriptionStatus::ToBeDispensed);
        update_for_release(&mut record, &message_context()).unwrap();
        let issue = record.issue(1).unwrap();
        assert_eq!(issue.status, PrescriptionStatus::WithDispenser);
        assert_eq!(issue.previous_status, Some(PrescriptionStatus::ToBeDispensed));
        assert_eq!(issue.dispense.dispensing_organization.as_deref(), Some("FA111"));
        assert_eq!(issue.release_date.as_deref(), Some("20260827"));
        for item in &issue.line_items {
            assert_eq!(item.status, LineItemStatus::WithDispenser);
        }
    }

    #[test]
    fn exemption_dates_bracket_the_birth_date() {
        let mut record = acute_record(PrescriptionStatus::ToBeDispensed);
        record.prescription.birth_time = Some("19800115".to_owned());
        set_exemption_dates(&mut record).unwrap();
        let exemption = record.prescription.exemption.as_ref().unwrap();
        assert_eq!(exemption.lower_age_limit, "19960114");
        assert_eq!(exemption.higher_age_limit, "20400115");
    }

    #[test]
    fn return_rewinds_release_and_retires_nomination() {
        let mut record = acute_record(PrescriptionStatus::ToBeDispensed);
        record.nomination.nominated_performer = Some("FA111".to_owned());
        record.nomination.nominated_performer_type = Some("P1".to_owned());
        update_for_release(&mut record, &message_context()).unwrap();
        update_for_return(&mut record, false).unwrap();

        let issue = record.issue(1).unwrap();
        assert_eq!(issue.status, PrescriptionStatus::ToBeDispensed);
        assert!(issue.dispense.dispensing_organization.is_none());
        for item in &issue.line_items {
            assert_eq!(item.status, LineItemStatus::ToBeDispensed);
        }
        assert!(record.nomination.nominated_performer.is_none());
        assert!(record.nomination.nominated_performer_type.is_none());
        assert_eq!(record.nomination.nomination_history, vec!["FA111".to_owned()]);
    }

    #[test]
    fn return_can_retain_nomination() {
        let mut record = acute_record(PrescriptionStatus::ToBeDispensed);
        record.nomination.nominated_performer = Some("FA111".to_owned());
        update_for_release(&mut record, &message_context()).unwrap();
        update_for_return(&mut record, true).unwrap();
        assert_eq!(record.nomination.nominated_performer.as_deref(), Some("FA111"));
        assert!(record.nomination.nomination_history.is_empty());
    }

    #[test]
    fn release_history_entry_snapshots_at_release() {
        let mut record = acute_record(PrescriptionStatus::WithDispenser);
        let issue = record.issue_mut(1).unwrap();
        issue.line_items[0].status = LineItemStatus::Cancelled;
        create_release_history_entry(issue, "20260827143000");
        let entry = issue.dispense_history.get(RELEASE_HISTORY_KEY).unwrap();
        assert_eq!(entry.line_items[0].status, LineItemStatus::Cancelled);
        assert_eq!(entry.line_items[1].status, LineItemStatus::WithDispenser);
        assert_eq!(entry.last_dispense_date.as_deref(), Some("20260827143000"));
    }

    #[test]
    fn repeat_dispense_withdrawal_stops_at_active() {
        assert_eq!(
            withdrawn_status(TreatmentType::RepeatDispensing, PrescriptionStatus::WithDispenser),
            PrescriptionStatus::WithDispenserActive
        );
        assert_eq!(
            withdrawn_status(TreatmentType::Acute, PrescriptionStatus::WithDispenser),
            PrescriptionStatus::WithDispenser
        );
    }
}
