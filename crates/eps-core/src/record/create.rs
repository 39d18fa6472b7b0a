//! Record creation from an inbound prescription.

use std::collections::BTreeMap;

use chrono::Duration;

use eps_types::{LineItemStatus, PrescriptionStatus, TreatmentType};

use crate::context::MessageContext;
use crate::model::{Issue, LineItem, Nomination, Prescription, Record};
use crate::time::{parse_date, parse_date_time};
use crate::{EpsError, EpsResult};

/// The prescription detail extracted from an inbound prescribe message.
#[derive(Debug, Clone)]
pub struct NewPrescription {
    pub prescription_id: String,
    pub treatment_type: TreatmentType,
    /// `YYYYMMDDHHMMSS`.
    pub prescription_time: String,
    pub signed_time: Option<String>,
    pub prescription_type: Option<String>,
    pub max_repeats: Option<u32>,
    pub days_supply: Option<u32>,
    pub nhs_number: Option<String>,
    pub birth_time: Option<String>,
    pub prescribing_organization: Option<String>,
    pub prescription_msg_ref: Option<String>,
    pub nominated_performer: Option<String>,
    pub nominated_performer_type: Option<String>,
    /// `YYYYMMDD` dispensing window, where the prescription carries one.
    pub dispense_window_low_date: Option<String>,
    pub dispense_window_high_date: Option<String>,
    pub line_items: Vec<LineItem>,
}

/// Build a record from an inbound prescription.
///
/// Repeat dispense prescriptions materialise every issue up front: issues
/// beyond the first start as future instances, and line items whose own
/// repeat count runs out before an issue are created already expired on it.
pub fn create_record(new: NewPrescription, context: &MessageContext) -> EpsResult<Record> {
    let max_repeats = match new.treatment_type {
        TreatmentType::RepeatDispensing => new
            .max_repeats
            .ok_or_else(|| EpsError::MissingField("maxRepeats".to_owned()))?,
        _ => 1,
    };

    let mut issues = BTreeMap::new();
    for number in 1..=max_repeats {
        let line_items = new
            .line_items
            .iter()
            .cloned()
            .map(|mut item| {
                if let Some(item_max) = item.max_repeats {
                    if item_max < number {
                        item.status = LineItemStatus::Expired;
                    }
                }
                item
            })
            .collect();
        let status = if number == 1 {
            PrescriptionStatus::ToBeDispensed
        } else {
            PrescriptionStatus::RepeatDispenseFutureInstance
        };
        let mut issue = Issue::new(number, status, line_items);
        issue.dispense_window_low_date = new.dispense_window_low_date.clone();
        issue.dispense_window_high_date = new.dispense_window_high_date.clone();
        issues.insert(number, issue);
    }

    let mut record = Record {
        prescription: Prescription {
            prescription_id: new.prescription_id,
            treatment_type: new.treatment_type,
            prescription_time: Some(new.prescription_time),
            signed_time: new.signed_time,
            prescription_type: new.prescription_type,
            max_repeats: new.max_repeats,
            current_issue_number: 1,
            days_supply: new.days_supply,
            nhs_number: new.nhs_number,
            birth_time: new.birth_time,
            prescribing_organization: new.prescribing_organization,
            prescription_msg_ref: new.prescription_msg_ref,
            exemption: None,
            unsuccessful_cancellations: Vec::new(),
        },
        issues,
        nomination: Nomination {
            nominated_performer: new.nominated_performer,
            nominated_performer_type: new.nominated_performer_type,
            nomination_history: Vec::new(),
        },
        pending_cancellations: Vec::new(),
        change_log: BTreeMap::new(),
        documents: Vec::new(),
        scn: crate::changelog::INITIAL_SCN,
        pending_instance_change: None,
    };

    set_initial_prescription_status(&mut record, context)?;
    crate::changelog::log_record_creation(&mut record, context)?;
    Ok(record)
}

/// Decide the first issue's opening status.
///
/// A prescription must not be downloadable before its start date: written
/// more than a day ahead of handling it opens as future dated. Repeat
/// dispensing also respects a future dispense window low date. Later repeat
/// issues already carry their future-instance status.
pub fn set_initial_prescription_status(
    record: &mut Record,
    context: &MessageContext,
) -> EpsResult<()> {
    let future_threshold = context.handle_time + Duration::days(1);

    let prescription_time = record
        .prescription
        .prescription_time
        .as_deref()
        .ok_or_else(|| EpsError::MissingField("prescriptionTime".to_owned()))?;
    let mut is_future_dated = parse_date_time(prescription_time)? > future_threshold;

    if record.prescription.treatment_type == TreatmentType::RepeatDispensing {
        let first = record.issue(1)?;
        if let Some(low_date) = first.dispense_window_low_date.as_deref() {
            let low = parse_date(low_date)?
                .and_hms_opt(0, 0, 0)
                .ok_or_else(|| EpsError::InvalidDate(low_date.to_owned()))?;
            if low > future_threshold {
                is_future_dated = true;
            }
        }
    }

    let first = record.issue_mut(1)?;
    first.status = if is_future_dated {
        PrescriptionStatus::FutureDatedPrescription
    } else {
        PrescriptionStatus::ToBeDispensed
    };
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::fixtures::message_context;
    use crate::model::fixtures::line_item;

    fn new_prescription() -> NewPrescription {
        NewPrescription {
            prescription_id: "7D9625-Z72BF2-11E3A".to_owned(),
            treatment_type: TreatmentType::Acute,
            prescription_time: "20260827120000".to_owned(),
            signed_time: Some("20260827120000".to_owned()),
            prescription_type: Some("0101".to_owned()),
            max_repeats: None,
            days_supply: None,
            nhs_number: Some("9434765919".to_owned()),
            birth_time: Some("19800115".to_owned()),
            prescribing_organization: Some("A99968".to_owned()),
            prescription_msg_ref: Some("doc-parent".to_owned()),
            nominated_performer: None,
            nominated_performer_type: None,
            dispense_window_low_date: None,
            dispense_window_high_date: None,
            line_items: vec![line_item("item-1", LineItemStatus::ToBeDispensed)],
        }
    }

    #[test]
    fn same_day_prescription_opens_to_be_dispensed() {
        let record = create_record(new_prescription(), &message_context()).unwrap();
        assert_eq!(record.issue(1).unwrap().status, PrescriptionStatus::ToBeDispensed);
        assert_eq!(record.max_repeats(), 1);
    }

    #[test]
    fn creation_seeds_the_change_log() {
        let record = create_record(new_prescription(), &message_context()).unwrap();
        let logged = record.change_log.get("msg-0001").unwrap();
        assert_eq!(logged.scn, record.scn());
        assert_eq!(logged.from_status, None);
        assert_eq!(logged.to_status, Some(PrescriptionStatus::ToBeDispensed));
        assert_eq!(logged.issues_altered_by_change, vec![1]);
    }

    #[test]
    fn day_ahead_boundary_is_not_future_dated() {
        // Handle time 20260827143000; exactly one day ahead is allowed.
        let mut new = new_prescription();
        new.prescription_time = "20260828143000".to_owned();
        let record = create_record(new, &message_context()).unwrap();
        assert_eq!(record.issue(1).unwrap().status, PrescriptionStatus::ToBeDispensed);
    }

    #[test]
    fn one_second_past_the_boundary_is_future_dated() {
        let mut new = new_prescription();
        new.prescription_time = "20260828143001".to_owned();
        let record = create_record(new, &message_context()).unwrap();
        assert_eq!(
            record.issue(1).unwrap().status,
            PrescriptionStatus::FutureDatedPrescription
        );
    }

    #[test]
    fn repeat_dispense_materialises_all_issues() {
        let mut new = new_prescription();
        new.treatment_type = TreatmentType::RepeatDispensing;
        new.max_repeats = Some(3);
        new.days_supply = Some(28);
        new.line_items = vec![
            line_item("item-1", LineItemStatus::ToBeDispensed),
            LineItem {
                max_repeats: Some(2),
                ..line_item("item-2", LineItemStatus::ToBeDispensed)
            },
        ];
        let record = create_record(new, &message_context()).unwrap();
        assert_eq!(record.issues.len(), 3);
        assert_eq!(record.issue(1).unwrap().status, PrescriptionStatus::ToBeDispensed);
        assert_eq!(
            record.issue(2).unwrap().status,
            PrescriptionStatus::RepeatDispenseFutureInstance
        );
        // item-2 runs out after two issues, so it opens expired on issue 3.
        assert_eq!(
            record.issue(3).unwrap().line_item("item-2").unwrap().status,
            LineItemStatus::Expired
        );
        assert_eq!(
            record.issue(2).unwrap().line_item("item-2").unwrap().status,
            LineItemStatus::ToBeDispensed
        );
    }

    #[test]
    fn future_dispense_window_makes_repeat_dispense_future_dated() {
        let mut new = new_prescription();
        new.treatment_type = TreatmentType::RepeatDispensing;
        new.max_repeats = Some(2);
        new.dispense_window_low_date = Some("20260905".to_owned());
        let record = create_record(new, &message_context()).unwrap();
        assert_eq!(
            record.issue(1).unwrap().status,
            PrescriptionStatus::FutureDatedPrescription
        );
    }

    #[test]
    fn repeat_dispense_without_max_repeats_is_rejected() {
        let mut new = new_prescription();
        new.treatment_type = TreatmentType::RepeatDispensing;
        new.max_repeats = None;
        assert!(create_record(new, &message_context()).is_err());
    }
}
