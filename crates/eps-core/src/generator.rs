//! Next-activity scheduling for a single issue.
//!
//! Every issue carries a "next activity": the housekeeping action that falls
//! due if nothing else happens to it first, and the date it falls due. The
//! activity depends only on the issue's status and a handful of dates, so
//! the calculation is a pure function of the record and the reference
//! periods.

use chrono::NaiveDate;

use eps_id::ReleaseVersion;
use eps_types::{Activity, PrescriptionStatus};

use crate::config::CoreConfig;
use crate::model::{Issue, Record};
use crate::time::{date_part, format_date, parse_date};
use crate::{EpsError, EpsResult};

/// The scheduling decision for one issue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NextActivityOutcome {
    pub activity: Activity,
    /// `YYYYMMDD` date the activity falls due.
    pub date: String,
    /// The issue's effective expiry date, where the status has one.
    pub expiry_date: Option<NaiveDate>,
}

fn parse_or_default(value: Option<&String>, default: NaiveDate) -> EpsResult<NaiveDate> {
    match value {
        Some(raw) => parse_date(date_part(raw)),
        None => Ok(default),
    }
}

fn parse_optional(value: Option<&String>) -> EpsResult<Option<NaiveDate>> {
    value.map(|raw| parse_date(date_part(raw))).transpose()
}

/// Decide the next activity for `issue`.
///
/// `today` stands in for any date the record does not supply, except the
/// nominated download date and the dispense window low date, whose absence
/// is meaningful.
pub fn next_activity_for_issue(
    record: &Record,
    issue: &Issue,
    config: &CoreConfig,
    today: NaiveDate,
) -> EpsResult<NextActivityOutcome> {
    let periods = config.periods();
    let prescription_date = parse_or_default(
        record.prescription.prescription_time.as_ref(),
        today,
    )?;

    // Issues beyond the first of a repeat dispense prescription run on the
    // longer repeat dispense expiry period.
    let expiry_period = if issue.number > 1 {
        periods.repeat_dispense_expiry_period
    } else {
        periods.prescription_expiry_period
    };
    let expiry_date = expiry_period.add_to(prescription_date)?;

    match issue.status {
        PrescriptionStatus::ToBeDispensed
        | PrescriptionStatus::WithDispenser
        | PrescriptionStatus::RepeatDispenseFutureInstance => Ok(NextActivityOutcome {
            activity: Activity::Expire,
            date: format_date(expiry_date),
            expiry_date: Some(expiry_date),
        }),

        PrescriptionStatus::WithDispenserActive => {
            let last_dispense_date =
                parse_or_default(issue.dispense.last_dispense_date.as_ref(), today)?;
            let max_dispense_time = periods
                .with_dispenser_active_expiry_period
                .add_to(last_dispense_date)?;
            let effective_expiry = max_dispense_time.min(expiry_date);

            let release_version =
                ReleaseVersion::from_prescription_id(&record.prescription.prescription_id);
            let outcome = if release_version == ReleaseVersion::R1 {
                NextActivityOutcome {
                    activity: Activity::Expire,
                    date: format_date(effective_expiry),
                    expiry_date: Some(effective_expiry),
                }
            } else if issue.dispense.last_dispense_notification_msg_ref.is_none() {
                NextActivityOutcome {
                    activity: Activity::Expire,
                    date: format_date(effective_expiry),
                    expiry_date: Some(effective_expiry),
                }
            } else {
                NextActivityOutcome {
                    activity: Activity::CreateNoClaim,
                    date: format_date(max_dispense_time),
                    expiry_date: Some(effective_expiry),
                }
            };
            Ok(outcome)
        }

        PrescriptionStatus::Expired => {
            let completion = parse_or_default(issue.completion_date.as_ref(), today)?;
            Ok(NextActivityOutcome {
                activity: Activity::Delete,
                date: format_date(periods.expired_delete_period.add_to(completion)?),
                expiry_date: None,
            })
        }

        PrescriptionStatus::Cancelled => {
            let completion = parse_or_default(issue.completion_date.as_ref(), today)?;
            Ok(NextActivityOutcome {
                activity: Activity::Delete,
                date: format_date(periods.cancelled_delete_period.add_to(completion)?),
                expiry_date: None,
            })
        }

        PrescriptionStatus::NotDispensed => {
            let completion = parse_or_default(issue.completion_date.as_ref(), today)?;
            Ok(NextActivityOutcome {
                activity: Activity::Delete,
                date: format_date(periods.not_dispensed_delete_period.add_to(completion)?),
                expiry_date: None,
            })
        }

        PrescriptionStatus::Dispensed => {
            // A dispensed issue with no claim is chased after the
            // notification delay. Records from the older identifier
            // generation have no claim channel, so they just delete.
            let completion = parse_or_default(issue.completion_date.as_ref(), today)?;
            let due = periods.notification_delay_period.add_to(completion)?;
            let release_version =
                ReleaseVersion::from_prescription_id(&record.prescription.prescription_id);
            let activity = if release_version == ReleaseVersion::R1 {
                Activity::Delete
            } else {
                Activity::CreateNoClaim
            };
            Ok(NextActivityOutcome {
                activity,
                date: format_date(due),
                expiry_date: None,
            })
        }

        PrescriptionStatus::Claimed | PrescriptionStatus::NoClaimed => {
            let claim_sent = parse_or_default(issue.claim.received_date.as_ref(), today)?;
            Ok(NextActivityOutcome {
                activity: Activity::Delete,
                date: format_date(periods.claimed_delete_period.add_to(claim_sent)?),
                expiry_date: None,
            })
        }

        PrescriptionStatus::AwaitingReleaseReady => {
            let low_date = parse_optional(issue.dispense_window_low_date.as_ref())?;
            let nominated = parse_optional(issue.nominated_download_date.as_ref())?;
            let ready_date = nominated.or(low_date).ok_or_else(|| {
                EpsError::MissingField("dispenseWindowLowDate".to_owned())
            })?;
            let outcome = if ready_date < expiry_date {
                NextActivityOutcome {
                    activity: Activity::Ready,
                    date: format_date(ready_date),
                    expiry_date: Some(expiry_date),
                }
            } else {
                NextActivityOutcome {
                    activity: Activity::Expire,
                    date: format_date(expiry_date),
                    expiry_date: Some(expiry_date),
                }
            };
            Ok(outcome)
        }

        PrescriptionStatus::FutureDatedPrescription => {
            let low_date = parse_optional(issue.dispense_window_low_date.as_ref())?;
            let ready_date = match low_date {
                Some(low) => low.max(prescription_date),
                None => prescription_date,
            };
            let ready_date_string = format_date(ready_date);

            // A nominated download date overrides the comparison against
            // expiry but not the published ready date.
            let comparison_date = parse_optional(issue.nominated_download_date.as_ref())?
                .unwrap_or(ready_date);
            let outcome = if comparison_date < expiry_date {
                NextActivityOutcome {
                    activity: Activity::Ready,
                    date: ready_date_string,
                    expiry_date: Some(expiry_date),
                }
            } else {
                NextActivityOutcome {
                    activity: Activity::Expire,
                    date: format_date(expiry_date),
                    expiry_date: Some(expiry_date),
                }
            };
            Ok(outcome)
        }

        PrescriptionStatus::PendingCancellation => {
            let due = periods.cancelled_delete_period.add_to(today)?;
            Ok(NextActivityOutcome {
                activity: Activity::Delete,
                date: format_date(due),
                expiry_date: None,
            })
        }
    }
}
