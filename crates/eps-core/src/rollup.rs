//! Record-level next-activity index.
//!
//! Every issue gets its own next activity, but the persisted record carries
//! a single activity and date so the housekeeping scan can pick it up from
//! one index entry. The rollup walks every issue, refreshes its activity,
//! filters by the issue's position within the repeat sequence, and keeps the
//! earliest survivor.

use chrono::NaiveDate;

use eps_types::{Activity, USER_IMPACTING_ACTIVITY};

use crate::config::CoreConfig;
use crate::generator::next_activity_for_issue;
use crate::model::{NextActivity, Record};
use crate::time::{format_date, MAX_ACTIVITY_DATE};
use crate::EpsResult;

/// Which activities count for an issue, given its position in the repeat
/// sequence.
///
/// The final issue supports everything. Issues before the current one only
/// contribute their no-claim chase. The current issue supports everything
/// except deletion. Future issues contribute nothing. Earlier issues also
/// count as final when every later issue is missing from the record, which
/// happens on records migrated with gaps.
fn include_next_activity_for_issue(
    activity: Activity,
    issue_number: u32,
    current_issue_number: u32,
    issue_is_final: bool,
) -> bool {
    let issue_is_current = issue_number == current_issue_number;
    let issue_is_before_current = issue_number < current_issue_number;
    let all_remaining_issues_missing = issue_is_before_current && issue_is_final;

    let permitted: &[Activity] = if (issue_is_current && issue_is_final)
        || all_remaining_issues_missing
    {
        &[
            Activity::Expire,
            Activity::CreateNoClaim,
            Activity::Ready,
            Activity::Delete,
            Activity::Purge,
        ]
    } else if issue_is_before_current {
        &[Activity::CreateNoClaim]
    } else if issue_is_current {
        &[Activity::Expire, Activity::Ready, Activity::CreateNoClaim]
    } else {
        &[]
    };

    permitted.contains(&activity)
}

/// Refresh every issue's next activity and return the record-level pair.
///
/// Deletion is tracked separately and only wins when no other activity
/// qualifies, so an old issue awaiting deletion never masks work due on the
/// current issue. Ties on date resolve in favour of activities a patient
/// would notice, which today means making an issue ready for download.
pub fn next_activity_index(
    record: &mut Record,
    config: &CoreConfig,
    today: NaiveDate,
) -> EpsResult<(Activity, String)> {
    let mut earliest_activity_date = MAX_ACTIVITY_DATE.to_owned();
    let mut delete_date = MAX_ACTIVITY_DATE.to_owned();
    let mut earliest_activity: Option<Activity> = None;

    let current_issue_number = record.prescription.current_issue_number;
    let issue_numbers: Vec<u32> = record.issues.keys().copied().collect();

    for number in issue_numbers {
        let issue = record.issue(number)?;
        let outcome = next_activity_for_issue(record, issue, config, today)?;
        let issue_is_final = record.is_final_issue(number);

        let issue = record.issue_mut(number)?;
        issue.next_activity = Some(NextActivity {
            activity: outcome.activity,
            date: outcome.date.clone(),
        });
        issue.expiry_date = outcome.expiry_date.map(format_date);

        if !include_next_activity_for_issue(
            outcome.activity,
            number,
            current_issue_number,
            issue_is_final,
        ) {
            continue;
        }

        if outcome.activity == Activity::Delete {
            delete_date = outcome.date;
            continue;
        }

        // Dates are YYYYMMDD strings, so lexicographic order is date order.
        if outcome.date < earliest_activity_date {
            earliest_activity_date = outcome.date.clone();
            earliest_activity = Some(outcome.activity);
        }

        if outcome.date <= earliest_activity_date {
            for activity in USER_IMPACTING_ACTIVITY {
                if outcome.activity == activity || earliest_activity == Some(activity) {
                    earliest_activity = Some(activity);
                    break;
                }
            }
        }
    }

    match earliest_activity {
        Some(activity) => Ok((activity, earliest_activity_date)),
        None => Ok((Activity::Delete, delete_date)),
    }
}
