//! Search index terms derived from a record.
//!
//! Every record write regenerates its full set of index terms; the storage
//! layer diffs them against what is already persisted. Site-status terms
//! join with an underscore, composite search terms with `|`, and the
//! search terms are overloaded with release version and status so one
//! index serves both broad and narrow queries.

use std::collections::{BTreeMap, BTreeSet};

use eps_types::Activity;

use crate::model::Record;
use crate::{EpsError, EpsResult};

pub const INDEX_NHSNUMBER_DATE: &str = "nhsNumberDate_bin";
pub const INDEX_NHSNUMBER_PRESCRIBER_DATE: &str = "nhsNumberPrescriberDate_bin";
pub const INDEX_NHSNUMBER_PRESC_DISP_DATE: &str = "nhsNumberPrescDispDate_bin";
pub const INDEX_NHSNUMBER_DISPENSER_DATE: &str = "nhsNumberDispenserDate_bin";
pub const INDEX_PRESCRIBER_DATE: &str = "prescriberDate_bin";
pub const INDEX_PRESC_DISP_DATE: &str = "prescDispDate_bin";
pub const INDEX_DISPENSER_DATE: &str = "dispenserDate_bin";
pub const INDEX_PRESCRIBER_STATUS: &str = "prescribingSiteStatus_bin";
pub const INDEX_DISPENSER_STATUS: &str = "dispensingSiteStatus_bin";
pub const INDEX_NOM_PHARM_STATUS: &str = "nomPharmStatus_bin";
pub const INDEX_NEXT_ACTIVITY: &str = "nextActivityNAD_bin";
pub const INDEX_NHSNUMBER: &str = "nhsNumber_bin";
pub const INDEX_DELTA: &str = "delta_bin";

pub const SEPARATOR: &str = "|";

/// Full set of index terms for one record, keyed by index name.
pub type IndexTerms = BTreeMap<&'static str, Vec<String>>;

fn mandatory<'a>(value: Option<&'a str>, index: &'static str) -> EpsResult<&'a str> {
    value.ok_or_else(|| EpsError::MissingField(index.to_owned()))
}

/// The distinct status codes across all issues, in code order.
fn status_codes(record: &Record) -> Vec<&'static str> {
    record
        .issues
        .values()
        .map(|issue| issue.status.code())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// The dispensing site for an issue, falling back to the nominated
/// pharmacy when the issue has not been downloaded yet.
fn dispensing_site_or_nominated<'a>(record: &'a Record, issue_number: u32) -> Option<&'a str> {
    record
        .issues
        .get(&issue_number)
        .and_then(|issue| issue.dispense.dispensing_organization.as_deref())
        .or(record.nomination.nominated_performer.as_deref())
}

/// Suffix each prefix with the release version and every current status.
fn add_release_and_status<I>(record: &Record, prefixes: I) -> Vec<String>
where
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    let release = eps_id::ReleaseVersion::from_prescription_id(&record.prescription.prescription_id);
    let statuses = status_codes(record);
    let mut terms = Vec::new();
    for prefix in prefixes {
        for status in &statuses {
            terms.push(format!(
                "{}{SEPARATOR}{}{SEPARATOR}{}",
                prefix.as_ref(),
                release.as_str(),
                status
            ));
        }
    }
    terms
}

/// Per-issue `site|prescriptionTime` prefixes, deduplicated.
fn dispenser_date_prefixes(record: &Record, prescription_time: &str, leading: &str) -> Vec<String> {
    let mut prefixes = BTreeSet::new();
    for number in record.issues.keys() {
        if let Some(site) = dispensing_site_or_nominated(record, *number) {
            prefixes.insert(format!("{leading}{site}{SEPARATOR}{prescription_time}"));
        }
    }
    prefixes.into_iter().collect()
}

fn try_build_indexes(
    record: &Record,
    next_activity: Activity,
    next_activity_date: &str,
    time_now: &str,
    internal_id: &str,
) -> EpsResult<IndexTerms> {
    let mut terms = IndexTerms::new();
    let statuses = status_codes(record);

    let prescriber = mandatory(
        record.prescription.prescribing_organization.as_deref(),
        INDEX_PRESCRIBER_STATUS,
    )?;
    terms.insert(
        INDEX_PRESCRIBER_STATUS,
        statuses.iter().map(|s| format!("{prescriber}_{s}")).collect(),
    );

    let mut dispensing_site_statuses = BTreeSet::new();
    for (number, issue) in &record.issues {
        if let Some(site) = dispensing_site_or_nominated(record, *number) {
            dispensing_site_statuses.insert(format!("{site}_{}", issue.status.code()));
        }
    }
    terms.insert(
        INDEX_DISPENSER_STATUS,
        dispensing_site_statuses.into_iter().collect(),
    );

    if let Some(nominated) = record.nomination.nominated_performer.as_deref() {
        let nominated_terms: Vec<String> =
            statuses.iter().map(|s| format!("{nominated}_{s}")).collect();
        tracing::info!(
            internal_id,
            nominated_pharmacy = nominated,
            terms = ?nominated_terms,
            "EPS0617 nominated pharmacy index terms built"
        );
        terms.insert(INDEX_NOM_PHARM_STATUS, nominated_terms);
    } else {
        tracing::info!(internal_id, "EPS0618 no nominated pharmacy to index");
    }

    let next_activity_term = if next_activity_date.is_empty() {
        next_activity.to_string()
    } else {
        format!("{next_activity}_{next_activity_date}")
    };
    terms.insert(INDEX_NEXT_ACTIVITY, vec![next_activity_term]);

    let nhs_number = mandatory(record.prescription.nhs_number.as_deref(), INDEX_NHSNUMBER)?;
    terms.insert(INDEX_NHSNUMBER, vec![nhs_number.to_owned()]);

    let prescription_time = mandatory(
        record.prescription.prescription_time.as_deref(),
        INDEX_NHSNUMBER_DATE,
    )?;
    terms.insert(
        INDEX_NHSNUMBER_DATE,
        add_release_and_status(record, [format!("{nhs_number}{SEPARATOR}{prescription_time}")]),
    );
    terms.insert(
        INDEX_NHSNUMBER_PRESCRIBER_DATE,
        add_release_and_status(
            record,
            [format!(
                "{nhs_number}{SEPARATOR}{prescriber}{SEPARATOR}{prescription_time}"
            )],
        ),
    );

    let presc_disp = dispenser_date_prefixes(
        record,
        prescription_time,
        &format!("{nhs_number}{SEPARATOR}{prescriber}{SEPARATOR}"),
    );
    if !presc_disp.is_empty() {
        terms.insert(
            INDEX_NHSNUMBER_PRESC_DISP_DATE,
            add_release_and_status(record, presc_disp),
        );
    }
    let nhs_disp = dispenser_date_prefixes(
        record,
        prescription_time,
        &format!("{nhs_number}{SEPARATOR}"),
    );
    if !nhs_disp.is_empty() {
        terms.insert(
            INDEX_NHSNUMBER_DISPENSER_DATE,
            add_release_and_status(record, nhs_disp),
        );
    }

    terms.insert(
        INDEX_PRESCRIBER_DATE,
        add_release_and_status(record, [format!("{prescriber}{SEPARATOR}{prescription_time}")]),
    );
    let prescriber_disp =
        dispenser_date_prefixes(record, prescription_time, &format!("{prescriber}{SEPARATOR}"));
    if !prescriber_disp.is_empty() {
        terms.insert(
            INDEX_PRESC_DISP_DATE,
            add_release_and_status(record, prescriber_disp),
        );
    }
    let disp = dispenser_date_prefixes(record, prescription_time, "");
    if !disp.is_empty() {
        terms.insert(INDEX_DISPENSER_DATE, add_release_and_status(record, disp));
    }

    terms.insert(
        INDEX_DELTA,
        vec![format!("{time_now}{SEPARATOR}{}", record.scn())],
    );
    Ok(terms)
}

/// Build the full index term set for a record write.
///
/// The next activity is passed in from the rollup so the index and the
/// persisted schedule cannot disagree.
pub fn build_indexes(
    record: &Record,
    next_activity: Activity,
    next_activity_date: &str,
    time_now: &str,
    internal_id: &str,
) -> EpsResult<IndexTerms> {
    try_build_indexes(record, next_activity, next_activity_date, time_now, internal_id).map_err(
        |e| {
            tracing::error!(internal_id, error = %e, "EPS0124 failed to build index terms");
            EpsError::MessageFailure(format!("failed to build index terms: {e}"))
        },
    )
}
