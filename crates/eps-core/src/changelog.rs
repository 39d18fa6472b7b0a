//! Per-record change log.
//!
//! Every applied message appends an entry keyed by its message id, stamped
//! with a sequence change number (SCN). The log is pruned in flight so
//! records subject to repetitive message patterns, dispense notification
//! streams in particular, do not grow without bound.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use eps_types::{LineItemStatus, PrescriptionStatus};

use crate::context::MessageContext;
use crate::model::Record;
use crate::{EpsError, EpsResult};

/// SCN assigned to a freshly created record.
pub const INITIAL_SCN: i64 = 1;

/// Serde default for the record SCN field.
pub(crate) fn initial_scn() -> i64 {
    INITIAL_SCN
}
/// SCN value used when none could be determined.
pub const INVALID_SCN: i64 = -1;
/// Prune point that disables pruning entirely.
pub const DO_NOT_PRUNE: i64 = -1;
/// Maximum change log length before an update is refused outright.
pub const SCN_MAX: i64 = 512;

/// The oldest entries are never pruned.
const MIN_INITIAL_HISTORY: i64 = 16;
/// The newest entries are never pruned.
const MIN_RECENT_HISTORY: i64 = 16;

/// Interactions that arrive in long runs against a single record. A run of
/// these collapses down to its boundary entries when the log is pruned.
pub const REPEATING_ACTIONS: [&str; 16] = [
    "PORX_IN060102UK30",
    "PORX_IN060102SM30",
    "PORX_IN132004UK30",
    "PORX_IN132004SM30",
    "PORX_IN132004UK04",
    "PORX_IN100101UK31",
    "PORX_IN100101SM31",
    "PORX_IN100101UK04",
    "PORX_IN020101UK31",
    "PORX_IN020102UK31",
    "PORX_IN020101SM31",
    "PORX_IN020102SM31",
    "PORX_IN020101UK04",
    "PORX_IN020102UK04",
    "PORX_IN060102GB01",
    "PRESCRIPTION_DISPENSE_PROPOSAL_RETURN",
];

/// One change log entry, keyed in the record by the message id that caused
/// the change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeLogEntry {
    /// `YYYYMMDDHHMMSS` handling time of the message.
    pub timestamp: String,
    pub scn: i64,
    pub internal_id: String,
    pub interaction_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_status: Option<PrescriptionStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_status: Option<PrescriptionStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_role_profile_code_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_person_role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_person_org_code: Option<String>,
    /// Per-issue status before the change, keyed by issue number.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub pre_change_statuses: BTreeMap<u32, PrescriptionStatus>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub post_change_statuses: BTreeMap<u32, PrescriptionStatus>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub issues_altered_by_change: Vec<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pre_change_current_issue: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_change_current_issue: Option<u32>,
    /// Set when the message touched the record without a status change.
    #[serde(default)]
    pub touched: bool,
}

/// An organisation code is at most eight characters of letters, digits and
/// hyphens. Used when falling back to the dispenser code for attribution.
pub fn looks_like_org_code(value: &str) -> bool {
    !value.is_empty()
        && value.len() <= 8
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-')
}

/// Issue statuses captured before an operation runs. The change log entry
/// for the message is derived from the difference against this snapshot
/// when the update is finalised.
#[derive(Debug, Clone, Default)]
pub struct PreChangeSnapshot {
    statuses: BTreeMap<u32, PrescriptionStatus>,
    line_statuses: BTreeMap<u32, Vec<LineItemStatus>>,
    current_issue: Option<u32>,
}

impl PreChangeSnapshot {
    pub fn of(record: &Record) -> Self {
        PreChangeSnapshot {
            statuses: record
                .issues
                .iter()
                .map(|(number, issue)| (*number, issue.status))
                .collect(),
            line_statuses: record
                .issues
                .iter()
                .map(|(number, issue)| {
                    (*number, issue.line_items.iter().map(|item| item.status).collect())
                })
                .collect(),
            current_issue: Some(record.prescription.current_issue_number),
        }
    }

    /// Snapshot for a record that did not exist before the message.
    pub fn empty() -> Self {
        PreChangeSnapshot::default()
    }
}

/// Build the change log entry for the message being applied.
fn domain_update_entry(
    record: &Record,
    context: &MessageContext,
    pre: &PreChangeSnapshot,
) -> ChangeLogEntry {
    let current = record.prescription.current_issue_number;
    let post_statuses: BTreeMap<u32, PrescriptionStatus> = record
        .issues
        .iter()
        .map(|(number, issue)| (*number, issue.status))
        .collect();
    let post_line_statuses: BTreeMap<u32, Vec<LineItemStatus>> = record
        .issues
        .iter()
        .map(|(number, issue)| {
            (*number, issue.line_items.iter().map(|item| item.status).collect())
        })
        .collect();
    let issues_altered_by_change: Vec<u32> = record
        .issues
        .keys()
        .copied()
        .filter(|number| {
            pre.statuses.get(number) != post_statuses.get(number)
                || pre.line_statuses.get(number) != post_line_statuses.get(number)
        })
        .collect();
    // Attribution falls back to the dispenser when the message carries no
    // agent organisation, but only if the stored value is shaped like a
    // real organisation code.
    let agent_person_org_code = context.agent_organization.clone().or_else(|| {
        record
            .issues
            .get(&current)
            .and_then(|issue| issue.dispense.dispensing_organization.as_deref())
            .filter(|code| looks_like_org_code(code))
            .map(str::to_owned)
    });
    let touched =
        issues_altered_by_change.is_empty() && pre.current_issue == Some(current);
    ChangeLogEntry {
        timestamp: context.handle_time_string(),
        scn: record.scn(),
        internal_id: context.internal_id.clone(),
        interaction_id: context.interaction_id.clone(),
        instance: Some(current),
        from_status: pre.statuses.get(&current).copied(),
        to_status: record.issues.get(&current).map(|issue| issue.status),
        agent_role_profile_code_id: context.agent_role_profile_code_id.clone(),
        agent_person_role: context.agent_person_role.clone(),
        agent_person_org_code,
        pre_change_statuses: pre.statuses.clone(),
        post_change_statuses: post_statuses,
        issues_altered_by_change,
        pre_change_current_issue: pre.current_issue,
        post_change_current_issue: Some(current),
        touched,
    }
}

/// Seed a freshly created record's change log with its creation entry.
pub fn log_record_creation(record: &mut Record, context: &MessageContext) -> EpsResult<()> {
    let entry = domain_update_entry(record, context, &PreChangeSnapshot::empty());
    update_change_log(&mut record.change_log, &context.message_id, entry, SCN_MAX)
}

/// Stamp an applied message onto the record.
///
/// Called once per message after its operations have run: increments the
/// SCN, derives the change log entry from the pre-operation snapshot, and
/// prunes at [`SCN_MAX`]. A record whose SCN has already reached
/// [`SCN_MAX`] refuses the update as a system failure.
pub fn finalize_record_update(
    record: &mut Record,
    context: &MessageContext,
    pre: &PreChangeSnapshot,
) -> EpsResult<()> {
    if record.scn() >= SCN_MAX {
        tracing::error!(
            internal_id = %context.internal_id,
            scn = record.scn(),
            "EPS0336 record SCN has reached its ceiling, update refused"
        );
        return Err(EpsError::SystemFailure(format!(
            "record SCN {} has reached the ceiling of {}",
            record.scn(),
            SCN_MAX
        )));
    }
    record.increment_scn();
    let entry = domain_update_entry(record, context, pre);
    let before = record.change_log.len();
    update_change_log(&mut record.change_log, &context.message_id, entry, SCN_MAX)?;
    if record.change_log.len() != before + 1 {
        tracing::warn!(
            internal_id = %context.internal_id,
            message_id = %context.message_id,
            "EPS0672 change log did not grow by one entry"
        );
    }
    Ok(())
}

/// Append an entry and prune.
///
/// Fails with a system failure when pruning cannot keep the log at or below
/// `prune_point`; a record in that state needs manual attention rather than
/// silent unbounded growth.
pub fn update_change_log(
    change_log: &mut BTreeMap<String, ChangeLogEntry>,
    message_id: &str,
    entry: ChangeLogEntry,
    prune_point: i64,
) -> EpsResult<()> {
    change_log.insert(message_id.to_owned(), entry);
    prune_change_log(change_log, prune_point)
}

/// Prune runs of repeating interactions from the middle of the log.
///
/// Works over the SCN ordering: where three consecutive SCNs carry the same
/// repeating interaction, the middle entry goes, so a long run keeps only
/// its first and last entries. The first and last
/// `MIN_INITIAL_HISTORY`/`MIN_RECENT_HISTORY` entries are always retained.
pub fn prune_change_log(
    change_log: &mut BTreeMap<String, ChangeLogEntry>,
    prune_point: i64,
) -> EpsResult<()> {
    if prune_point == DO_NOT_PRUNE {
        return Ok(());
    }

    let mut by_scn: BTreeMap<i64, (String, String)> = BTreeMap::new();
    let mut max_scn = INVALID_SCN;
    for (message_id, entry) in change_log.iter() {
        by_scn.insert(entry.scn, (message_id.clone(), entry.interaction_id.clone()));
        max_scn = max_scn.max(entry.scn);
    }

    if max_scn <= prune_point {
        return Ok(());
    }

    // Targets are collected against the unmodified SCN map and removed only
    // after the scan, so every interior entry of a long run is pruned.
    let mut prune_targets: Vec<String> = Vec::new();
    for (&scn, (_, interaction)) in by_scn.iter().rev() {
        if scn > max_scn - MIN_RECENT_HISTORY || scn < MIN_INITIAL_HISTORY {
            continue;
        }
        if !REPEATING_ACTIONS.contains(&interaction.as_str()) {
            continue;
        }
        let previous = by_scn.get(&(scn - 1));
        let before_previous = by_scn.get(&(scn - 2));
        if let (Some((previous_id, previous_interaction)), Some((_, before_interaction))) =
            (previous, before_previous)
        {
            if previous_interaction == interaction && before_interaction == interaction {
                prune_targets.push(previous_id.clone());
            }
        }
    }
    for message_id in prune_targets {
        change_log.remove(&message_id);
    }

    if change_log.len() as i64 > prune_point {
        return Err(EpsError::SystemFailure(format!(
            "change log length {} exceeds prune point {}",
            change_log.len(),
            prune_point
        )));
    }
    Ok(())
}
