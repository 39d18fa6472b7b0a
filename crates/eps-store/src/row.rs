//! Row model for the single-table prescription store.
//!
//! Every item shares a partition key (the prescription id without its check
//! digit, or a message GUID) and a short sort key naming the item kind.
//! Query attributes are lifted out of the body onto the item so the
//! secondary indexes can serve them without reading the record.

use std::collections::BTreeMap;

/// Item kind discriminator, stored as the sort key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SortKey {
    #[default]
    Record,
    Document,
    WorkList,
    Claim,
    SequenceNumber,
}

impl SortKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortKey::Record => "REC",
            SortKey::Document => "DOC",
            SortKey::WorkList => "WRK",
            SortKey::Claim => "CLM",
            SortKey::SequenceNumber => "SQN",
        }
    }
}

/// Secondary indexes over the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecondaryIndex {
    /// nhsNumber, ranged on creationDatetime.
    NhsNumberDate,
    /// prescriberOrg, ranged on creationDatetime.
    PrescriberDate,
    /// dispenserOrg, ranged on creationDatetime.
    DispenserDate,
    /// nominatedPharmacy, ranged on isReady.
    NominatedPharmacyStatus,
    /// nextActivity, ranged on nextActivityDate.
    NextActivityDate,
}

/// Range condition applied to an index query's sort attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RangeCondition {
    Eq(String),
    Between(String, String),
}

/// Build the range condition for a start and end value. A reversed range
/// is a caller error and yields no condition, so the query returns empty
/// rather than scanning.
pub fn range_condition(start: &str, end: &str) -> Option<RangeCondition> {
    if start == end {
        Some(RangeCondition::Eq(start.to_owned()))
    } else if end < start {
        None
    } else {
        Some(RangeCondition::Between(start.to_owned(), end.to_owned()))
    }
}

/// Next activity pk values are suffix-sharded across this many partitions.
pub const NEXT_ACTIVITY_DATE_PARTITIONS: u32 = 12;

/// Sentinel date meaning "no scheduled activity".
pub const MAX_NEXT_ACTIVITY_DATE: &str = "99991231";

/// Joins multi-valued item attributes such as the status set.
pub const ATTRIBUTE_SEPARATOR: &str = "#";

/// Expiry applied to work lists and other short-lived items.
pub const DEFAULT_EXPIRY_DAYS: i64 = 56;

/// Force a datetime string to the full fourteen-character form, padding a
/// bare date with zeros so range comparisons line up.
pub fn pad_or_trim_date(date: &str) -> String {
    let mut value = date.to_owned();
    if value.len() >= 14 {
        value.truncate(14);
        return value;
    }
    while value.len() < 14 {
        value.push('0');
    }
    value
}

/// A single table item.
///
/// The body carries the JSON payload; everything else is a promoted query
/// attribute. Optional attributes stay unset on item kinds that do not use
/// them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Item {
    pub pk: String,
    pub sk: SortKey,
    pub body: Option<serde_json::Value>,
    pub scn: Option<i64>,
    pub indexes: BTreeMap<String, Vec<String>>,
    /// Unix timestamp after which the table reaps the item.
    pub expire_at: Option<i64>,
    /// `<activity>.<shard>`, or the bare activity for unsharded values.
    pub next_activity: Option<String>,
    pub next_activity_date: Option<String>,
    pub nhs_number: Option<String>,
    pub creation_datetime: Option<String>,
    pub prescriber_org: Option<String>,
    pub dispenser_org: Option<String>,
    pub nominated_pharmacy: Option<String>,
    pub is_ready: Option<bool>,
    /// `#`-joined distinct status codes, ToBeDispensed first when present.
    pub status: Option<String>,
    /// `R1.<shard>` / `R2.<shard>` / `UNKNOWN`.
    pub release_version: Option<String>,
    pub record_type: Option<String>,
    pub sequence_number: Option<i64>,
}

impl Item {
    pub fn new(pk: impl Into<String>) -> Self {
        Item {
            pk: pk.into(),
            ..Item::default()
        }
    }
}
