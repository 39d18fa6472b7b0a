//! Prescription store operations over a [`Table`].

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use chrono::{Months, NaiveDate, NaiveDateTime, Utc};
use rand::Rng;

use eps_core::changelog::{finalize_record_update, PreChangeSnapshot, SCN_MAX};
use eps_core::indexes::{IndexTerms, INDEX_NEXT_ACTIVITY, SEPARATOR};
use eps_core::model::Record;
use eps_core::time::{DATE_FORMAT, DATE_TIME_FORMAT};
use eps_core::MessageContext;
use eps_types::PrescriptionStatus;

use crate::error::{StoreError, StoreResult};
use crate::row::{
    pad_or_trim_date, range_condition, Item, RangeCondition, SecondaryIndex, SortKey,
    ATTRIBUTE_SEPARATOR, DEFAULT_EXPIRY_DAYS, MAX_NEXT_ACTIVITY_DATE,
    NEXT_ACTIVITY_DATE_PARTITIONS,
};
use crate::table::Table;

/// Sequence row key for batch claim numbering.
pub const CLAIM_SEQUENCE_NUMBER_KEY: &str = "claimSequenceNumber";

/// Document keys with this prefix are claim notifications and are skipped
/// by ordinary document deletion.
pub const NOTIFICATION_PREFIX: &str = "Notification_";

const SEQUENCE_RETRY_LIMIT: u32 = 25;

/// The prescription store. All record, document, and work list persistence
/// goes through here; the backing [`Table`] supplies the conditional write
/// semantics.
pub struct EpsStore<T> {
    table: T,
}

impl<T: Table> EpsStore<T> {
    pub fn new(table: T) -> Self {
        EpsStore { table }
    }

    pub fn table(&self) -> &T {
        &self.table
    }

    /// Records are keyed by the prescription id with its check digit
    /// removed, so lookups work from ids captured with or without it.
    pub fn record_key(prescription_id: &str) -> &str {
        eps_id::prescription_id_without_check_digit(prescription_id)
    }

    fn lower_case_index_keys(terms: &IndexTerms) -> BTreeMap<String, Vec<String>> {
        terms
            .iter()
            .map(|(name, values)| (name.to_lowercase(), values.clone()))
            .collect()
    }

    /// Epoch seconds `months` after the given local datetime, read as UTC.
    fn expire_at_months_after(from: NaiveDateTime, months: u32) -> StoreResult<i64> {
        let expiry = from
            .checked_add_months(Months::new(months))
            .ok_or_else(|| StoreError::InvalidDate(from.to_string()))?;
        Ok(expiry.and_utc().timestamp())
    }

    /// When the record is due for deletion the reaper can take over: the
    /// expiry follows the delete date (plus a grace year) or the purge
    /// date exactly. Anything else falls back to eighteen months from
    /// creation, and the fallback also caps the activity-derived value.
    fn record_expire_at(
        next_activity: &str,
        next_activity_date: Option<&str>,
        creation_datetime: &str,
    ) -> StoreResult<i64> {
        let creation = NaiveDateTime::parse_from_str(creation_datetime, DATE_TIME_FORMAT)
            .map_err(|_| StoreError::InvalidDate(creation_datetime.to_owned()))?;
        let default_expire_at = Self::expire_at_months_after(creation, 18)?;

        let activity = next_activity.to_lowercase();
        let date = match next_activity_date {
            Some(date) if date != MAX_NEXT_ACTIVITY_DATE => date,
            _ => return Ok(default_expire_at),
        };
        let grace_months = match activity.as_str() {
            "delete" => 12,
            "purge" => 0,
            _ => return Ok(default_expire_at),
        };

        let activity_date = NaiveDate::parse_from_str(date, DATE_FORMAT)
            .map_err(|_| StoreError::InvalidDate(date.to_owned()))?;
        let activity_expire_at =
            Self::expire_at_months_after(activity_date.and_hms_opt(0, 0, 0).unwrap_or_default(), grace_months)?;
        Ok(activity_expire_at.min(default_expire_at))
    }

    /// `#`-joined distinct status codes, with ToBeDispensed forced to the
    /// front so prefix matching can spot downloadable prescriptions.
    fn status_attribute(record: &Record) -> (String, bool) {
        let ready_code = PrescriptionStatus::ToBeDispensed.code();
        let codes: BTreeSet<&'static str> = record
            .issues
            .values()
            .map(|issue| issue.status.code())
            .collect();
        let is_ready = codes.contains(ready_code);
        let mut ordered: Vec<&str> = Vec::new();
        if is_ready {
            ordered.push(ready_code);
        }
        ordered.extend(codes.iter().copied().filter(|code| *code != ready_code));
        (ordered.join(ATTRIBUTE_SEPARATOR), is_ready)
    }

    /// Build the record item from the record and its freshly built index
    /// terms. A record heading for purge keeps only the core attributes so
    /// it drops out of the search indexes.
    pub fn build_record_item(record: &Record, terms: &IndexTerms) -> StoreResult<Item> {
        let prescription_id = &record.prescription.prescription_id;
        let nad_term = terms
            .get(INDEX_NEXT_ACTIVITY)
            .and_then(|values| values.first())
            .ok_or_else(|| StoreError::AccessError("next activity index term missing".to_owned()))?;
        let (next_activity, next_activity_date) = match nad_term.split_once('_') {
            Some((activity, date)) => (activity.to_owned(), Some(date.to_owned())),
            None => (nad_term.clone(), None),
        };
        let shard = rand::thread_rng().gen_range(1..=NEXT_ACTIVITY_DATE_PARTITIONS);

        let creation_datetime = record
            .prescription
            .prescription_time
            .clone()
            .ok_or_else(|| StoreError::AccessError("prescription time missing".to_owned()))?;
        let expire_at = Self::record_expire_at(
            &next_activity,
            next_activity_date.as_deref(),
            &creation_datetime,
        )?;

        let body = serde_json::to_value(record).map_err(StoreError::Serialization)?;
        let mut item = Item {
            pk: Self::record_key(prescription_id).to_owned(),
            sk: SortKey::Record,
            body: Some(body),
            scn: Some(record.scn()),
            indexes: Self::lower_case_index_keys(terms),
            expire_at: Some(expire_at),
            next_activity: Some(format!("{next_activity}.{shard}")),
            next_activity_date: next_activity_date.clone(),
            ..Item::default()
        };

        if next_activity.eq_ignore_ascii_case("purge") {
            return Ok(item);
        }

        let (status, is_ready) = Self::status_attribute(record);
        item.creation_datetime = Some(creation_datetime);
        item.nhs_number = record.prescription.nhs_number.clone();
        item.prescriber_org = record.prescription.prescribing_organization.clone();
        item.status = Some(status);
        item.is_ready = Some(is_ready);

        let dispenser_orgs: BTreeSet<String> = record
            .issues
            .values()
            .filter_map(|issue| issue.dispense.dispensing_organization.clone())
            .collect();
        if !dispenser_orgs.is_empty() {
            item.dispenser_org = Some(
                dispenser_orgs
                    .into_iter()
                    .collect::<Vec<_>>()
                    .join(ATTRIBUTE_SEPARATOR),
            );
        }
        if let Some(nominated) = record.nomination.nominated_performer.clone() {
            if item.dispenser_org.is_none() {
                item.dispenser_org = Some(nominated.clone());
            }
            item.nominated_pharmacy = Some(nominated);
        }
        item.record_type = Some(record.prescription.treatment_type.record_type().to_owned());
        item.release_version = Some(eps_id::sharded_release_version(
            prescription_id,
            &mut rand::thread_rng(),
        ));
        Ok(item)
    }

    /// Persist a brand new record along with its documents in one
    /// transaction. A record already present under the key is a duplicate
    /// submission.
    pub fn insert_record(
        &self,
        internal_id: &str,
        record: &Record,
        terms: &IndexTerms,
        documents: Vec<Item>,
    ) -> StoreResult<()> {
        let item = Self::build_record_item(record, terms)?;
        let pk = item.pk.clone();
        let mut items = vec![item];
        items.extend(documents);
        let result = self.table.transact_put(items, false);
        if let Err(StoreError::Duplicate(_)) = &result {
            tracing::warn!(internal_id, record_ref = %pk, "duplicate record insert refused");
        }
        result
    }

    /// Persist an updated record. The write only lands when the stored SCN
    /// is lower than this record's, so racing updates lose cleanly and can
    /// be requeued.
    pub fn update_record(
        &self,
        internal_id: &str,
        record: &Record,
        terms: &IndexTerms,
    ) -> StoreResult<()> {
        if record.scn() > SCN_MAX {
            tracing::error!(
                internal_id,
                scn = record.scn(),
                "EPS0336 record SCN beyond its ceiling, write refused"
            );
            return Err(StoreError::Core(eps_core::EpsError::SystemFailure(format!(
                "record SCN {} exceeds the ceiling of {}",
                record.scn(),
                SCN_MAX
            ))));
        }
        let item = Self::build_record_item(record, terms)?;
        let pk = item.pk.clone();
        let result = self.table.conditional_put(item, true);
        if let Err(StoreError::ConditionalUpdateFailure(_)) = &result {
            tracing::warn!(
                internal_id,
                record_ref = %pk,
                scn = record.scn(),
                "stale record update refused"
            );
        }
        result
    }

    /// Finalise and persist an updated record in one step: stamp the
    /// message's change log entry, bump the SCN, then write under the
    /// optimistic concurrency condition.
    pub fn commit_record(
        &self,
        context: &MessageContext,
        record: &mut Record,
        pre: &PreChangeSnapshot,
        terms: &IndexTerms,
    ) -> StoreResult<()> {
        finalize_record_update(record, context, pre)?;
        self.update_record(&context.internal_id, record, terms)
    }

    pub fn is_record_present(&self, prescription_id: &str) -> bool {
        self.table
            .get_item(Self::record_key(prescription_id), SortKey::Record)
            .is_some()
    }

    /// Fetch and decode a record. With `expect_exists` a missing record is
    /// an error; otherwise it is `None`.
    pub fn fetch_record(
        &self,
        prescription_id: &str,
        expect_exists: bool,
    ) -> StoreResult<Option<Record>> {
        let key = Self::record_key(prescription_id);
        let item = match self.table.get_item(key, SortKey::Record) {
            Some(item) => item,
            None if expect_exists => return Err(StoreError::MissingRecord(key.to_owned())),
            None => return Ok(None),
        };
        let body = item
            .body
            .ok_or_else(|| StoreError::EmptyRecord(key.to_owned()))?;
        let record = serde_json::from_value(body).map_err(StoreError::Deserialization)?;
        Ok(Some(record))
    }

    pub fn delete_record(&self, internal_id: &str, record_key: &str) {
        tracing::info!(internal_id, record_ref = record_key, "EPS0602 deleting record");
        self.table.delete_item(record_key, SortKey::Record);
    }

    /// Store a document body under its message reference.
    pub fn insert_document(
        &self,
        _internal_id: &str,
        document_key: &str,
        body: serde_json::Value,
    ) -> StoreResult<()> {
        self.table
            .conditional_put(Self::build_document_item(document_key, body)?, true)
    }

    pub fn build_document_item(document_key: &str, body: serde_json::Value) -> StoreResult<Item> {
        let expire_at = Self::expire_at_months_after(Utc::now().naive_utc(), 18)?;
        Ok(Item {
            pk: document_key.to_owned(),
            sk: SortKey::Document,
            body: Some(body),
            expire_at: Some(expire_at),
            ..Item::default()
        })
    }

    pub fn fetch_document(&self, document_key: &str) -> Option<serde_json::Value> {
        self.table
            .get_item(document_key, SortKey::Document)
            .and_then(|item| item.body)
    }

    /// Store a claim payload under its message reference. Claims share the
    /// document retention period.
    pub fn insert_claim(
        &self,
        _internal_id: &str,
        claim_key: &str,
        body: serde_json::Value,
    ) -> StoreResult<()> {
        let expire_at = Self::expire_at_months_after(Utc::now().naive_utc(), 18)?;
        let item = Item {
            pk: claim_key.to_owned(),
            sk: SortKey::Claim,
            body: Some(body),
            expire_at: Some(expire_at),
            ..Item::default()
        };
        self.table.conditional_put(item, true)
    }

    pub fn fetch_claim(&self, claim_key: &str) -> Option<serde_json::Value> {
        self.table
            .get_item(claim_key, SortKey::Claim)
            .and_then(|item| item.body)
    }

    /// Delete a document, returning whether a deletion happened. Claim
    /// notifications are retained unless explicitly requested because the
    /// reimbursement flow reads them after the record is gone.
    pub fn delete_document(
        &self,
        internal_id: &str,
        document_key: &str,
        delete_notification: bool,
    ) -> bool {
        if document_key
            .to_lowercase()
            .starts_with(&NOTIFICATION_PREFIX.to_lowercase())
            && !delete_notification
        {
            return true;
        }
        if self.table.get_item(document_key, SortKey::Document).is_none() {
            tracing::info!(
                internal_id,
                document_ref = document_key,
                "EPS0601b document to delete not found"
            );
            return false;
        }
        tracing::info!(internal_id, document_ref = document_key, "EPS0601 deleting document");
        self.table.delete_item(document_key, SortKey::Document);
        true
    }

    /// Store a work list keyed by message id, expiring after the default
    /// retention window.
    pub fn insert_work_list(
        &self,
        _internal_id: &str,
        message_id: &str,
        body: serde_json::Value,
    ) -> StoreResult<()> {
        let expire_at = (Utc::now() + chrono::Duration::days(DEFAULT_EXPIRY_DAYS)).timestamp();
        let item = Item {
            pk: message_id.to_owned(),
            sk: SortKey::WorkList,
            body: Some(body),
            expire_at: Some(expire_at),
            ..Item::default()
        };
        self.table.conditional_put(item, true)
    }

    pub fn fetch_work_list(&self, message_id: &str) -> Option<serde_json::Value> {
        self.table
            .get_item(message_id, SortKey::WorkList)
            .and_then(|item| item.body)
    }

    /// Allocate the next claim batch sequence number, wrapping back to one
    /// past the maximum. Contention is resolved by retrying the increment;
    /// only singleton workers should call this, the retry is a safety net
    /// rather than a coordination mechanism.
    pub fn next_sequence_number(
        &self,
        _internal_id: &str,
        key: &str,
        max_sequence_number: i64,
    ) -> StoreResult<i64> {
        let stored = self.table.get_item(key, SortKey::SequenceNumber);
        let (mut next, is_update) = match &stored {
            None => (1, false),
            Some(item) => {
                let current = item.sequence_number.unwrap_or(0);
                (if current < max_sequence_number { current + 1 } else { 1 }, true)
            }
        };

        let mut tries = 0;
        loop {
            let item = Item {
                pk: key.to_owned(),
                sk: SortKey::SequenceNumber,
                sequence_number: Some(next),
                ..Item::default()
            };
            match self.table.conditional_put(item, is_update) {
                Ok(()) => return Ok(next),
                Err(StoreError::ConditionalUpdateFailure(_)) if tries < SEQUENCE_RETRY_LIMIT => {
                    next = if next < max_sequence_number { next + 1 } else { 1 };
                    tries += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Record keys due for the given activity in the date window.
    ///
    /// The next activity attribute is suffix-sharded, so one query runs
    /// per shard plus one against the unsharded value for legacy rows.
    pub fn pids_due_for_next_activity(
        &self,
        activity: &str,
        start_date: &str,
        end_date: &str,
    ) -> Vec<String> {
        let range = match range_condition(start_date, end_date) {
            Some(range) => range,
            None => return Vec::new(),
        };
        let mut keys = Vec::new();
        let shards = std::iter::once(None).chain((1..=NEXT_ACTIVITY_DATE_PARTITIONS).map(Some));
        for shard in shards {
            let partition = match shard {
                None => activity.to_owned(),
                Some(shard) => format!("{activity}.{shard}"),
            };
            for item in
                self.table
                    .query_index(SecondaryIndex::NextActivityDate, &partition, Some(&range))
            {
                keys.push(item.pk);
            }
        }
        keys
    }

    /// Record keys awaiting nominated download at the given pharmacy, up
    /// to the batch size, with a count of how many were left behind.
    pub fn ready_records_for_pharmacy(
        &self,
        _internal_id: &str,
        nominated_pharmacy: &str,
        batch_size: usize,
    ) -> (Vec<String>, usize) {
        let range = RangeCondition::Eq("1".to_owned());
        let mut keys: Vec<String> = self
            .table
            .query_index(
                SecondaryIndex::NominatedPharmacyStatus,
                nominated_pharmacy,
                Some(&range),
            )
            .into_iter()
            .map(|item| item.pk)
            .collect();
        let discarded = keys.len().saturating_sub(batch_size);
        keys.truncate(batch_size);
        (keys, discarded)
    }

    /// Every record key for the given pharmacy regardless of status.
    pub fn all_records_for_pharmacy(&self, nominated_pharmacy: &str) -> Vec<String> {
        let range = RangeCondition::Between("0".to_owned(), "1".to_owned());
        self.table
            .query_index(
                SecondaryIndex::NominatedPharmacyStatus,
                nominated_pharmacy,
                Some(&range),
            )
            .into_iter()
            .map(|item| item.pk)
            .collect()
    }

    /// Record keys for an NHS number, used when a nomination change has
    /// to touch every open prescription for the patient.
    pub fn record_keys_for_nhs_number(&self, nhs_number: &str) -> Vec<String> {
        self.table
            .query_index(SecondaryIndex::NhsNumberDate, nhs_number, None)
            .into_iter()
            .map(|item| item.pk)
            .collect()
    }

    /// Matching `(term, record key)` pairs for a composite search index.
    ///
    /// `range_start` carries the index's full `|`-separated prefix with
    /// the window start as its final component; `range_end`'s final
    /// component is the window end. Terms may be narrowed further with a
    /// substring filter.
    pub fn terms_by_index_date(
        &self,
        index_name: &str,
        range_start: &str,
        range_end: &str,
        term_filter: Option<&str>,
    ) -> StoreResult<Vec<(String, String)>> {
        let parts: Vec<&str> = range_start.split(SEPARATOR).collect();
        let end_date = range_end
            .rsplit(SEPARATOR)
            .next()
            .unwrap_or(range_end)
            .to_owned();

        // Which secondary index serves the query, its partition value, and
        // any org constraints the index bakes into its terms.
        let (secondary, partition, prescriber, dispenser, start_date) = match index_name {
            eps_core::indexes::INDEX_NHSNUMBER_DATE => match parts.as_slice() {
                [nhs, start] => (SecondaryIndex::NhsNumberDate, *nhs, None, None, *start),
                _ => return Err(StoreError::AccessError(index_name.to_owned())),
            },
            eps_core::indexes::INDEX_NHSNUMBER_PRESCRIBER_DATE => match parts.as_slice() {
                [nhs, prescriber, start] => {
                    (SecondaryIndex::NhsNumberDate, *nhs, Some(*prescriber), None, *start)
                }
                _ => return Err(StoreError::AccessError(index_name.to_owned())),
            },
            eps_core::indexes::INDEX_NHSNUMBER_PRESC_DISP_DATE => match parts.as_slice() {
                [nhs, prescriber, dispenser, start] => (
                    SecondaryIndex::NhsNumberDate,
                    *nhs,
                    Some(*prescriber),
                    Some(*dispenser),
                    *start,
                ),
                _ => return Err(StoreError::AccessError(index_name.to_owned())),
            },
            eps_core::indexes::INDEX_NHSNUMBER_DISPENSER_DATE => match parts.as_slice() {
                [nhs, dispenser, start] => {
                    (SecondaryIndex::NhsNumberDate, *nhs, None, Some(*dispenser), *start)
                }
                _ => return Err(StoreError::AccessError(index_name.to_owned())),
            },
            eps_core::indexes::INDEX_PRESCRIBER_DATE => match parts.as_slice() {
                [prescriber, start] => {
                    (SecondaryIndex::PrescriberDate, *prescriber, None, None, *start)
                }
                _ => return Err(StoreError::AccessError(index_name.to_owned())),
            },
            eps_core::indexes::INDEX_PRESC_DISP_DATE => match parts.as_slice() {
                [prescriber, dispenser, start] => (
                    SecondaryIndex::PrescriberDate,
                    *prescriber,
                    None,
                    Some(*dispenser),
                    *start,
                ),
                _ => return Err(StoreError::AccessError(index_name.to_owned())),
            },
            eps_core::indexes::INDEX_DISPENSER_DATE => match parts.as_slice() {
                [dispenser, start] => {
                    (SecondaryIndex::DispenserDate, *dispenser, None, None, *start)
                }
                _ => return Err(StoreError::AccessError(index_name.to_owned())),
            },
            other => return Err(StoreError::AccessError(other.to_owned())),
        };

        let start = pad_or_trim_date(start_date);
        let end = pad_or_trim_date(&end_date);
        let range = match range_condition(&start, &end) {
            Some(range) => range,
            None => return Ok(Vec::new()),
        };

        let items = self
            .table
            .query_index(secondary, partition, Some(&range))
            .into_iter()
            .filter(|item| match prescriber {
                Some(org) => item.prescriber_org.as_deref() == Some(org),
                None => true,
            })
            .filter(|item| match dispenser {
                Some(org) => item
                    .dispenser_org
                    .as_deref()
                    .is_some_and(|value| value.contains(org)),
                None => true,
            });

        let index_key = index_name.to_lowercase();
        let mut terms = Vec::new();
        for item in items {
            let Some(item_terms) = item.indexes.get(&index_key) else {
                continue;
            };
            for term in item_terms {
                if term_filter.map_or(true, |filter| term.contains(filter)) {
                    terms.push((term.clone(), item.pk.clone()));
                }
            }
        }
        Ok(terms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::InMemoryTable;
    use eps_core::model::Record;
    use eps_types::Activity;

    fn store() -> EpsStore<InMemoryTable> {
        EpsStore::new(InMemoryTable::new())
    }

    fn sample_record(status: PrescriptionStatus) -> Record {
        let json = serde_json::json!({
            "prescription": {
                "prescriptionId": "7D9625-Z72BF2-11E3A",
                "treatmentType": "0001",
                "prescriptionTime": "20260801120000",
                "currentIssueNumber": 1,
                "nhsNumber": "9434765919",
                "prescribingOrganization": "A99968",
            },
            "issues": {
                "1": {
                    "number": 1,
                    "status": status.code(),
                    "lineItems": [
                        {"id": "item-1", "status": "0007"},
                        {"id": "item-2", "status": "0007"},
                    ],
                }
            },
        });
        serde_json::from_value(json).expect("record fixture")
    }

    fn terms_for(record: &Record, activity: Activity, date: &str) -> IndexTerms {
        eps_core::indexes::build_indexes(record, activity, date, "20260827143000", "test")
            .expect("index terms")
    }

    #[test]
    fn record_round_trips_through_the_store() {
        let store = store();
        let record = sample_record(PrescriptionStatus::ToBeDispensed);
        let terms = terms_for(&record, Activity::Expire, "20270201");
        store.insert_record("test", &record, &terms, Vec::new()).unwrap();
        let fetched = store.fetch_record("7D9625-Z72BF2-11E3AC", true).unwrap().unwrap();
        assert_eq!(fetched, record);
    }

    #[test]
    fn duplicate_insert_is_refused() {
        let store = store();
        let record = sample_record(PrescriptionStatus::ToBeDispensed);
        let terms = terms_for(&record, Activity::Expire, "20270201");
        store.insert_record("test", &record, &terms, Vec::new()).unwrap();
        let result = store.insert_record("test", &record, &terms, Vec::new());
        assert!(matches!(result, Err(StoreError::Duplicate(_))));
    }

    #[test]
    fn stale_scn_update_is_refused() {
        let store = store();
        let mut record = sample_record(PrescriptionStatus::ToBeDispensed);
        let terms = terms_for(&record, Activity::Expire, "20270201");
        store.insert_record("test", &record, &terms, Vec::new()).unwrap();

        record.increment_scn();
        store.update_record("test", &record, &terms).unwrap();
        // A concurrent worker writing the same SCN again must lose.
        let stale = store.update_record("test", &record, &terms);
        assert!(matches!(stale, Err(StoreError::ConditionalUpdateFailure(_))));
    }

    #[test]
    fn commit_stamps_the_change_log_and_bumps_the_scn() {
        let store = store();
        let mut record = sample_record(PrescriptionStatus::ToBeDispensed);
        let terms = terms_for(&record, Activity::Expire, "20270201");
        store.insert_record("test", &record, &terms, Vec::new()).unwrap();

        let pre = PreChangeSnapshot::of(&record);
        record
            .issue_mut(1)
            .unwrap()
            .set_status(PrescriptionStatus::WithDispenser);
        let context = MessageContext::new(
            "msg-commit",
            "PORX_IN060102UK30",
            NaiveDate::from_ymd_opt(2026, 8, 27)
                .unwrap()
                .and_hms_opt(14, 30, 0)
                .unwrap(),
        );
        store.commit_record(&context, &mut record, &pre, &terms).unwrap();

        let stored = store.fetch_record("7D9625-Z72BF2-11E3A", true).unwrap().unwrap();
        assert_eq!(stored.scn(), 2);
        let logged = stored.change_log.get("msg-commit").unwrap();
        assert_eq!(logged.scn, 2);
        assert_eq!(logged.to_status, Some(PrescriptionStatus::WithDispenser));
    }

    #[test]
    fn update_beyond_the_scn_ceiling_is_refused() {
        let store = store();
        let mut record = sample_record(PrescriptionStatus::ToBeDispensed);
        let terms = terms_for(&record, Activity::Expire, "20270201");
        store.insert_record("test", &record, &terms, Vec::new()).unwrap();

        record.scn = SCN_MAX;
        record.increment_scn();
        let result = store.update_record("test", &record, &terms);
        assert!(matches!(
            result,
            Err(StoreError::Core(eps_core::EpsError::SystemFailure(_)))
        ));
    }

    #[test]
    fn record_item_carries_query_attributes() {
        let record = sample_record(PrescriptionStatus::ToBeDispensed);
        let terms = terms_for(&record, Activity::Expire, "20270201");
        let item = EpsStore::<InMemoryTable>::build_record_item(&record, &terms).unwrap();
        assert_eq!(item.pk, "7D9625-Z72BF2-11E3A");
        assert_eq!(item.status.as_deref(), Some("0001"));
        assert_eq!(item.is_ready, Some(true));
        assert_eq!(item.next_activity_date.as_deref(), Some("20270201"));
        let next_activity = item.next_activity.unwrap();
        let (activity, shard) = next_activity.split_once('.').unwrap();
        assert_eq!(activity, "Expire");
        let shard: u32 = shard.parse().unwrap();
        assert!((1..=NEXT_ACTIVITY_DATE_PARTITIONS).contains(&shard));
        assert_eq!(item.record_type.as_deref(), Some("Acute"));
    }

    #[test]
    fn delete_bound_record_expires_with_its_delete_date() {
        // Delete due 20270201, so expiry is 20280201 midnight, well before
        // the default of creation plus eighteen months from 20260801.
        let expire_at = EpsStore::<InMemoryTable>::record_expire_at(
            "Delete",
            Some("20270201"),
            "20260801120000",
        )
        .unwrap();
        let expected = NaiveDate::from_ymd_opt(2028, 2, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
            .and_utc()
            .timestamp();
        assert_eq!(expire_at, expected);
    }

    #[test]
    fn open_ended_delete_date_uses_the_default_expiry() {
        let expire_at = EpsStore::<InMemoryTable>::record_expire_at(
            "Delete",
            Some(MAX_NEXT_ACTIVITY_DATE),
            "20260801120000",
        )
        .unwrap();
        let expected = NaiveDate::from_ymd_opt(2028, 2, 1)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
            .and_utc()
            .timestamp();
        assert_eq!(expire_at, expected);
    }

    #[test]
    fn next_activity_fan_out_finds_every_shard() {
        let store = store();
        // Seed records whose shard suffix is random; enough of them makes
        // it overwhelmingly likely several shards are occupied, and the
        // fan-out must find all of the records regardless.
        for n in 0..20 {
            let mut record = sample_record(PrescriptionStatus::ToBeDispensed);
            record.prescription.prescription_id = format!("7D9625-Z72BF2-{n:05X}");
            record.prescription.nhs_number = Some(format!("94347659{n:02}"));
            let terms = terms_for(&record, Activity::Expire, "20270201");
            store.insert_record("test", &record, &terms, Vec::new()).unwrap();
        }
        let due = store.pids_due_for_next_activity("Expire", "20270101", "20270301");
        assert_eq!(due.len(), 20);

        let not_due = store.pids_due_for_next_activity("Expire", "20270202", "20270301");
        assert!(not_due.is_empty());
    }

    #[test]
    fn reversed_activity_window_returns_nothing() {
        let store = store();
        let record = sample_record(PrescriptionStatus::ToBeDispensed);
        let terms = terms_for(&record, Activity::Expire, "20270201");
        store.insert_record("test", &record, &terms, Vec::new()).unwrap();
        assert!(store
            .pids_due_for_next_activity("Expire", "20270301", "20270101")
            .is_empty());
    }

    #[test]
    fn ready_records_for_pharmacy_respects_the_batch_size() {
        let store = store();
        for n in 0..5 {
            let mut record = sample_record(PrescriptionStatus::ToBeDispensed);
            record.prescription.prescription_id = format!("7D9625-Z72BF2-{n:05X}");
            record.nomination.nominated_performer = Some("FA111".to_owned());
            let terms = terms_for(&record, Activity::Expire, "20270201");
            store.insert_record("test", &record, &terms, Vec::new()).unwrap();
        }
        let (keys, discarded) = store.ready_records_for_pharmacy("test", "FA111", 3);
        assert_eq!(keys.len(), 3);
        assert_eq!(discarded, 2);
    }

    #[test]
    fn released_records_are_not_ready_for_download() {
        let store = store();
        let mut record = sample_record(PrescriptionStatus::WithDispenser);
        record.nomination.nominated_performer = Some("FA111".to_owned());
        record.issue_mut(1).unwrap().dispense.dispensing_organization = Some("FA111".to_owned());
        let terms = terms_for(&record, Activity::Expire, "20270201");
        store.insert_record("test", &record, &terms, Vec::new()).unwrap();
        let (keys, _) = store.ready_records_for_pharmacy("test", "FA111", 10);
        assert!(keys.is_empty());
        assert_eq!(store.all_records_for_pharmacy("FA111").len(), 1);
    }

    #[test]
    fn sequence_numbers_increment_and_wrap() {
        let store = store();
        assert_eq!(store.next_sequence_number("test", CLAIM_SEQUENCE_NUMBER_KEY, 3).unwrap(), 1);
        assert_eq!(store.next_sequence_number("test", CLAIM_SEQUENCE_NUMBER_KEY, 3).unwrap(), 2);
        assert_eq!(store.next_sequence_number("test", CLAIM_SEQUENCE_NUMBER_KEY, 3).unwrap(), 3);
        assert_eq!(store.next_sequence_number("test", CLAIM_SEQUENCE_NUMBER_KEY, 3).unwrap(), 1);
    }

    #[test]
    fn terms_query_filters_on_date_window() {
        let store = store();
        let record = sample_record(PrescriptionStatus::ToBeDispensed);
        let terms = terms_for(&record, Activity::Expire, "20270201");
        store.insert_record("test", &record, &terms, Vec::new()).unwrap();

        let hits = store
            .terms_by_index_date(
                eps_core::indexes::INDEX_NHSNUMBER_DATE,
                "9434765919|20260101",
                "20261231",
                None,
            )
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0, "9434765919|20260801120000|R2|0001");
        assert_eq!(hits[0].1, "7D9625-Z72BF2-11E3A");

        let misses = store
            .terms_by_index_date(
                eps_core::indexes::INDEX_NHSNUMBER_DATE,
                "9434765919|20270101",
                "20271231",
                None,
            )
            .unwrap();
        assert!(misses.is_empty());
    }

    #[test]
    fn claim_notifications_survive_ordinary_document_deletion() {
        let store = store();
        store
            .insert_document("test", "Notification_claim-1", serde_json::json!({"payload": "x"}))
            .unwrap();
        assert!(store.delete_document("test", "Notification_claim-1", false));
        assert!(store.fetch_document("Notification_claim-1").is_some());
        assert!(store.delete_document("test", "Notification_claim-1", true));
        assert!(store.fetch_document("Notification_claim-1").is_none());
    }
}
