//! Table abstraction and in-memory implementation.
//!
//! The store logic is written against [`Table`] so tests and tooling can
//! run against [`InMemoryTable`] while production binds a real backend.
//! Conditional semantics match the backing store: inserts require the key
//! to be absent, record updates require the stored SCN to be lower than
//! the incoming one, and sequence rows only move forwards except when
//! wrapping back to one.

use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::error::{StoreError, StoreResult};
use crate::row::{Item, RangeCondition, SecondaryIndex, SortKey};

pub trait Table: Send + Sync {
    /// Put one item under its write condition.
    fn conditional_put(&self, item: Item, is_update: bool) -> StoreResult<()>;

    /// Put several items atomically; no item is written unless every
    /// condition holds.
    fn transact_put(&self, items: Vec<Item>, is_update: bool) -> StoreResult<()>;

    fn get_item(&self, pk: &str, sk: SortKey) -> Option<Item>;

    fn delete_item(&self, pk: &str, sk: SortKey);

    /// Query a secondary index by its partition attribute, optionally
    /// constrained on its sort attribute, in sort order.
    fn query_index(
        &self,
        index: SecondaryIndex,
        pk_value: &str,
        range: Option<&RangeCondition>,
    ) -> Vec<Item>;

    /// As [`Table::query_index`] but truncated to `limit` items.
    fn query_index_with_limit(
        &self,
        index: SecondaryIndex,
        pk_value: &str,
        range: Option<&RangeCondition>,
        limit: Option<usize>,
    ) -> Vec<Item> {
        let mut items = self.query_index(index, pk_value, range);
        if let Some(limit) = limit {
            items.truncate(limit);
        }
        items
    }

    /// One page of an index query. The returned token resumes the query
    /// on the next call; `None` means the result set is exhausted.
    fn query_index_page(
        &self,
        index: SecondaryIndex,
        pk_value: &str,
        range: Option<&RangeCondition>,
        page_size: usize,
        page_token: Option<&PageToken>,
    ) -> (Vec<Item>, Option<PageToken>) {
        let offset = page_token.map_or(0, |token| token.0);
        let items = self.query_index(index, pk_value, range);
        let page: Vec<Item> = items.into_iter().skip(offset).take(page_size).collect();
        let next = if page.len() == page_size {
            Some(PageToken(offset + page_size))
        } else {
            None
        };
        (page, next)
    }
}

/// Opaque resume position for [`Table::query_index_page`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageToken(usize);

/// Lazily yield every item of an index query, pulling one page at a time
/// so callers can stop early without paying for the full result set.
pub fn query_index_yield<'a, T: Table + ?Sized>(
    table: &'a T,
    index: SecondaryIndex,
    pk_value: &'a str,
    range: Option<RangeCondition>,
    page_size: usize,
) -> impl Iterator<Item = Item> + 'a {
    let mut page: std::vec::IntoIter<Item> = Vec::new().into_iter();
    let mut token: Option<PageToken> = None;
    let mut exhausted = false;
    std::iter::from_fn(move || loop {
        if let Some(item) = page.next() {
            return Some(item);
        }
        if exhausted {
            return None;
        }
        let (items, next) =
            table.query_index_page(index, pk_value, range.as_ref(), page_size, token.as_ref());
        exhausted = next.is_none();
        token = next;
        if items.is_empty() {
            return None;
        }
        page = items.into_iter();
    })
}

/// The (partition, sort) attribute pair backing a secondary index.
fn index_attributes(index: SecondaryIndex, item: &Item) -> (Option<&str>, Option<String>) {
    match index {
        SecondaryIndex::NhsNumberDate => (
            item.nhs_number.as_deref(),
            item.creation_datetime.clone(),
        ),
        SecondaryIndex::PrescriberDate => (
            item.prescriber_org.as_deref(),
            item.creation_datetime.clone(),
        ),
        SecondaryIndex::DispenserDate => (
            item.dispenser_org.as_deref(),
            item.creation_datetime.clone(),
        ),
        SecondaryIndex::NominatedPharmacyStatus => (
            item.nominated_pharmacy.as_deref(),
            item.is_ready.map(|ready| u8::from(ready).to_string()),
        ),
        SecondaryIndex::NextActivityDate => (
            item.next_activity.as_deref(),
            item.next_activity_date.clone(),
        ),
    }
}

fn range_matches(range: Option<&RangeCondition>, value: &str) -> bool {
    match range {
        None => true,
        Some(RangeCondition::Eq(expected)) => value == expected,
        Some(RangeCondition::Between(start, end)) => value >= start.as_str() && value <= end.as_str(),
    }
}

/// Process-local table for tests and tooling.
#[derive(Default)]
pub struct InMemoryTable {
    items: Mutex<BTreeMap<(String, SortKey), Item>>,
}

impl InMemoryTable {
    pub fn new() -> Self {
        InMemoryTable::default()
    }

    /// Check an item's write condition against the current table state.
    fn check_condition(
        stored: Option<&Item>,
        item: &Item,
        is_update: bool,
    ) -> StoreResult<()> {
        if !is_update {
            if stored.is_some() {
                return Err(StoreError::Duplicate(item.pk.clone()));
            }
            return Ok(());
        }
        match item.sk {
            SortKey::Record => {
                let stored_scn = stored.and_then(|s| s.scn);
                match (stored_scn, item.scn) {
                    (Some(stored), Some(new)) if stored < new => Ok(()),
                    _ => Err(StoreError::ConditionalUpdateFailure(item.pk.clone())),
                }
            }
            SortKey::SequenceNumber => {
                // Wrapping back to one is unconditional.
                if item.sequence_number == Some(1) {
                    return Ok(());
                }
                let stored_sequence = stored.and_then(|s| s.sequence_number);
                match (stored_sequence, item.sequence_number) {
                    (Some(stored), Some(new)) if stored < new => Ok(()),
                    _ => Err(StoreError::ConditionalUpdateFailure(item.pk.clone())),
                }
            }
            _ => Ok(()),
        }
    }
}

impl Table for InMemoryTable {
    fn conditional_put(&self, item: Item, is_update: bool) -> StoreResult<()> {
        let mut items = self.items.lock().expect("table lock poisoned");
        let key = (item.pk.clone(), item.sk);
        Self::check_condition(items.get(&key), &item, is_update)?;
        items.insert(key, item);
        Ok(())
    }

    fn transact_put(&self, to_put: Vec<Item>, is_update: bool) -> StoreResult<()> {
        let mut items = self.items.lock().expect("table lock poisoned");
        for item in &to_put {
            let key = (item.pk.clone(), item.sk);
            Self::check_condition(items.get(&key), item, is_update)?;
        }
        for item in to_put {
            items.insert((item.pk.clone(), item.sk), item);
        }
        Ok(())
    }

    fn get_item(&self, pk: &str, sk: SortKey) -> Option<Item> {
        let items = self.items.lock().expect("table lock poisoned");
        items.get(&(pk.to_owned(), sk)).cloned()
    }

    fn delete_item(&self, pk: &str, sk: SortKey) {
        let mut items = self.items.lock().expect("table lock poisoned");
        items.remove(&(pk.to_owned(), sk));
    }

    fn query_index(
        &self,
        index: SecondaryIndex,
        pk_value: &str,
        range: Option<&RangeCondition>,
    ) -> Vec<Item> {
        let items = self.items.lock().expect("table lock poisoned");
        let mut matched: Vec<(String, Item)> = items
            .values()
            .filter_map(|item| {
                let (partition, sort) = index_attributes(index, item);
                // Items missing either attribute are absent from the index.
                let partition = partition?;
                let sort = sort?;
                if partition == pk_value && range_matches(range, &sort) {
                    Some((sort, item.clone()))
                } else {
                    None
                }
            })
            .collect();
        matched.sort_by(|a, b| a.0.cmp(&b.0));
        matched.into_iter().map(|(_, item)| item).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record_item(pk: &str, scn: i64) -> Item {
        Item {
            scn: Some(scn),
            ..Item::new(pk)
        }
    }

    #[test]
    fn insert_refuses_an_existing_key() {
        let table = InMemoryTable::new();
        table.conditional_put(record_item("pid-1", 1), false).unwrap();
        let result = table.conditional_put(record_item("pid-1", 1), false);
        assert!(matches!(result, Err(StoreError::Duplicate(_))));
    }

    #[test]
    fn update_requires_a_newer_scn() {
        let table = InMemoryTable::new();
        table.conditional_put(record_item("pid-1", 3), false).unwrap();
        assert!(table.conditional_put(record_item("pid-1", 4), true).is_ok());
        let stale = table.conditional_put(record_item("pid-1", 4), true);
        assert!(matches!(stale, Err(StoreError::ConditionalUpdateFailure(_))));
    }

    #[test]
    fn update_of_a_missing_record_fails_the_condition() {
        let table = InMemoryTable::new();
        let result = table.conditional_put(record_item("pid-1", 2), true);
        assert!(matches!(result, Err(StoreError::ConditionalUpdateFailure(_))));
    }

    #[test]
    fn sequence_wrap_to_one_is_unconditional() {
        let table = InMemoryTable::new();
        let mut item = Item::new("claimSequenceNumber");
        item.sk = SortKey::SequenceNumber;
        item.sequence_number = Some(999999);
        table.conditional_put(item.clone(), false).unwrap();
        item.sequence_number = Some(1);
        assert!(table.conditional_put(item, true).is_ok());
    }

    #[test]
    fn transaction_is_all_or_nothing() {
        let table = InMemoryTable::new();
        table.conditional_put(record_item("pid-1", 1), false).unwrap();
        let mut doc = Item::new("doc-1");
        doc.sk = SortKey::Document;
        // Second item collides, so the first must not be written either.
        let result = table.transact_put(vec![doc, record_item("pid-1", 1)], false);
        assert!(matches!(result, Err(StoreError::Duplicate(_))));
        assert!(table.get_item("doc-1", SortKey::Document).is_none());
    }

    #[test]
    fn paged_query_walks_the_full_result_set() {
        let table = InMemoryTable::new();
        for n in 0..5 {
            let mut item = Item::new(format!("pid-{n}"));
            item.nhs_number = Some("9434765919".to_owned());
            item.creation_datetime = Some(format!("2026080{n}120000"));
            table.conditional_put(item, false).unwrap();
        }
        let (first, token) =
            table.query_index_page(SecondaryIndex::NhsNumberDate, "9434765919", None, 2, None);
        assert_eq!(first.len(), 2);
        let (second, token) = table.query_index_page(
            SecondaryIndex::NhsNumberDate,
            "9434765919",
            None,
            2,
            token.as_ref(),
        );
        assert_eq!(second.len(), 2);
        let (third, token) = table.query_index_page(
            SecondaryIndex::NhsNumberDate,
            "9434765919",
            None,
            2,
            token.as_ref(),
        );
        assert_eq!(third.len(), 1);
        assert!(token.is_none());

        let yielded: Vec<String> =
            query_index_yield(&table, SecondaryIndex::NhsNumberDate, "9434765919", None, 2)
                .map(|item| item.pk)
                .collect();
        assert_eq!(yielded.len(), 5);
    }

    #[test]
    fn index_query_ranges_on_the_sort_attribute() {
        let table = InMemoryTable::new();
        for (pk, date) in [("a", "20260101120000"), ("b", "20260601120000"), ("c", "20270101120000")] {
            let mut item = Item::new(pk);
            item.nhs_number = Some("9434765919".to_owned());
            item.creation_datetime = Some(date.to_owned());
            table.conditional_put(item, false).unwrap();
        }
        let range = RangeCondition::Between("20260101000000".to_owned(), "20261231235959".to_owned());
        let items = table.query_index(SecondaryIndex::NhsNumberDate, "9434765919", Some(&range));
        let keys: Vec<&str> = items.iter().map(|item| item.pk.as_str()).collect();
        assert_eq!(keys, vec!["a", "b"]);
    }
}
