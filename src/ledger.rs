//! Append-only, date-ordered trip history with a retention window.

use chrono::{DateTime, Duration, Utc};
use hashbrown::HashSet;
use tracing::{info, instrument};

use crate::{
    persist::{Document, DocumentStore, PersistError, Write},
    trip::TripRecord,
    types::TripId,
};

/// Retention window applied when none is configured.
pub const DEFAULT_RETENTION_DAYS: u32 = 30;

/// Optional store and date bounds for [`HistoryLedger::query`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TripFilter {
    /// Exact store name.
    pub store: Option<String>,
    /// Inclusive lower bound.
    pub from: Option<DateTime<Utc>>,
    /// Inclusive upper bound.
    pub to: Option<DateTime<Utc>>,
}

impl TripFilter {
    /// Matches every trip.
    pub fn all() -> Self {
        Self::default()
    }

    /// Only trips at `store`.
    pub fn store(mut self, store: impl Into<String>) -> Self {
        self.store = Some(store.into());
        self
    }

    /// Only trips at or after `from`.
    pub fn from(mut self, from: DateTime<Utc>) -> Self {
        self.from = Some(from);
        self
    }

    /// Only trips at or before `to`.
    pub fn to(mut self, to: DateTime<Utc>) -> Self {
        self.to = Some(to);
        self
    }

    fn matches(&self, record: &TripRecord) -> bool {
        self.store.as_ref().is_none_or(|s| *s == record.store)
            && self.from.is_none_or(|from| record.date >= from)
            && self.to.is_none_or(|to| record.date <= to)
    }
}

/// Trip records sorted by date ascending (ties by id), unique by id.
#[derive(Debug, Clone)]
pub struct HistoryLedger {
    records: Vec<TripRecord>,
    ids: HashSet<TripId>,
    retention_days: u32,
}

impl Default for HistoryLedger {
    fn default() -> Self {
        Self::new(DEFAULT_RETENTION_DAYS)
    }
}

impl HistoryLedger {
    /// Empty ledger.
    pub fn new(retention_days: u32) -> Self {
        Self {
            records: Vec::new(),
            ids: HashSet::new(),
            retention_days,
        }
    }

    /// Builds a ledger from stored records in any order.
    pub fn from_records(retention_days: u32, records: impl IntoIterator<Item = TripRecord>) -> Self {
        let mut ledger = Self::new(retention_days);
        for record in records {
            ledger.append(record);
        }
        ledger
    }

    /// Days of history kept.
    pub fn retention_days(&self) -> u32 {
        self.retention_days
    }

    /// Stored records, in or out of the window.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True when no records are stored.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// True when `trip_id` is stored.
    pub fn contains(&self, trip_id: &str) -> bool {
        self.ids.contains(trip_id)
    }

    /// Record for `trip_id`, in or out of the window.
    pub fn get(&self, trip_id: &str) -> Option<&TripRecord> {
        if !self.contains(trip_id) {
            return None;
        }
        self.records.iter().find(|r| r.id == trip_id)
    }

    /// All stored records, oldest first, ignoring the retention window.
    pub fn iter(&self) -> impl Iterator<Item = &TripRecord> {
        self.records.iter()
    }

    /// Oldest date still inside the retention window at `now`.
    pub fn window_start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - Duration::days(i64::from(self.retention_days))
    }

    /// Inserts `record` in date order. Returns false, leaving the ledger
    /// unchanged, when a record with the same id is already present.
    pub fn append(&mut self, record: TripRecord) -> bool {
        if self.ids.contains(&record.id) {
            return false;
        }
        let pos = self
            .records
            .partition_point(|r| (r.date, r.id.as_str()) <= (record.date, record.id.as_str()));
        self.ids.insert(record.id.clone());
        self.records.insert(pos, record);
        true
    }

    /// Writes `record` through `backend`, then appends it in memory.
    ///
    /// Already-present ids are not written again.
    pub fn append_durable(
        &mut self,
        backend: &mut dyn DocumentStore,
        record: TripRecord,
    ) -> Result<bool, PersistError> {
        if self.contains(&record.id) {
            return Ok(false);
        }
        backend.write(&[Write::Put(Document::Trip(record.clone()))])?;
        Ok(self.append(record))
    }

    /// Records matching `filter` inside the retention window, newest first.
    pub fn query(&self, filter: TripFilter, now: DateTime<Utc>) -> TripQuery<'_> {
        TripQuery {
            records: &self.records,
            filter,
            window_start: self.window_start(now),
        }
    }

    /// Ids that a cleanup with `retention_days` at `now` would remove.
    pub fn plan_cleanup(&self, retention_days: u32, now: DateTime<Utc>) -> Vec<TripId> {
        let cutoff = now - Duration::days(i64::from(retention_days));
        self.records
            .iter()
            .take_while(|r| r.date < cutoff)
            .map(|r| r.id.clone())
            .collect()
    }

    /// Drops records dated before `now - retention_days` and returns their
    /// ids, oldest first. Survivors keep their order.
    #[instrument(level = "debug", skip(self))]
    pub fn cleanup(&mut self, retention_days: u32, now: DateTime<Utc>) -> Vec<TripId> {
        let removed = self.plan_cleanup(retention_days, now);
        self.remove_ids(&removed);
        if !removed.is_empty() {
            info!(removed = removed.len(), retention_days, "pruned trip history");
        }
        removed
    }

    /// Removes the given ids, ignoring unknown ones.
    pub fn remove_ids(&mut self, ids: &[TripId]) {
        if ids.is_empty() {
            return;
        }
        let drop: HashSet<&str> = ids.iter().map(String::as_str).collect();
        self.records.retain(|r| !drop.contains(r.id.as_str()));
        for id in ids {
            self.ids.remove(id);
        }
    }
}

/// Lazy, restartable view over a ledger query. Clone it to iterate again.
#[derive(Debug, Clone)]
pub struct TripQuery<'a> {
    records: &'a [TripRecord],
    filter: TripFilter,
    window_start: DateTime<Utc>,
}

impl<'a> TripQuery<'a> {
    /// Matching records, newest first.
    pub fn iter(&self) -> impl Iterator<Item = &'a TripRecord> + '_ {
        self.records
            .iter()
            .rev()
            .take_while(|r| r.date >= self.window_start)
            .filter(|r| self.filter.matches(r))
    }

    /// Number of matching records.
    pub fn count(&self) -> usize {
        self.iter().count()
    }

    /// Owned copies of the matching records.
    pub fn to_vec(&self) -> Vec<TripRecord> {
        self.iter().cloned().collect()
    }
}
