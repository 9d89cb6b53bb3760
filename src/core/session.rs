//! Explicit owner of catalog, active lists and trip history.
//!
//! Every edit is applied in memory and recorded as a pending [`Write`]; the
//! caller decides when those reach a [`DocumentStore`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::{
    active_list::{ActiveList, ActiveListEntry, ActiveLists},
    catalog::{Catalog, CatalogDraft, CatalogItem, CatalogPatch},
    errors::{Error, Result, ValidationError},
    ledger::{HistoryLedger, TripFilter, TripQuery},
    persist::{Collection, Document, DocumentStore, Write},
    reconcile::TripCommit,
    trip::TripRecord,
    types::{Money, Qty, TripId, DEFAULT_UNIT},
};

/// Serializable copy of a whole session, in a stable order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    /// Days of history kept.
    pub retention_days: u32,
    /// Sorted by store, then id.
    pub catalog: Vec<CatalogItem>,
    /// Non-empty lists sorted by store.
    pub active_lists: Vec<ActiveList>,
    /// Oldest first.
    pub trips: Vec<TripRecord>,
}

/// Catalog, active lists and trip history, plus the writes they owe the backend.
#[derive(Debug, Clone, Default)]
pub struct Session {
    catalog: Catalog,
    lists: ActiveLists,
    ledger: HistoryLedger,
    pending: Vec<Write>,
}

impl Session {
    /// Empty session keeping `retention_days` of history.
    pub fn new(retention_days: u32) -> Self {
        Self {
            ledger: HistoryLedger::new(retention_days),
            ..Self::default()
        }
    }

    /// Rebuilds a session from an exported snapshot.
    pub fn from_snapshot(snapshot: SessionSnapshot) -> Self {
        let mut session = Self {
            catalog: Catalog::from_items(snapshot.catalog),
            lists: ActiveLists::from_lists(snapshot.active_lists),
            ledger: HistoryLedger::from_records(snapshot.retention_days, snapshot.trips),
            pending: Vec::new(),
        };
        session.reserve_referenced_ids();
        session
    }

    /// Copies the whole session in a stable order.
    pub fn export_snapshot(&self) -> SessionSnapshot {
        let mut catalog: Vec<CatalogItem> = self.catalog.all_items().into_iter().cloned().collect();
        catalog.sort_by(|a, b| (&a.store, &a.id).cmp(&(&b.store, &b.id)));
        SessionSnapshot {
            retention_days: self.ledger.retention_days(),
            catalog,
            active_lists: self.lists.all().into_iter().cloned().collect(),
            trips: self.ledger.iter().cloned().collect(),
        }
    }

    /// Reads every collection from `backend`. No cleanup is performed.
    #[instrument(level = "debug", skip(backend))]
    pub fn load(backend: &dyn DocumentStore, retention_days: u32) -> Result<Self> {
        let mut catalog = Vec::new();
        let mut lists = Vec::new();
        let mut trips = Vec::new();
        for collection in Collection::ALL {
            for doc in backend.list(collection)? {
                match doc {
                    Document::CatalogItem(item) => catalog.push(item),
                    Document::ActiveList(list) => lists.push(list),
                    Document::Trip(trip) => trips.push(trip),
                }
            }
        }
        debug!(
            catalog = catalog.len(),
            lists = lists.len(),
            trips = trips.len(),
            "session loaded"
        );
        let mut session = Self {
            catalog: Catalog::from_items(catalog),
            lists: ActiveLists::from_lists(lists),
            ledger: HistoryLedger::from_records(retention_days, trips),
            pending: Vec::new(),
        };
        session.reserve_referenced_ids();
        Ok(session)
    }

    /// Keeps ids still named by list lines or trips from being generated
    /// again for a different item.
    fn reserve_referenced_ids(&mut self) {
        for list in self.lists.all() {
            for entry in &list.entries {
                self.catalog.reserve_id(&list.store, &entry.catalog_item_id);
            }
        }
        for trip in self.ledger.iter() {
            let planned = trip.planned_items.iter().map(|p| p.catalog_item_id.as_str());
            let extras = trip.extra_items.iter().filter_map(|x| x.catalog_item_id.as_deref());
            for id in planned.chain(extras) {
                self.catalog.reserve_id(&trip.store, id);
            }
        }
    }

    /// Loads the session and prunes history older than the retention window.
    pub fn open(
        backend: &mut dyn DocumentStore,
        retention_days: u32,
        now: DateTime<Utc>,
    ) -> Result<(Self, Vec<TripId>)> {
        let mut session = Self::load(&*backend, retention_days)?;
        let removed = session.cleanup_history(backend, now)?;
        Ok((session, removed))
    }

    /// Catalog of every store.
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Active lists of every store.
    pub fn lists(&self) -> &ActiveLists {
        &self.lists
    }

    /// Trip history.
    pub fn ledger(&self) -> &HistoryLedger {
        &self.ledger
    }

    /// Days of history kept.
    pub fn retention_days(&self) -> u32 {
        self.ledger.retention_days()
    }

    /// Writes recorded since the last drain, oldest first.
    pub fn pending_writes(&self) -> &[Write] {
        &self.pending
    }

    /// Takes the pending writes, leaving none.
    pub fn drain_pending_writes(&mut self) -> Vec<Write> {
        std::mem::take(&mut self.pending)
    }

    /// Writes all pending edits to `backend` as one batch. On failure they
    /// stay pending.
    pub fn save(&mut self, backend: &mut dyn DocumentStore) -> Result<usize> {
        if self.pending.is_empty() {
            return Ok(0);
        }
        backend.write(&self.pending)?;
        let n = self.pending.len();
        self.pending.clear();
        Ok(n)
    }

    /// Adds a user-entered item; a duplicate name is rejected.
    pub fn add_catalog_item(&mut self, store: &str, draft: CatalogDraft) -> Result<CatalogItem> {
        let item = self.catalog.add_item(store, draft)?;
        self.pending.push(Write::put_catalog_item(item.clone()));
        Ok(item)
    }

    /// Patches a catalog item and refreshes its line on the open list.
    pub fn update_catalog_item(
        &mut self,
        store: &str,
        item_id: &str,
        patch: &CatalogPatch,
    ) -> Result<CatalogItem> {
        let item = self.catalog.update_item(store, item_id, patch)?;
        self.pending.push(Write::put_catalog_item(item.clone()));
        if self.lists.sync_item(&item) {
            self.push_list_write(store);
        }
        Ok(item)
    }

    /// Removes a catalog item. A line already on the list keeps its snapshot.
    pub fn remove_catalog_item(&mut self, store: &str, item_id: &str) -> Result<CatalogItem> {
        let item = self.catalog.remove_item(store, item_id)?;
        self.pending.push(Write::delete_catalog_item(store, item_id));
        Ok(item)
    }

    /// Adds a catalog item to its store's list; `qty` defaults to the item's
    /// default quantity.
    pub fn add_to_list(
        &mut self,
        store: &str,
        item_id: &str,
        qty: Option<Qty>,
    ) -> Result<ActiveListEntry> {
        let item = self
            .catalog
            .get(store, item_id)
            .ok_or_else(|| ValidationError::UnknownCatalogItem {
                store: store.to_string(),
                item_id: item_id.to_string(),
            })?;
        let qty = qty.unwrap_or(item.default_qty);
        let entry = self.lists.add(item, qty)?;
        self.push_list_write(store);
        Ok(entry)
    }

    /// Sets the quantity of a planned line.
    pub fn set_list_quantity(&mut self, store: &str, item_id: &str, qty: Qty) -> Result<ActiveListEntry> {
        let entry = self.lists.set_quantity(store, item_id, qty)?;
        self.push_list_write(store);
        Ok(entry)
    }

    /// Removes one line from `store`'s list.
    pub fn remove_from_list(&mut self, store: &str, item_id: &str) -> Result<ActiveListEntry> {
        let entry = self.lists.remove(store, item_id)?;
        self.push_list_write(store);
        Ok(entry)
    }

    /// Empties `store`'s list and returns the removed lines.
    pub fn clear_list(&mut self, store: &str) -> Vec<ActiveListEntry> {
        let removed = self.lists.clear(store);
        if !removed.is_empty() {
            self.push_list_write(store);
        }
        removed
    }

    /// Lines of `store`'s list.
    pub fn list(&self, store: &str) -> &[ActiveListEntry] {
        self.lists.entries(store)
    }

    /// Planned cost of `store`'s list.
    pub fn list_total(&self, store: &str) -> Money {
        self.lists.total(store)
    }

    /// Replaces the trip store's list with the trip's planned lines.
    ///
    /// Items still in the catalog take its current name and price; others
    /// keep the trip snapshot.
    pub fn restore_list_from_trip(&mut self, trip_id: &str) -> Result<ActiveList> {
        let trip = self.get_trip(trip_id)?;
        let store = trip.store.clone();
        let entries = trip
            .planned_items
            .iter()
            .map(|planned| match self.catalog.get(&store, &planned.catalog_item_id) {
                Some(item) => ActiveListEntry {
                    catalog_item_id: item.id.clone(),
                    name: item.name.clone(),
                    category: item.category.clone(),
                    unit: item.unit.clone(),
                    qty: planned.planned_qty,
                    price: item.price,
                },
                None => ActiveListEntry {
                    catalog_item_id: planned.catalog_item_id.clone(),
                    name: planned.name.clone(),
                    category: planned.category.clone(),
                    unit: DEFAULT_UNIT.to_string(),
                    qty: planned.planned_qty,
                    price: planned.catalog_price,
                },
            })
            .collect();
        let list = ActiveList {
            store: store.clone(),
            entries,
        };
        self.lists.replace(list.clone());
        self.push_list_write(&store);
        info!(%store, trip_id, lines = list.len(), "active list restored from trip");
        Ok(list)
    }

    /// Trip by id, [`Error::NotFound`] when absent.
    pub fn get_trip(&self, trip_id: &str) -> Result<&TripRecord> {
        self.ledger.get(trip_id).ok_or_else(|| Error::NotFound {
            trip_id: trip_id.to_string(),
        })
    }

    /// Trips within the retention window matching `filter`, newest first.
    pub fn query_trips(&self, filter: TripFilter, now: DateTime<Utc>) -> TripQuery<'_> {
        self.ledger.query(filter, now)
    }

    /// Applies a trip whose write batch has already been committed.
    pub fn apply_commit(&mut self, commit: &TripCommit) {
        for item in &commit.catalog_updates {
            self.catalog.put(item.clone());
        }
        self.lists.clear(&commit.record.store);
        self.ledger.append(commit.record.clone());
    }

    /// Ids a cleanup at `now` would prune.
    pub fn plan_cleanup(&self, now: DateTime<Utc>) -> Vec<TripId> {
        self.ledger.plan_cleanup(self.ledger.retention_days(), now)
    }

    /// Deletes for the given trip ids.
    pub fn cleanup_writes(ids: &[TripId]) -> Vec<Write> {
        ids.iter().map(|id| Write::delete_trip(id)).collect()
    }

    /// Drops pruned trips from memory after their deletes were committed.
    pub fn apply_cleanup(&mut self, ids: &[TripId]) {
        self.ledger.remove_ids(ids);
    }

    /// Prunes trips older than the retention window from `backend` and memory.
    ///
    /// Pending edits are written in the same batch.
    #[instrument(level = "debug", skip(self, backend))]
    pub fn cleanup_history(
        &mut self,
        backend: &mut dyn DocumentStore,
        now: DateTime<Utc>,
    ) -> Result<Vec<TripId>> {
        let ids = self.plan_cleanup(now);
        if ids.is_empty() {
            return Ok(ids);
        }
        let mut batch = self.pending.clone();
        batch.extend(Self::cleanup_writes(&ids));
        backend.write(&batch)?;
        self.pending.clear();
        self.apply_cleanup(&ids);
        info!(removed = ids.len(), "pruned trip history");
        Ok(ids)
    }

    fn push_list_write(&mut self, store: &str) {
        self.pending.push(Write::active_list(self.lists.snapshot(store)));
    }
}
