use std::{collections::BTreeMap, sync::Arc};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::{
    sync::{broadcast, mpsc, oneshot, Mutex},
    time::{Duration, Instant},
};
use tracing::{debug, info, warn};

use crate::{
    active_list::{ActiveList, ActiveListEntry},
    catalog::{CatalogDraft, CatalogItem, CatalogPatch},
    core::session::{Session, SessionSnapshot},
    errors::{Error, Result},
    ledger::TripFilter,
    persist::{Collection, DocumentStore, PersistError, Write},
    reconcile::{plan_trip, TripOutcome},
    report::{self, HistorySummary, MonthlySummary},
    trip::{Reconciliation, TripRecord},
    types::{ItemId, Qty, StoreName, TripId},
};

use super::events::GroceryEvent;

/// Batching and timer settings of the runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Buffered documents that trigger an immediate write.
    pub batch_max_writes: usize,
    /// Longest time an edit waits in the buffer.
    pub batch_max_latency_ms: u64,
    /// Capacity of the queue between the runtime and the persistence worker.
    pub write_queue_bound: usize,
    /// Period of the history cleanup timer; 0 disables it.
    pub cleanup_interval_secs: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            batch_max_writes: 32,
            batch_max_latency_ms: 3000,
            write_queue_bound: 64,
            cleanup_interval_secs: 0,
        }
    }
}

/// Cloneable client of the runtime task.
#[derive(Clone)]
pub struct GroceryLogHandle {
    cmd_tx: mpsc::Sender<Command>,
    events_tx: broadcast::Sender<GroceryEvent>,
}

enum Command {
    AddCatalogItem {
        store: StoreName,
        draft: CatalogDraft,
        resp: oneshot::Sender<Result<CatalogItem>>,
    },
    UpdateCatalogItem {
        store: StoreName,
        item_id: ItemId,
        patch: CatalogPatch,
        resp: oneshot::Sender<Result<CatalogItem>>,
    },
    RemoveCatalogItem {
        store: StoreName,
        item_id: ItemId,
        resp: oneshot::Sender<Result<CatalogItem>>,
    },
    AddToList {
        store: StoreName,
        item_id: ItemId,
        qty: Option<Qty>,
        resp: oneshot::Sender<Result<ActiveListEntry>>,
    },
    SetListQuantity {
        store: StoreName,
        item_id: ItemId,
        qty: Qty,
        resp: oneshot::Sender<Result<ActiveListEntry>>,
    },
    RemoveFromList {
        store: StoreName,
        item_id: ItemId,
        resp: oneshot::Sender<Result<ActiveListEntry>>,
    },
    ClearList {
        store: StoreName,
        resp: oneshot::Sender<Result<Vec<ActiveListEntry>>>,
    },
    RestoreList {
        trip_id: TripId,
        resp: oneshot::Sender<Result<ActiveList>>,
    },
    CompleteTrip {
        store: StoreName,
        rec: Reconciliation,
        now: DateTime<Utc>,
        resp: oneshot::Sender<Result<TripOutcome>>,
    },
    Cleanup {
        now: DateTime<Utc>,
        resp: oneshot::Sender<Result<Vec<TripId>>>,
    },
    GetTrip {
        trip_id: TripId,
        resp: oneshot::Sender<Result<TripRecord>>,
    },
    QueryTrips {
        filter: TripFilter,
        now: DateTime<Utc>,
        resp: oneshot::Sender<Vec<TripRecord>>,
    },
    CatalogItems {
        store: StoreName,
        resp: oneshot::Sender<Vec<CatalogItem>>,
    },
    ActiveList {
        store: StoreName,
        resp: oneshot::Sender<ActiveList>,
    },
    MonthlySummary {
        year: i32,
        month: u32,
        store: Option<StoreName>,
        resp: oneshot::Sender<Result<MonthlySummary>>,
    },
    HistorySummary {
        resp: oneshot::Sender<HistorySummary>,
    },
    Snapshot {
        resp: oneshot::Sender<SessionSnapshot>,
    },
    Flush {
        resp: oneshot::Sender<Result<u64>>,
    },
    Shutdown {
        resp: oneshot::Sender<Result<()>>,
    },
}

enum PersistMsg {
    /// Ordinary edits; buffered and coalesced.
    Writes(Vec<Write>),
    /// Written together with the buffer, then acknowledged.
    Commit {
        batch: Vec<Write>,
        resp: oneshot::Sender<std::result::Result<u64, PersistError>>,
    },
    Flush {
        resp: oneshot::Sender<std::result::Result<u64, PersistError>>,
    },
    Shutdown {
        resp: oneshot::Sender<std::result::Result<(), PersistError>>,
    },
}

/// Starts the runtime task owning `session`.
///
/// Without a backend every edit is durable as soon as it is applied.
pub fn spawn_grocerylog(
    session: Session,
    backend: Option<Box<dyn DocumentStore>>,
    config: RuntimeConfig,
) -> GroceryLogHandle {
    let (cmd_tx, mut cmd_rx) = mpsc::channel::<Command>(256);
    let (events_tx, _) = broadcast::channel::<GroceryEvent>(1024);

    let (persist_tx, mut durable_rx) = if let Some(backend) = backend {
        let (persist_tx, persist_rx) = mpsc::channel::<PersistMsg>(config.write_queue_bound.max(1));
        let (durable_tx, durable_rx) = mpsc::unbounded_channel::<u64>();
        spawn_persistence_worker(backend, persist_rx, durable_tx, config.clone());
        (Some(persist_tx), Some(durable_rx))
    } else {
        (None, None)
    };

    let mut rt = Runtime {
        session,
        events_tx: events_tx.clone(),
        persist_tx,
        generation: 0,
    };

    tokio::spawn(async move {
        let cleanup_enabled = config.cleanup_interval_secs > 0;
        let period = Duration::from_secs(config.cleanup_interval_secs.max(1));
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);

        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => {
                    let Some(cmd) = cmd else { break; };
                    if rt.handle_command(cmd).await {
                        break;
                    }
                }
                durable = next_durable(&mut durable_rx) => {
                    match durable {
                        Some(generation) => {
                            let _ = rt.events_tx.send(GroceryEvent::DurableUpTo { generation });
                        }
                        None => durable_rx = None,
                    }
                }
                _ = ticker.tick(), if cleanup_enabled => {
                    if let Err(err) = rt.cleanup(Utc::now()).await {
                        warn!(%err, "scheduled history cleanup failed");
                    }
                }
            }
        }
        debug!("runtime loop stopped");
    });

    GroceryLogHandle { cmd_tx, events_tx }
}

async fn next_durable(rx: &mut Option<mpsc::UnboundedReceiver<u64>>) -> Option<u64> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

impl GroceryLogHandle {
    /// New receiver for runtime events.
    pub fn subscribe(&self) -> broadcast::Receiver<GroceryEvent> {
        self.events_tx.subscribe()
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(make(tx))
            .await
            .map_err(|_| Error::ChannelClosed)?;
        rx.await.map_err(|_| Error::ChannelClosed)
    }

    /// Adds a user-entered catalog item.
    pub async fn add_catalog_item(&self, store: impl Into<StoreName>, draft: CatalogDraft) -> Result<CatalogItem> {
        let store = store.into();
        self.request(|resp| Command::AddCatalogItem { store, draft, resp })
            .await?
    }

    /// Applies a sparse patch to a catalog item.
    pub async fn update_catalog_item(
        &self,
        store: impl Into<StoreName>,
        item_id: impl Into<ItemId>,
        patch: CatalogPatch,
    ) -> Result<CatalogItem> {
        let (store, item_id) = (store.into(), item_id.into());
        self.request(|resp| Command::UpdateCatalogItem {
            store,
            item_id,
            patch,
            resp,
        })
        .await?
    }

    /// Removes a catalog item.
    pub async fn remove_catalog_item(
        &self,
        store: impl Into<StoreName>,
        item_id: impl Into<ItemId>,
    ) -> Result<CatalogItem> {
        let (store, item_id) = (store.into(), item_id.into());
        self.request(|resp| Command::RemoveCatalogItem { store, item_id, resp })
            .await?
    }

    /// Adds an item to its store's list.
    pub async fn add_to_list(
        &self,
        store: impl Into<StoreName>,
        item_id: impl Into<ItemId>,
        qty: Option<Qty>,
    ) -> Result<ActiveListEntry> {
        let (store, item_id) = (store.into(), item_id.into());
        self.request(|resp| Command::AddToList {
            store,
            item_id,
            qty,
            resp,
        })
        .await?
    }

    /// Sets the quantity of a planned line.
    pub async fn set_list_quantity(
        &self,
        store: impl Into<StoreName>,
        item_id: impl Into<ItemId>,
        qty: Qty,
    ) -> Result<ActiveListEntry> {
        let (store, item_id) = (store.into(), item_id.into());
        self.request(|resp| Command::SetListQuantity {
            store,
            item_id,
            qty,
            resp,
        })
        .await?
    }

    /// Removes one line from a list.
    pub async fn remove_from_list(
        &self,
        store: impl Into<StoreName>,
        item_id: impl Into<ItemId>,
    ) -> Result<ActiveListEntry> {
        let (store, item_id) = (store.into(), item_id.into());
        self.request(|resp| Command::RemoveFromList { store, item_id, resp })
            .await?
    }

    /// Empties a store's list.
    pub async fn clear_list(&self, store: impl Into<StoreName>) -> Result<Vec<ActiveListEntry>> {
        let store = store.into();
        self.request(|resp| Command::ClearList { store, resp }).await?
    }

    /// Replaces a store's list with a past trip's planned lines.
    pub async fn restore_list_from_trip(&self, trip_id: impl Into<TripId>) -> Result<ActiveList> {
        let trip_id = trip_id.into();
        self.request(|resp| Command::RestoreList { trip_id, resp })
            .await?
    }

    /// Completes the trip for `store` at the current time.
    pub async fn complete_trip(&self, store: impl Into<StoreName>, rec: Reconciliation) -> Result<TripOutcome> {
        self.complete_trip_at(store, rec, Utc::now()).await
    }

    /// Completes the trip for `store` as of `now`.
    pub async fn complete_trip_at(
        &self,
        store: impl Into<StoreName>,
        rec: Reconciliation,
        now: DateTime<Utc>,
    ) -> Result<TripOutcome> {
        let store = store.into();
        self.request(|resp| Command::CompleteTrip {
            store,
            rec,
            now,
            resp,
        })
        .await?
    }

    /// Prunes history older than the retention window at `now`.
    pub async fn cleanup(&self, now: DateTime<Utc>) -> Result<Vec<TripId>> {
        self.request(|resp| Command::Cleanup { now, resp }).await?
    }

    /// Trip by id.
    pub async fn get_trip(&self, trip_id: impl Into<TripId>) -> Result<TripRecord> {
        let trip_id = trip_id.into();
        self.request(|resp| Command::GetTrip { trip_id, resp }).await?
    }

    /// Trips in the retention window at `now` matching `filter`, newest first.
    pub async fn query_trips(&self, filter: TripFilter, now: DateTime<Utc>) -> Result<Vec<TripRecord>> {
        self.request(|resp| Command::QueryTrips { filter, now, resp })
            .await
    }

    /// Items of one store's catalog.
    pub async fn catalog_items(&self, store: impl Into<StoreName>) -> Result<Vec<CatalogItem>> {
        let store = store.into();
        self.request(|resp| Command::CatalogItems { store, resp }).await
    }

    /// Copy of a store's list.
    pub async fn active_list(&self, store: impl Into<StoreName>) -> Result<ActiveList> {
        let store = store.into();
        self.request(|resp| Command::ActiveList { store, resp }).await
    }

    /// Monthly summary, optionally for one store.
    pub async fn monthly_summary(&self, year: i32, month: u32, store: Option<StoreName>) -> Result<MonthlySummary> {
        self.request(|resp| Command::MonthlySummary {
            year,
            month,
            store,
            resp,
        })
        .await?
    }

    /// Summary over every stored trip.
    pub async fn history_summary(&self) -> Result<HistorySummary> {
        self.request(|resp| Command::HistorySummary { resp }).await
    }

    /// Copy of the whole session.
    pub async fn snapshot(&self) -> Result<SessionSnapshot> {
        self.request(|resp| Command::Snapshot { resp }).await
    }

    /// Writes every buffered edit and returns the durable generation.
    pub async fn flush(&self) -> Result<u64> {
        self.request(|resp| Command::Flush { resp }).await?
    }

    /// Flushes and stops the runtime.
    pub async fn shutdown(&self) -> Result<()> {
        self.request(|resp| Command::Shutdown { resp }).await?
    }
}

struct Runtime {
    session: Session,
    events_tx: broadcast::Sender<GroceryEvent>,
    persist_tx: Option<mpsc::Sender<PersistMsg>>,
    /// Durable generation when running without a backend.
    generation: u64,
}

impl Runtime {
    async fn handle_command(&mut self, cmd: Command) -> bool {
        match cmd {
            Command::AddCatalogItem { store, draft, resp } => {
                let res = self.session.add_catalog_item(&store, draft);
                let _ = resp.send(self.after_edit(res, |item| {
                    vec![GroceryEvent::CatalogChanged {
                        store: item.store.clone(),
                        item_id: item.id.clone(),
                    }]
                }));
            }
            Command::UpdateCatalogItem {
                store,
                item_id,
                patch,
                resp,
            } => {
                let on_list = self.session.lists().get(&store).is_some_and(|l| l.get(&item_id).is_some());
                let res = self.session.update_catalog_item(&store, &item_id, &patch);
                let _ = resp.send(self.after_edit(res, |item| {
                    let mut events = vec![GroceryEvent::CatalogChanged {
                        store: item.store.clone(),
                        item_id: item.id.clone(),
                    }];
                    if on_list {
                        events.push(GroceryEvent::ActiveListChanged {
                            store: item.store.clone(),
                        });
                    }
                    events
                }));
            }
            Command::RemoveCatalogItem { store, item_id, resp } => {
                let res = self.session.remove_catalog_item(&store, &item_id);
                let _ = resp.send(self.after_edit(res, |item| {
                    vec![GroceryEvent::CatalogChanged {
                        store: item.store.clone(),
                        item_id: item.id.clone(),
                    }]
                }));
            }
            Command::AddToList {
                store,
                item_id,
                qty,
                resp,
            } => {
                let res = self.session.add_to_list(&store, &item_id, qty);
                let _ = resp.send(self.after_edit(res, |_| list_changed(&store)));
            }
            Command::SetListQuantity {
                store,
                item_id,
                qty,
                resp,
            } => {
                let res = self.session.set_list_quantity(&store, &item_id, qty);
                let _ = resp.send(self.after_edit(res, |_| list_changed(&store)));
            }
            Command::RemoveFromList { store, item_id, resp } => {
                let res = self.session.remove_from_list(&store, &item_id);
                let _ = resp.send(self.after_edit(res, |_| list_changed(&store)));
            }
            Command::ClearList { store, resp } => {
                let removed = self.session.clear_list(&store);
                let _ = resp.send(self.after_edit(Ok(removed), |removed| {
                    if removed.is_empty() {
                        Vec::new()
                    } else {
                        list_changed(&store)
                    }
                }));
            }
            Command::RestoreList { trip_id, resp } => {
                let res = self.session.restore_list_from_trip(&trip_id);
                let _ = resp.send(self.after_edit(res, |list| list_changed(&list.store)));
            }
            Command::CompleteTrip {
                store,
                rec,
                now,
                resp,
            } => {
                let _ = resp.send(self.complete_trip(&store, &rec, now).await);
            }
            Command::Cleanup { now, resp } => {
                let _ = resp.send(self.cleanup(now).await);
            }
            Command::GetTrip { trip_id, resp } => {
                let _ = resp.send(self.session.get_trip(&trip_id).cloned());
            }
            Command::QueryTrips { filter, now, resp } => {
                let _ = resp.send(self.session.query_trips(filter, now).to_vec());
            }
            Command::CatalogItems { store, resp } => {
                let items = self.session.catalog().items(&store).into_iter().cloned().collect();
                let _ = resp.send(items);
            }
            Command::ActiveList { store, resp } => {
                let _ = resp.send(self.session.lists().snapshot(&store));
            }
            Command::MonthlySummary {
                year,
                month,
                store,
                resp,
            } => {
                let res = report::monthly_summary(self.session.ledger(), year, month, store.as_deref())
                    .map_err(Error::from);
                let _ = resp.send(res);
            }
            Command::HistorySummary { resp } => {
                let _ = resp.send(report::history_summary(self.session.ledger()));
            }
            Command::Snapshot { resp } => {
                let _ = resp.send(self.session.export_snapshot());
            }
            Command::Flush { resp } => {
                let _ = resp.send(self.flush().await);
            }
            Command::Shutdown { resp } => {
                let out = self.shutdown().await;
                let _ = resp.send(out);
                return true;
            }
        }

        false
    }

    /// Forwards the writes of a successful edit and publishes its events.
    ///
    /// A full write queue is reported as an error; the edit stays in memory
    /// and its writes stay pending until the next forward.
    fn after_edit<T>(&mut self, res: Result<T>, events: impl FnOnce(&T) -> Vec<GroceryEvent>) -> Result<T> {
        let value = match res {
            Ok(value) => value,
            Err(err) => {
                debug!(%err, "edit rejected");
                return Err(err);
            }
        };
        let forwarded = self.forward_pending();
        for event in events(&value) {
            let _ = self.events_tx.send(event);
        }
        forwarded.map(|()| value)
    }

    fn forward_pending(&mut self) -> Result<()> {
        if self.session.pending_writes().is_empty() {
            return Ok(());
        }
        let Some(tx) = &self.persist_tx else {
            self.session.drain_pending_writes();
            self.mark_durable();
            return Ok(());
        };
        let writes = self.session.pending_writes().to_vec();
        tx.try_send(PersistMsg::Writes(writes)).map_err(|err| {
            warn!(%err, "write queue rejected edits");
            PersistError::Unavailable(format!("write queue: {err}"))
        })?;
        self.session.drain_pending_writes();
        Ok(())
    }

    /// Writes pending edits plus `writes` as one acknowledged batch.
    async fn commit(&mut self, writes: Vec<Write>) -> std::result::Result<(), PersistError> {
        let mut batch = self.session.pending_writes().to_vec();
        batch.extend(writes);
        if let Some(tx) = self.persist_tx.clone() {
            let (resp, rx) = oneshot::channel();
            tx.send(PersistMsg::Commit { batch, resp })
                .await
                .map_err(|_| worker_gone())?;
            rx.await.map_err(|_| worker_gone())??;
        } else {
            self.mark_durable();
        }
        self.session.drain_pending_writes();
        Ok(())
    }

    async fn complete_trip(&mut self, store: &str, rec: &Reconciliation, now: DateTime<Utc>) -> Result<TripOutcome> {
        let commit = plan_trip(&self.session, store, rec, now).map_err(|err| {
            debug!(%err, store, "reconciliation rejected");
            Error::from(err)
        })?;

        if let Err(err) = self.commit(commit.writes()).await {
            warn!(%err, trip_id = %commit.record.id, "trip batch failed");
            return Err(Error::TripNotSaved(err));
        }
        self.session.apply_commit(&commit);
        info!(
            trip_id = %commit.record.id,
            total = %commit.record.totals.trip_total,
            "trip completed"
        );

        let record = &commit.record;
        for item in &commit.catalog_updates {
            let _ = self.events_tx.send(GroceryEvent::CatalogChanged {
                store: item.store.clone(),
                item_id: item.id.clone(),
            });
        }
        let _ = self.events_tx.send(GroceryEvent::ActiveListChanged {
            store: record.store.clone(),
        });
        let _ = self.events_tx.send(GroceryEvent::TripCompleted {
            trip_id: record.id.clone(),
            store: record.store.clone(),
            total: record.totals.trip_total,
        });
        Ok(commit.into_outcome())
    }

    async fn cleanup(&mut self, now: DateTime<Utc>) -> Result<Vec<TripId>> {
        let ids = self.session.plan_cleanup(now);
        if ids.is_empty() {
            return Ok(ids);
        }
        self.commit(Session::cleanup_writes(&ids)).await?;
        self.session.apply_cleanup(&ids);
        info!(removed = ids.len(), "pruned trip history");
        let _ = self.events_tx.send(GroceryEvent::HistoryPruned {
            removed: ids.clone(),
        });
        Ok(ids)
    }

    async fn flush(&mut self) -> Result<u64> {
        let Some(tx) = self.persist_tx.clone() else {
            self.session.drain_pending_writes();
            return Ok(self.generation);
        };
        let pending = self.session.pending_writes().to_vec();
        if !pending.is_empty() {
            tx.send(PersistMsg::Writes(pending))
                .await
                .map_err(|_| worker_gone())?;
            self.session.drain_pending_writes();
        }
        let (resp, rx) = oneshot::channel();
        tx.send(PersistMsg::Flush { resp })
            .await
            .map_err(|_| worker_gone())?;
        Ok(rx.await.map_err(|_| worker_gone())??)
    }

    async fn shutdown(&mut self) -> Result<()> {
        self.flush().await?;
        let Some(tx) = self.persist_tx.take() else {
            return Ok(());
        };
        let (resp, rx) = oneshot::channel();
        tx.send(PersistMsg::Shutdown { resp })
            .await
            .map_err(|_| Error::ChannelClosed)?;
        rx.await.map_err(|_| Error::ChannelClosed)??;
        info!("runtime shut down");
        Ok(())
    }

    fn mark_durable(&mut self) {
        self.generation += 1;
        let _ = self.events_tx.send(GroceryEvent::DurableUpTo {
            generation: self.generation,
        });
    }
}

fn list_changed(store: &str) -> Vec<GroceryEvent> {
    vec![GroceryEvent::ActiveListChanged {
        store: store.to_string(),
    }]
}

fn worker_gone() -> PersistError {
    PersistError::Unavailable("persistence worker stopped".to_string())
}

type Buffer = BTreeMap<(Collection, String), Write>;

fn spawn_persistence_worker(
    backend: Box<dyn DocumentStore>,
    mut rx: mpsc::Receiver<PersistMsg>,
    durable_tx: mpsc::UnboundedSender<u64>,
    config: RuntimeConfig,
) {
    let backend = Arc::new(Mutex::new(backend));
    let latency = Duration::from_millis(config.batch_max_latency_ms);
    tokio::spawn(async move {
        let mut buf = Buffer::new();
        let mut deadline = Instant::now() + latency;
        let mut generation: u64 = 0;

        loop {
            tokio::select! {
                msg = rx.recv() => {
                    let Some(msg) = msg else {
                        let _ = flush_buf(&backend, &mut buf, &mut generation, &durable_tx, true).await;
                        break;
                    };

                    match msg {
                        PersistMsg::Writes(writes) => {
                            if buf.is_empty() {
                                deadline = Instant::now() + latency;
                            }
                            for write in writes {
                                buf.insert(write.address(), write);
                            }
                            if buf.len() >= config.batch_max_writes {
                                if let Err(err) = flush_buf(&backend, &mut buf, &mut generation, &durable_tx, false).await {
                                    warn!(%err, buffered = buf.len(), "batch write failed, will retry");
                                }
                                deadline = Instant::now() + latency;
                            }
                        }
                        PersistMsg::Commit { batch, resp } => {
                            let mut all: Vec<Write> = buf.values().cloned().collect();
                            all.extend(batch);
                            let result = write_batch(&backend, all, false).await.map(|()| {
                                buf.clear();
                                generation += 1;
                                let _ = durable_tx.send(generation);
                                generation
                            });
                            let _ = resp.send(result);
                        }
                        PersistMsg::Flush { resp } => {
                            let result = flush_buf(&backend, &mut buf, &mut generation, &durable_tx, true).await;
                            let _ = resp.send(result.map(|()| generation));
                            deadline = Instant::now() + latency;
                        }
                        PersistMsg::Shutdown { resp } => {
                            let result = flush_buf(&backend, &mut buf, &mut generation, &durable_tx, true).await;
                            let _ = resp.send(result);
                            break;
                        }
                    }
                }
                _ = tokio::time::sleep_until(deadline), if !buf.is_empty() => {
                    if let Err(err) = flush_buf(&backend, &mut buf, &mut generation, &durable_tx, false).await {
                        warn!(%err, buffered = buf.len(), "delayed write failed, will retry");
                    }
                    deadline = Instant::now() + latency;
                }
            }
        }
    });
}

/// Writes the buffer as one batch. The buffer is kept on failure.
async fn flush_buf(
    backend: &Arc<Mutex<Box<dyn DocumentStore>>>,
    buf: &mut Buffer,
    generation: &mut u64,
    durable_tx: &mpsc::UnboundedSender<u64>,
    call_flush: bool,
) -> std::result::Result<(), PersistError> {
    if buf.is_empty() {
        if call_flush {
            let backend = Arc::clone(backend);
            tokio::task::spawn_blocking(move || backend.blocking_lock().flush())
                .await
                .map_err(|e| PersistError::Message(format!("join error: {e}")))??;
        }
        return Ok(());
    }

    let batch: Vec<Write> = buf.values().cloned().collect();
    write_batch(backend, batch, call_flush).await?;
    buf.clear();
    *generation += 1;
    let _ = durable_tx.send(*generation);
    Ok(())
}

async fn write_batch(
    backend: &Arc<Mutex<Box<dyn DocumentStore>>>,
    batch: Vec<Write>,
    call_flush: bool,
) -> std::result::Result<(), PersistError> {
    let backend = Arc::clone(backend);
    tokio::task::spawn_blocking(move || {
        let mut backend = backend.blocking_lock();
        backend.write(&batch)?;
        if call_flush {
            backend.flush()?;
        }
        Ok::<(), PersistError>(())
    })
    .await
    .map_err(|e| PersistError::Message(format!("join error: {e}")))?
}
