use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use chrono::{TimeZone, Utc};

use grocerylog::{
    catalog::CatalogDraft,
    core::session::Session,
    errors::Error,
    ledger::TripFilter,
    persist::{
        memory::MemoryDocumentStore, Collection, Document, DocumentStore, PersistError,
        PersistResult, Write,
    },
    runtime::{
        events::GroceryEvent,
        handle::{spawn_grocerylog, RuntimeConfig},
    },
    trip::{ExtraItemInput, Reconciliation},
    types::Money,
};

/// Backend that records batch sizes, sleeps on every write and can be
/// switched into a failing state.
struct SlowStore {
    inner: MemoryDocumentStore,
    batches: Arc<Mutex<Vec<usize>>>,
    failing: Arc<Mutex<bool>>,
    delay: Duration,
}

impl DocumentStore for SlowStore {
    fn read(&self, collection: Collection, key: &str) -> PersistResult<Option<Document>> {
        self.inner.read(collection, key)
    }

    fn write(&mut self, batch: &[Write]) -> PersistResult<()> {
        std::thread::sleep(self.delay);
        if *self.failing.lock().expect("lock") {
            return Err(PersistError::Unavailable("offline".to_string()));
        }
        self.batches.lock().expect("lock").push(batch.len());
        self.inner.write(batch)
    }

    fn list_where(
        &self,
        collection: Collection,
        pred: &dyn Fn(&Document) -> bool,
    ) -> PersistResult<Vec<Document>> {
        self.inner.list_where(collection, pred)
    }
}

fn store_config() -> RuntimeConfig {
    RuntimeConfig {
        batch_max_writes: 64,
        batch_max_latency_ms: 10_000,
        write_queue_bound: 16,
        cleanup_interval_secs: 0,
    }
}

#[tokio::test]
async fn edits_and_trip_emit_ordered_events() {
    let handle = spawn_grocerylog(Session::new(30), None, RuntimeConfig::default());
    let mut sub = handle.subscribe();

    let milk = handle
        .add_catalog_item("Safeway", CatalogDraft::new("Milk", Money::from_cents(349)))
        .await
        .expect("add item");
    handle
        .add_to_list("Safeway", milk.id.clone(), Some(2))
        .await
        .expect("add to list");
    let outcome = handle
        .complete_trip("Safeway", Reconciliation::default())
        .await
        .expect("complete");
    assert_eq!(outcome.record.totals.trip_total, Money::from_cents(698));

    let mut seen = Vec::new();
    while seen.len() < 4 {
        let evt = tokio::time::timeout(Duration::from_secs(1), sub.recv())
            .await
            .expect("event")
            .expect("recv");
        if !matches!(evt, GroceryEvent::DurableUpTo { .. }) {
            seen.push(evt);
        }
    }
    assert_eq!(
        seen[0],
        GroceryEvent::CatalogChanged {
            store: "Safeway".into(),
            item_id: milk.id.clone()
        }
    );
    assert_eq!(seen[1], GroceryEvent::ActiveListChanged { store: "Safeway".into() });
    assert_eq!(seen[2], GroceryEvent::ActiveListChanged { store: "Safeway".into() });
    assert_eq!(
        seen[3],
        GroceryEvent::TripCompleted {
            trip_id: outcome.record.id.clone(),
            store: "Safeway".into(),
            total: Money::from_cents(698),
        }
    );

    let fetched = handle.get_trip(outcome.record.id.clone()).await.expect("get");
    assert_eq!(fetched, outcome.record);
    assert!(handle.active_list("Safeway").await.expect("list").is_empty());
    assert!(matches!(
        handle.get_trip("missing").await,
        Err(Error::NotFound { .. })
    ));

    handle.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn edits_are_coalesced_until_flush() {
    let backend = MemoryDocumentStore::new();
    let batches = Arc::new(Mutex::new(Vec::new()));
    let slow = SlowStore {
        inner: backend.clone(),
        batches: Arc::clone(&batches),
        failing: Arc::new(Mutex::new(false)),
        delay: Duration::from_millis(1),
    };
    let handle = spawn_grocerylog(Session::new(30), Some(Box::new(slow)), store_config());

    handle
        .add_catalog_item("Safeway", CatalogDraft::new("Milk", Money::from_cents(349)))
        .await
        .expect("add item");
    for qty in 1..=5 {
        handle
            .add_to_list("Safeway", "sa-1", Some(1))
            .await
            .expect("add to list");
        assert_eq!(
            handle.active_list("Safeway").await.expect("list").entries[0].qty,
            qty
        );
    }
    assert!(batches.lock().expect("lock").is_empty());

    let generation = handle.flush().await.expect("flush");
    assert_eq!(generation, 1);
    // one catalog document and one list document, however many edits
    assert_eq!(*batches.lock().expect("lock"), vec![2]);
    assert_eq!(backend.count(Collection::Catalog), 1);
    assert_eq!(backend.count(Collection::ActiveLists), 1);

    handle.shutdown().await.expect("shutdown");
    let reloaded = Session::load(&backend, 30).expect("reload");
    assert_eq!(reloaded.list("Safeway")[0].qty, 5);
}

#[tokio::test]
async fn failed_trip_commit_changes_nothing() {
    let backend = MemoryDocumentStore::new();
    let failing = Arc::new(Mutex::new(false));
    let slow = SlowStore {
        inner: backend.clone(),
        batches: Arc::new(Mutex::new(Vec::new())),
        failing: Arc::clone(&failing),
        delay: Duration::from_millis(1),
    };
    let handle = spawn_grocerylog(Session::new(30), Some(Box::new(slow)), store_config());

    handle
        .add_catalog_item("Safeway", CatalogDraft::new("Milk", Money::from_cents(349)))
        .await
        .expect("add item");
    handle
        .add_to_list("Safeway", "sa-1", Some(2))
        .await
        .expect("add to list");
    handle.flush().await.expect("flush");
    let before = handle.snapshot().await.expect("snapshot");

    *failing.lock().expect("lock") = true;
    let rec = Reconciliation {
        extras: vec![ExtraItemInput::new("Gum", 1, Money::from_cents(150)).add_to_catalog()],
        ..Reconciliation::default()
    };
    let err = handle.complete_trip("Safeway", rec.clone()).await.unwrap_err();
    assert!(matches!(err, Error::TripNotSaved(_)));
    assert_eq!(handle.snapshot().await.expect("snapshot"), before);
    assert_eq!(backend.count(Collection::Trips), 0);

    *failing.lock().expect("lock") = false;
    let outcome = handle.complete_trip("Safeway", rec).await.expect("retry");
    assert_eq!(outcome.record.totals.trip_total, Money::from_cents(698 + 150));
    assert_eq!(backend.count(Collection::Trips), 1);
    assert_eq!(backend.count(Collection::ActiveLists), 0);

    handle.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn full_write_queue_surfaces_as_persistence_error() {
    let slow = SlowStore {
        inner: MemoryDocumentStore::new(),
        batches: Arc::new(Mutex::new(Vec::new())),
        failing: Arc::new(Mutex::new(false)),
        delay: Duration::from_millis(250),
    };
    let cfg = RuntimeConfig {
        batch_max_writes: 1,
        batch_max_latency_ms: 500,
        write_queue_bound: 1,
        cleanup_interval_secs: 0,
    };
    let handle = spawn_grocerylog(Session::new(30), Some(Box::new(slow)), cfg);

    let mut queue_error_seen = false;
    for i in 0..12 {
        let r = handle
            .add_catalog_item("Safeway", CatalogDraft::new(format!("Item {i}"), Money::from_cents(100)))
            .await;
        if let Err(Error::Persistence(_)) = r {
            queue_error_seen = true;
            break;
        }
    }
    assert!(queue_error_seen, "expected write queue pressure to surface as error");

    // Edits rejected by the queue are still written by shutdown.
    handle.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn cleanup_prunes_and_reports() {
    let now = Utc.with_ymd_and_hms(2026, 10, 19, 12, 0, 0).unwrap();
    let handle = spawn_grocerylog(Session::new(30), None, RuntimeConfig::default());
    let mut sub = handle.subscribe();

    handle
        .add_catalog_item("Safeway", CatalogDraft::new("Milk", Money::from_cents(349)))
        .await
        .expect("add item");
    for days_ago in [40, 1] {
        handle.add_to_list("Safeway", "sa-1", None).await.expect("list");
        handle
            .complete_trip_at(
                "Safeway",
                Reconciliation::default(),
                now - chrono::Duration::days(days_ago),
            )
            .await
            .expect("trip");
    }

    let removed = handle.cleanup(now).await.expect("cleanup");
    assert_eq!(removed.len(), 1);
    let remaining = handle.query_trips(TripFilter::all(), now).await.expect("query");
    assert_eq!(remaining.len(), 1);

    let pruned = loop {
        let evt = tokio::time::timeout(Duration::from_secs(1), sub.recv())
            .await
            .expect("event")
            .expect("recv");
        if let GroceryEvent::HistoryPruned { removed } = evt {
            break removed;
        }
    };
    assert_eq!(pruned, removed);

    handle.shutdown().await.expect("shutdown");
}
