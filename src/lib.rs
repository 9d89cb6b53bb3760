//! Grocery shopping core: per-store catalogs, active shopping lists, trip
//! reconciliation into an immutable history, and spending reports.
//!
//! # Examples
//!
//! Synchronous usage with an in-memory backend:
//! ```
//! use chrono::Utc;
//! use grocerylog::{
//!     catalog::CatalogDraft,
//!     core::session::Session,
//!     persist::memory::MemoryDocumentStore,
//!     reconcile::complete_trip,
//!     trip::{ExtraItemInput, PlannedItemInput, Reconciliation},
//!     types::Money,
//! };
//!
//! let mut backend = MemoryDocumentStore::new();
//! let mut session = Session::new(30);
//! let bananas = session
//!     .add_catalog_item("Trader Joe's", CatalogDraft::new("Bananas", Money::from_cents(99)))
//!     .expect("add item");
//! session.add_to_list("Trader Joe's", &bananas.id, Some(2)).expect("add to list");
//!
//! let rec = Reconciliation {
//!     items: vec![PlannedItemInput::purchased(bananas.id.clone(), 2, Money::from_cents(99))],
//!     extras: vec![ExtraItemInput::new("Chocolate", 2, Money::from_cents(249)).add_to_catalog()],
//!     notes: String::new(),
//! };
//! let outcome = complete_trip(&mut session, &mut backend, "Trader Joe's", &rec, Utc::now())
//!     .expect("complete trip");
//! assert_eq!(outcome.record.totals.trip_total, Money::from_cents(696));
//! assert!(session.list("Trader Joe's").is_empty());
//! ```
//!
//! Runtime usage with the SQLite backend:
//! ```no_run
//! use grocerylog::{
//!     core::session::Session,
//!     persist::sqlite::SqliteDocumentStore,
//!     runtime::handle::{spawn_grocerylog, RuntimeConfig},
//!     trip::Reconciliation,
//! };
//!
//! # #[tokio::main]
//! # async fn main() {
//! let mut backend = SqliteDocumentStore::open("grocerylog.sqlite").expect("open sqlite");
//! let (session, _pruned) =
//!     Session::open(&mut backend, 30, chrono::Utc::now()).expect("load session");
//! let handle = spawn_grocerylog(session, Some(Box::new(backend)), RuntimeConfig::default());
//! let outcome = handle
//!     .complete_trip("Trader Joe's", Reconciliation::default())
//!     .await;
//! println!("{outcome:?}");
//! handle.shutdown().await.expect("shutdown");
//! # }
//! ```
#![deny(missing_docs)]

/// Active shopping lists.
pub mod active_list;
/// Per-store item catalog.
pub mod catalog;
/// Configuration file and environment overrides.
pub mod config;
/// Session state owner.
pub mod core;
/// Error and warning types.
pub mod errors;
/// Trip history with retention.
pub mod ledger;
/// Persistence abstraction and backends.
pub mod persist;
/// Trip completion.
pub mod reconcile;
/// Monthly, history and budget reports.
pub mod report;
/// Single-writer runtime handle and events.
pub mod runtime;
/// Trip records and reconciliation payloads.
pub mod trip;
/// Shared primitive types.
pub mod types;

pub use errors::{Error, Result};
