//! Runtime event stream payloads.

use crate::types::{ItemId, Money, StoreName, TripId};

/// Events emitted from the single-writer runtime loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroceryEvent {
    /// A trip was committed to storage and applied.
    TripCompleted {
        /// Id of the new record.
        trip_id: TripId,
        /// Store visited.
        store: StoreName,
        /// Amount spent.
        total: Money,
    },
    /// A catalog item was created, edited or removed.
    CatalogChanged {
        /// Store of the catalog.
        store: StoreName,
        /// Item affected.
        item_id: ItemId,
    },
    /// A store's active list changed.
    ActiveListChanged {
        /// Store whose list changed.
        store: StoreName,
    },
    /// Trips older than the retention window were deleted.
    HistoryPruned {
        /// Ids of the deleted trips.
        removed: Vec<TripId>,
    },
    /// The backend has acknowledged this many write batches.
    DurableUpTo {
        /// Highest acknowledged batch generation.
        generation: u64,
    },
}
