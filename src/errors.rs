//! Error and warning types shared across the crate.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    persist::PersistError,
    types::{ItemId, Money, TripId},
};

/// Rejected input. Always recoverable by correcting the input; nothing has
/// been mutated when one of these is returned.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// The list is empty and no extras were given.
    #[error("nothing to record: the {store} list is empty and no extra items were given")]
    NothingToRecord {
        /// Store of the attempted trip.
        store: String,
    },

    /// A price below zero.
    #[error("{field} must not be negative (got {value})")]
    NegativePrice {
        /// Input field at fault.
        field: String,
        /// Rejected amount.
        value: Money,
    },

    /// A quantity below zero.
    #[error("{field} must not be negative (got {value})")]
    NegativeQuantity {
        /// Input field at fault.
        field: String,
        /// Rejected quantity.
        value: i64,
    },

    /// A quantity of zero where at least one unit is required.
    #[error("{field} must be at least 1 (got {value})")]
    QuantityTooSmall {
        /// Input field at fault.
        field: String,
        /// Rejected quantity.
        value: i64,
    },

    /// A quantity that does not fit in [`Qty`](crate::types::Qty).
    #[error("{field} is too large (got {value})")]
    QuantityTooLarge {
        /// Input field at fault.
        field: String,
        /// Rejected quantity.
        value: i64,
    },

    /// A line or trip total that does not fit in [`Money`].
    #[error("{field} exceeds the largest representable amount")]
    AmountTooLarge {
        /// Input field or total at fault.
        field: String,
    },

    /// A required field is empty.
    #[error("{field} is required")]
    MissingField {
        /// Input field at fault.
        field: String,
    },

    /// An item id that is not on the store's list.
    #[error("item {item_id} is not on the {store} list")]
    NotOnList {
        /// Store whose list was searched.
        store: String,
        /// Missing item.
        item_id: ItemId,
    },

    /// The same list item appears twice in one reconciliation.
    #[error("item {item_id} was reconciled more than once")]
    DuplicateInput {
        /// Repeated item.
        item_id: ItemId,
    },

    /// An item id that is not in the store's catalog.
    #[error("item {item_id} does not exist in the {store} catalog")]
    UnknownCatalogItem {
        /// Store whose catalog was searched.
        store: String,
        /// Missing item.
        item_id: ItemId,
    },

    /// A user-added item whose normalized name is already taken.
    #[error("item '{name}' already exists in the {store} catalog as {existing_id}")]
    DuplicateCatalogName {
        /// Store of the catalog.
        store: String,
        /// Name as given.
        name: String,
        /// Item that already has the name.
        existing_id: ItemId,
    },

    /// Month outside 1..=12, or a year chrono cannot represent.
    #[error("invalid month {year}-{month}")]
    InvalidMonth {
        /// Requested year.
        year: i32,
        /// Requested month.
        month: u32,
    },
}

/// Non-fatal condition reported next to a successful result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Warning {
    /// An extra item was added to the catalog although an item with the same
    /// normalized name already existed there.
    Duplicate {
        /// Store whose catalog received the item.
        store: String,
        /// Name of the added item.
        name: String,
        /// Id of the item that already carried this name.
        existing_item_id: ItemId,
        /// Id assigned to the newly inserted item.
        new_item_id: ItemId,
    },
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Duplicate {
                store,
                name,
                existing_item_id,
                new_item_id,
            } => write!(
                f,
                "'{name}' was added to the {store} catalog as {new_item_id}, \
                 but {existing_item_id} already has that name"
            ),
        }
    }
}

/// Crate-level error.
#[derive(Debug, Error)]
pub enum Error {
    /// Input was rejected.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The trip transaction could not be applied; storage and memory are
    /// exactly as they were before the call.
    #[error("could not save trip, no changes were made")]
    TripNotSaved(#[source] PersistError),

    /// A backend read or write failed.
    #[error("storage error: {0}")]
    Persistence(#[from] PersistError),

    /// No trip with this id in the ledger.
    #[error("trip not found: {trip_id}")]
    NotFound {
        /// Requested trip.
        trip_id: TripId,
    },

    /// The configuration file or environment could not be used.
    #[error("configuration error: {message}")]
    Config {
        /// What was wrong, including the file when there is one.
        message: String,
    },

    /// Filesystem failure outside a backend.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The runtime task has stopped.
    #[error("runtime channel closed")]
    ChannelClosed,
}

/// Convenience `Result` type.
pub type Result<T> = std::result::Result<T, Error>;
