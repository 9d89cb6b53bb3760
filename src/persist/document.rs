//! Versioned, tagged documents exchanged with a [`super::DocumentStore`].

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{active_list::ActiveList, catalog::CatalogItem, trip::TripRecord};

use super::{PersistError, PersistResult};

/// Current envelope version written by every backend.
pub const DOCUMENT_FORMAT_VERSION: u16 = 1;

/// Logical collection a document lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    /// One document per catalog item, keyed `store/item_id`.
    Catalog,
    /// One document per store with a non-empty list, keyed by store name.
    ActiveLists,
    /// One document per trip, keyed by trip id.
    Trips,
}

impl Collection {
    /// All collections in load order.
    pub const ALL: [Collection; 3] = [Self::Catalog, Self::ActiveLists, Self::Trips];

    /// Stable name used as the storage key prefix.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Catalog => "catalog",
            Self::ActiveLists => "active_lists",
            Self::Trips => "trips",
        }
    }

    /// Inverse of [`Collection::as_str`].
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == name)
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stored record, tagged by kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "body", rename_all = "snake_case")]
pub enum Document {
    /// One catalog item, keyed by store and item id.
    CatalogItem(CatalogItem),
    /// A store's non-empty active list, keyed by store.
    ActiveList(ActiveList),
    /// A completed trip, keyed by trip id.
    Trip(TripRecord),
}

impl Document {
    /// Collection this kind of document belongs to.
    pub fn collection(&self) -> Collection {
        match self {
            Self::CatalogItem(_) => Collection::Catalog,
            Self::ActiveList(_) => Collection::ActiveLists,
            Self::Trip(_) => Collection::Trips,
        }
    }

    /// Key of the document inside its collection.
    pub fn key(&self) -> String {
        match self {
            Self::CatalogItem(item) => catalog_key(&item.store, &item.id),
            Self::ActiveList(list) => list.store.clone(),
            Self::Trip(trip) => trip.id.clone(),
        }
    }
}

/// Key of a catalog item document.
pub fn catalog_key(store: &str, item_id: &str) -> String {
    format!("{store}/{item_id}")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DocumentEnvelope {
    format_version: u16,
    document: Document,
}

/// Serializes `doc` inside the current envelope.
pub fn encode(doc: &Document) -> PersistResult<Vec<u8>> {
    #[derive(Serialize)]
    struct EnvelopeRef<'a> {
        format_version: u16,
        document: &'a Document,
    }
    Ok(serde_json::to_vec(&EnvelopeRef {
        format_version: DOCUMENT_FORMAT_VERSION,
        document: doc,
    })?)
}

/// Decodes a payload stored under `(collection, key)`.
///
/// Unknown versions, a kind that does not belong to `collection` and a key
/// that does not match the document are schema errors.
pub fn decode(collection: Collection, key: &str, payload: &[u8]) -> PersistResult<Document> {
    let env: DocumentEnvelope = serde_json::from_slice(payload)?;
    if env.format_version != DOCUMENT_FORMAT_VERSION {
        return Err(PersistError::Schema {
            collection,
            key: key.to_string(),
            message: format!("unsupported format version {}", env.format_version),
        });
    }
    let doc = env.document;
    if doc.collection() != collection {
        return Err(PersistError::Schema {
            collection,
            key: key.to_string(),
            message: format!("document of kind {} stored in the wrong collection", doc.collection()),
        });
    }
    if doc.key() != key {
        return Err(PersistError::Schema {
            collection,
            key: key.to_string(),
            message: format!("document key {} does not match", doc.key()),
        });
    }
    Ok(doc)
}

/// One entry of an atomic write batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Write {
    /// Insert or replace.
    Put(Document),
    /// Remove if present.
    Delete {
        /// Collection of the document.
        collection: Collection,
        /// Key of the document.
        key: String,
    },
}

impl Write {
    /// Storage address this write targets.
    pub fn address(&self) -> (Collection, String) {
        match self {
            Self::Put(doc) => (doc.collection(), doc.key()),
            Self::Delete { collection, key } => (*collection, key.clone()),
        }
    }

    /// Put of one catalog item.
    pub fn put_catalog_item(item: CatalogItem) -> Self {
        Self::Put(Document::CatalogItem(item))
    }

    /// Delete of one catalog item.
    pub fn delete_catalog_item(store: &str, item_id: &str) -> Self {
        Self::Delete {
            collection: Collection::Catalog,
            key: catalog_key(store, item_id),
        }
    }

    /// Put for a non-empty list, delete for an empty one.
    pub fn active_list(list: ActiveList) -> Self {
        if list.is_empty() {
            Self::Delete {
                collection: Collection::ActiveLists,
                key: list.store,
            }
        } else {
            Self::Put(Document::ActiveList(list))
        }
    }

    /// Delete of one trip.
    pub fn delete_trip(trip_id: &str) -> Self {
        Self::Delete {
            collection: Collection::Trips,
            key: trip_id.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Money;

    fn milk() -> CatalogItem {
        CatalogItem {
            id: "sa-1".into(),
            store: "Safeway".into(),
            name: "Milk".into(),
            category: "Dairy".into(),
            price: Money::from_cents(349),
            unit: "gal".into(),
            default_qty: 1,
        }
    }

    #[test]
    fn decode_checks_collection_and_key() {
        let doc = Document::CatalogItem(milk());
        let bytes = encode(&doc).unwrap();
        assert_eq!(decode(Collection::Catalog, "Safeway/sa-1", &bytes).unwrap(), doc);
        assert!(matches!(
            decode(Collection::Trips, "Safeway/sa-1", &bytes),
            Err(PersistError::Schema { .. })
        ));
        assert!(matches!(
            decode(Collection::Catalog, "Safeway/sa-2", &bytes),
            Err(PersistError::Schema { .. })
        ));
    }

    #[test]
    fn unknown_version_is_rejected() {
        let bytes = encode(&Document::CatalogItem(milk())).unwrap();
        let mut value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        value["format_version"] = 9.into();
        let bytes = serde_json::to_vec(&value).unwrap();
        let err = decode(Collection::Catalog, "Safeway/sa-1", &bytes).unwrap_err();
        assert!(err.to_string().contains("unsupported format version 9"));
    }

    #[test]
    fn empty_list_write_is_a_delete() {
        let write = Write::active_list(ActiveList::new("Safeway"));
        assert_eq!(
            write,
            Write::Delete {
                collection: Collection::ActiveLists,
                key: "Safeway".into()
            }
        );
    }
}
