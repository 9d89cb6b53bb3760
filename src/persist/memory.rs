//! In-memory [`DocumentStore`] holding encoded payloads.
//!
//! Clones share the same storage, so a test can keep one handle while the
//! runtime owns another.

use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, MutexGuard},
};

use super::{
    document::{decode, encode},
    Collection, Document, DocumentStore, PersistError, PersistResult, Write,
};

type Table = BTreeMap<(Collection, String), Vec<u8>>;

/// Clones share the same documents.
#[derive(Debug, Clone, Default)]
pub struct MemoryDocumentStore {
    docs: Arc<Mutex<Table>>,
}

impl MemoryDocumentStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored documents in `collection`.
    pub fn count(&self, collection: Collection) -> usize {
        self.lock()
            .map(|docs| docs.keys().filter(|(c, _)| *c == collection).count())
            .unwrap_or(0)
    }

    /// Stores raw bytes under an address, bypassing encoding.
    pub fn insert_raw(&self, collection: Collection, key: &str, payload: Vec<u8>) -> PersistResult<()> {
        self.lock()?.insert((collection, key.to_string()), payload);
        Ok(())
    }

    fn lock(&self) -> PersistResult<MutexGuard<'_, Table>> {
        self.docs
            .lock()
            .map_err(|_| PersistError::Unavailable("memory store lock poisoned".to_string()))
    }
}

impl DocumentStore for MemoryDocumentStore {
    fn read(&self, collection: Collection, key: &str) -> PersistResult<Option<Document>> {
        let docs = self.lock()?;
        docs.get(&(collection, key.to_string()))
            .map(|payload| decode(collection, key, payload))
            .transpose()
    }

    fn write(&mut self, batch: &[Write]) -> PersistResult<()> {
        // Encode everything first so a serialization failure applies nothing.
        let mut staged = Vec::with_capacity(batch.len());
        for write in batch {
            let payload = match write {
                Write::Put(doc) => Some(encode(doc)?),
                Write::Delete { .. } => None,
            };
            staged.push((write.address(), payload));
        }

        let mut docs = self.lock()?;
        for (address, payload) in staged {
            match payload {
                Some(bytes) => {
                    docs.insert(address, bytes);
                }
                None => {
                    docs.remove(&address);
                }
            }
        }
        Ok(())
    }

    fn list_where(
        &self,
        collection: Collection,
        pred: &dyn Fn(&Document) -> bool,
    ) -> PersistResult<Vec<Document>> {
        let docs = self.lock()?;
        let mut out = Vec::new();
        for ((c, key), payload) in docs.iter() {
            if *c != collection {
                continue;
            }
            let doc = decode(collection, key, payload)?;
            if pred(&doc) {
                out.push(doc);
            }
        }
        Ok(out)
    }
}
