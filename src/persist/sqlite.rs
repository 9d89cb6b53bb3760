//! SQLite-backed document store.

use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, instrument};

use super::{
    document::{decode, encode},
    Collection, Document, DocumentStore, PersistResult, Write,
};

/// SQLite implementation of [`DocumentStore`]. Every batch is one transaction.
pub struct SqliteDocumentStore {
    conn: Connection,
}

impl SqliteDocumentStore {
    /// Opens or creates a database at `path`.
    ///
    /// Enables WAL mode and sets `synchronous=NORMAL`.
    pub fn open(path: impl AsRef<Path>) -> PersistResult<Self> {
        let conn = Connection::open(path)?;
        Self::init_connection(conn)
    }

    /// Opens a private in-memory database.
    pub fn open_in_memory() -> PersistResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_connection(conn)
    }

    fn init_connection(conn: Connection) -> PersistResult<Self> {
        conn.execute_batch(include_str!("schema.sql"))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        Ok(Self { conn })
    }
}

impl DocumentStore for SqliteDocumentStore {
    fn read(&self, collection: Collection, key: &str) -> PersistResult<Option<Document>> {
        let payload: Option<Vec<u8>> = self
            .conn
            .query_row(
                "SELECT payload FROM documents WHERE collection = ?1 AND key = ?2",
                params![collection.as_str(), key],
                |row| row.get(0),
            )
            .optional()?;
        payload
            .map(|bytes| decode(collection, key, &bytes))
            .transpose()
    }

    #[instrument(level = "debug", skip_all, fields(writes = batch.len()))]
    fn write(&mut self, batch: &[Write]) -> PersistResult<()> {
        if batch.is_empty() {
            return Ok(());
        }

        let ts_ms = now_ms();
        let tx = self.conn.transaction()?;
        {
            let mut upsert = tx.prepare(
                "INSERT INTO documents(collection, key, updated_ms, payload) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(collection, key) DO UPDATE SET
                    updated_ms = excluded.updated_ms,
                    payload = excluded.payload",
            )?;
            let mut delete = tx.prepare("DELETE FROM documents WHERE collection = ?1 AND key = ?2")?;
            for write in batch {
                match write {
                    Write::Put(doc) => {
                        let payload = encode(doc)?;
                        upsert.execute(params![
                            doc.collection().as_str(),
                            doc.key(),
                            ts_ms as i64,
                            payload,
                        ])?;
                    }
                    Write::Delete { collection, key } => {
                        delete.execute(params![collection.as_str(), key])?;
                    }
                }
            }
        }
        tx.commit()?;
        debug!("batch committed");
        Ok(())
    }

    fn list_where(
        &self,
        collection: Collection,
        pred: &dyn Fn(&Document) -> bool,
    ) -> PersistResult<Vec<Document>> {
        let mut stmt = self
            .conn
            .prepare("SELECT key, payload FROM documents WHERE collection = ?1 ORDER BY key ASC")?;
        let rows = stmt.query_map(params![collection.as_str()], |row| {
            let key: String = row.get(0)?;
            let payload: Vec<u8> = row.get(1)?;
            Ok((key, payload))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (key, payload) = row?;
            let doc = decode(collection, &key, &payload)?;
            if pred(&doc) {
                out.push(doc);
            }
        }
        Ok(out)
    }

    fn flush(&mut self) -> PersistResult<()> {
        self.conn.execute_batch("PRAGMA wal_checkpoint(PASSIVE);")?;
        Ok(())
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{catalog::CatalogItem, types::Money};

    fn item(id: &str, name: &str) -> CatalogItem {
        CatalogItem {
            id: id.into(),
            store: "Safeway".into(),
            name: name.into(),
            category: "Dairy".into(),
            price: Money::from_cents(349),
            unit: "each".into(),
            default_qty: 1,
        }
    }

    #[test]
    fn batch_upserts_and_deletes() {
        let mut store = SqliteDocumentStore::open_in_memory().unwrap();
        store
            .write(&[
                Write::put_catalog_item(item("sa-2", "Eggs")),
                Write::put_catalog_item(item("sa-1", "Milk")),
            ])
            .unwrap();
        let mut repriced = item("sa-1", "Milk");
        repriced.price = Money::from_cents(379);
        store
            .write(&[
                Write::put_catalog_item(repriced.clone()),
                Write::delete_catalog_item("Safeway", "sa-2"),
            ])
            .unwrap();

        let docs = store.list(Collection::Catalog).unwrap();
        assert_eq!(docs, vec![Document::CatalogItem(repriced)]);
        assert!(store.read(Collection::Catalog, "Safeway/sa-2").unwrap().is_none());
    }
}
