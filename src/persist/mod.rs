//! Persistence boundary: document model, the [`DocumentStore`] trait and
//! its backends.

pub mod document;
pub mod json_file;
pub mod memory;
pub mod sqlite;

use thiserror::Error;

pub use document::{Collection, Document, Write};

/// Backend failure.
#[derive(Debug, Error)]
pub enum PersistError {
    /// SQLite backend failure.
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A document could not be encoded or decoded.
    #[error("serialization: {0}")]
    Serde(#[from] serde_json::Error),

    /// File backend failure.
    #[error("I/O: {0}")]
    Io(#[from] std::io::Error),

    /// A stored document failed its envelope or content checks.
    #[error("bad document {collection}/{key}: {message}")]
    Schema {
        /// Collection holding the document.
        collection: Collection,
        /// Key of the document.
        key: String,
        /// Failed check.
        message: String,
    },

    /// The backend cannot be reached.
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    /// Any other backend failure.
    #[error("{0}")]
    Message(String),
}

/// Result of a backend call.
pub type PersistResult<T> = Result<T, PersistError>;

/// Keyed document storage with atomic batches.
pub trait DocumentStore: Send {
    /// Reads one document, `None` when absent.
    fn read(&self, collection: Collection, key: &str) -> PersistResult<Option<Document>>;

    /// Applies every write or none of them.
    fn write(&mut self, batch: &[Write]) -> PersistResult<()>;

    /// All documents of `collection` accepted by `pred`, ordered by key.
    fn list_where(
        &self,
        collection: Collection,
        pred: &dyn Fn(&Document) -> bool,
    ) -> PersistResult<Vec<Document>>;

    /// Every document of `collection`, ordered by key.
    fn list(&self, collection: Collection) -> PersistResult<Vec<Document>> {
        self.list_where(collection, &|_| true)
    }

    /// Makes previous writes durable. A no-op unless the backend buffers.
    fn flush(&mut self) -> PersistResult<()> {
        Ok(())
    }
}

impl<T: DocumentStore + ?Sized> DocumentStore for Box<T> {
    fn read(&self, collection: Collection, key: &str) -> PersistResult<Option<Document>> {
        (**self).read(collection, key)
    }

    fn write(&mut self, batch: &[Write]) -> PersistResult<()> {
        (**self).write(batch)
    }

    fn list_where(
        &self,
        collection: Collection,
        pred: &dyn Fn(&Document) -> bool,
    ) -> PersistResult<Vec<Document>> {
        (**self).list_where(collection, pred)
    }

    fn flush(&mut self) -> PersistResult<()> {
        (**self).flush()
    }
}
