//! Single JSON file backend.
//!
//! The whole document set is rewritten on every batch: serialized to a
//! sibling temp file and renamed over the target, so a crash leaves either
//! the old or the new file.

use std::{
    collections::BTreeMap,
    fs,
    io::Write as _,
    path::{Path, PathBuf},
};

use serde_json::Value;
use tracing::debug;

use super::{
    document::{decode, encode},
    Collection, Document, DocumentStore, PersistError, PersistResult, Write,
};

type FileImage = BTreeMap<String, BTreeMap<String, Value>>;

/// Keeps every collection in one JSON file, rewritten whole on each batch.
pub struct JsonFileDocumentStore {
    path: PathBuf,
    image: FileImage,
}

impl JsonFileDocumentStore {
    /// Opens `path`, starting empty when the file does not exist yet.
    pub fn open(path: impl AsRef<Path>) -> PersistResult<Self> {
        let path = path.as_ref().to_path_buf();
        let image = match fs::read(&path) {
            Ok(bytes) if bytes.is_empty() => FileImage::new(),
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => FileImage::new(),
            Err(err) => return Err(err.into()),
        };
        for name in image.keys() {
            if Collection::parse(name).is_none() {
                return Err(PersistError::Message(format!(
                    "{}: unknown collection {name}",
                    path.display()
                )));
            }
        }
        Ok(Self { path, image })
    }

    /// File backing the store.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, image: &FileImage) -> PersistResult<()> {
        let tmp = self.path.with_extension("json.tmp");
        {
            let mut file = fs::File::create(&tmp)?;
            serde_json::to_writer_pretty(&mut file, image)?;
            file.write_all(b"\n")?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        debug!(path = %self.path.display(), "json snapshot written");
        Ok(())
    }
}

fn decode_value(collection: Collection, key: &str, value: &Value) -> PersistResult<Document> {
    let bytes = serde_json::to_vec(value)?;
    decode(collection, key, &bytes)
}

impl DocumentStore for JsonFileDocumentStore {
    fn read(&self, collection: Collection, key: &str) -> PersistResult<Option<Document>> {
        self.image
            .get(collection.as_str())
            .and_then(|docs| docs.get(key))
            .map(|value| decode_value(collection, key, value))
            .transpose()
    }

    fn write(&mut self, batch: &[Write]) -> PersistResult<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let mut next = self.image.clone();
        for write in batch {
            let (collection, key) = write.address();
            match write {
                Write::Put(doc) => {
                    let value: Value = serde_json::from_slice(&encode(doc)?)?;
                    next.entry(collection.as_str().to_string())
                        .or_default()
                        .insert(key, value);
                }
                Write::Delete { .. } => {
                    if let Some(docs) = next.get_mut(collection.as_str()) {
                        docs.remove(&key);
                    }
                }
            }
        }
        self.persist(&next)?;
        self.image = next;
        Ok(())
    }

    fn list_where(
        &self,
        collection: Collection,
        pred: &dyn Fn(&Document) -> bool,
    ) -> PersistResult<Vec<Document>> {
        let Some(docs) = self.image.get(collection.as_str()) else {
            return Ok(Vec::new());
        };
        let mut out = Vec::new();
        for (key, value) in docs {
            let doc = decode_value(collection, key, value)?;
            if pred(&doc) {
                out.push(doc);
            }
        }
        Ok(out)
    }
}
