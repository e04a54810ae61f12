//! Document sinks.
//!
//! A `Collection` resource declared in `define` exposes a terminal `save`
//! operator. The sink reads positions through its `indexMap` and writes
//! one document per record to a [`DocumentStore`]. Writers are acquired
//! when the stream worker opens its operators and released on close.

use crate::trait_::{Emission, Operator, OperatorRole, Resource, ResourceFactory};
use async_trait::async_trait;
use indexmap::IndexMap;
use retl_core::{Record, RetlError, RetlResult, Value};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::debug;

/// A stored document
pub type Document = serde_json::Map<String, serde_json::Value>;

/// Position to field-name mapping applied by a sink
///
/// When several names share one position, every binding is written.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FieldIndexMap {
    bindings: Vec<(String, usize)>,
}

impl FieldIndexMap {
    /// Create from `(name, position)` pairs
    #[must_use]
    pub fn new(bindings: Vec<(String, usize)>) -> Self {
        Self { bindings }
    }

    /// Parse an `indexMap` object of name to position
    ///
    /// # Errors
    ///
    /// Returns `InvalidDefinition` if a position is not a non-negative integer
    pub fn from_value(value: &Value, owner: &str) -> RetlResult<Self> {
        let map = value
            .as_object()
            .ok_or_else(|| RetlError::definition(owner, "`indexMap` must be an object"))?;

        let bindings = map
            .iter()
            .map(|(name, pos)| {
                pos.as_u64()
                    .and_then(|p| usize::try_from(p).ok())
                    .map(|p| (name.clone(), p))
                    .ok_or_else(|| {
                        RetlError::definition(
                            owner,
                            format!("`indexMap.{}` must be a non-negative integer", name),
                        )
                    })
            })
            .collect::<RetlResult<Vec<_>>>()?;

        Ok(Self { bindings })
    }

    /// Bindings in written order
    #[must_use]
    pub fn bindings(&self) -> &[(String, usize)] {
        &self.bindings
    }

    /// Build the document for `record`
    ///
    /// # Errors
    ///
    /// Returns `FieldOutOfBounds` if a bound position is past the end
    pub fn apply(&self, record: &Record) -> RetlResult<Document> {
        let mut doc = Document::new();
        for (name, pos) in &self.bindings {
            doc.insert(name.clone(), record.field(*pos)?.to_json());
        }
        Ok(doc)
    }
}

/// Writer for one collection, owned by one stream worker
#[async_trait]
pub trait CollectionWriter: Send {
    /// Write one document
    async fn insert(&mut self, doc: Document) -> RetlResult<()>;

    /// Flush buffered writes
    async fn flush(&mut self) -> RetlResult<()>;
}

/// Backing store for collections
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Open a writer for `collection`
    async fn connect(&self, collection: &str) -> RetlResult<Box<dyn CollectionWriter>>;
}

/// In-process store, mainly for tests and dry runs
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    collections: Arc<Mutex<IndexMap<String, Vec<Document>>>>,
}

impl MemoryStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of a collection's documents in insertion order
    #[must_use]
    pub fn documents(&self, collection: &str) -> Vec<Document> {
        self.collections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }
}

struct MemoryWriter {
    collections: Arc<Mutex<IndexMap<String, Vec<Document>>>>,
    collection: String,
}

#[async_trait]
impl CollectionWriter for MemoryWriter {
    async fn insert(&mut self, doc: Document) -> RetlResult<()> {
        self.collections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(self.collection.clone())
            .or_default()
            .push(doc);
        Ok(())
    }

    async fn flush(&mut self) -> RetlResult<()> {
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn connect(&self, collection: &str) -> RetlResult<Box<dyn CollectionWriter>> {
        Ok(Box::new(MemoryWriter {
            collections: Arc::clone(&self.collections),
            collection: collection.to_string(),
        }))
    }
}

/// Store writing `<dir>/<collection>.jsonl`, one document per line
#[derive(Debug, Clone)]
pub struct JsonLinesStore {
    dir: PathBuf,
}

impl JsonLinesStore {
    /// Create a store rooted at `dir`
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// File backing `collection`
    #[must_use]
    pub fn path_for(&self, collection: &str) -> PathBuf {
        self.dir.join(format!("{}.jsonl", collection))
    }
}

struct JsonLinesWriter {
    collection: String,
    out: BufWriter<tokio::fs::File>,
}

#[async_trait]
impl CollectionWriter for JsonLinesWriter {
    async fn insert(&mut self, doc: Document) -> RetlResult<()> {
        let mut line = serde_json::to_vec(&doc).map_err(|e| sink_error(&self.collection, e))?;
        line.push(b'\n');
        self.out
            .write_all(&line)
            .await
            .map_err(|e| sink_error(&self.collection, e))
    }

    async fn flush(&mut self) -> RetlResult<()> {
        self.out.flush().await.map_err(|e| sink_error(&self.collection, e))
    }
}

#[async_trait]
impl DocumentStore for JsonLinesStore {
    async fn connect(&self, collection: &str) -> RetlResult<Box<dyn CollectionWriter>> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| sink_error(collection, e))?;
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path_for(collection))
            .await
            .map_err(|e| sink_error(collection, e))?;

        Ok(Box::new(JsonLinesWriter {
            collection: collection.to_string(),
            out: BufWriter::new(file),
        }))
    }
}

fn sink_error(sink: &str, err: impl std::fmt::Display) -> RetlError {
    RetlError::SinkWriteFailure {
        sink: sink.to_string(),
        reason: err.to_string(),
    }
}

/// Resource factory for `Collection({collection: "..."})` handles
#[derive(Clone)]
pub struct CollectionFactory {
    store: Arc<dyn DocumentStore>,
}

impl CollectionFactory {
    /// Registry name for the resource kind
    pub const KIND: &'static str = "Collection";

    /// Create a factory backed by `store`
    #[must_use]
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }
}

impl ResourceFactory for CollectionFactory {
    fn create(&self, config: &Value) -> RetlResult<Arc<dyn Resource>> {
        let collection = config
            .require("collection", Self::KIND)?
            .as_str()
            .ok_or_else(|| RetlError::definition(Self::KIND, "`collection` must be a string"))?;

        Ok(Arc::new(CollectionResource {
            store: Arc::clone(&self.store),
            collection: collection.to_string(),
        }))
    }
}

/// A declared collection handle
pub struct CollectionResource {
    store: Arc<dyn DocumentStore>,
    collection: String,
}

impl Resource for CollectionResource {
    fn kind(&self) -> &str {
        CollectionFactory::KIND
    }

    fn method(&self, handle: &str, method: &str, config: &Value) -> RetlResult<Arc<dyn crate::Operator>> {
        match method {
            "save" => {
                let name = format!("{}.save", handle);
                let index_map = FieldIndexMap::from_value(config.require("indexMap", &name)?, &name)?;
                Ok(Arc::new(SaveOperator {
                    name,
                    store: Arc::clone(&self.store),
                    collection: self.collection.clone(),
                    index_map,
                    writer: tokio::sync::Mutex::new(None),
                }))
            }
            other => Err(RetlError::UnknownOperator {
                name: format!("{}.{}", handle, other),
            }),
        }
    }
}

/// Terminal operator writing one document per record
pub struct SaveOperator {
    name: String,
    store: Arc<dyn DocumentStore>,
    collection: String,
    index_map: FieldIndexMap,
    writer: tokio::sync::Mutex<Option<Box<dyn CollectionWriter>>>,
}

impl SaveOperator {
    /// The sink's index map
    #[must_use]
    pub fn index_map(&self) -> &FieldIndexMap {
        &self.index_map
    }
}

#[async_trait]
impl Operator for SaveOperator {
    fn name(&self) -> &str {
        &self.name
    }

    fn role(&self) -> OperatorRole {
        OperatorRole::Sink
    }

    async fn open(&self) -> RetlResult<()> {
        let mut writer = self.writer.lock().await;
        if writer.is_none() {
            debug!(sink = %self.name, collection = %self.collection, "Opening collection writer");
            *writer = Some(self.store.connect(&self.collection).await?);
        }
        Ok(())
    }

    async fn process(&self, record: &Record) -> RetlResult<Emission> {
        let doc = self.index_map.apply(record)?;
        let mut writer = self.writer.lock().await;
        if writer.is_none() {
            *writer = Some(self.store.connect(&self.collection).await?);
        }
        if let Some(writer) = writer.as_mut() {
            writer.insert(doc).await?;
        }
        Ok(Emission::none())
    }

    async fn close(&self) -> RetlResult<()> {
        if let Some(mut writer) = self.writer.lock().await.take() {
            debug!(sink = %self.name, collection = %self.collection, "Closing collection writer");
            writer.flush().await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn address_index_map() -> Value {
        serde_json::from_str(
            r#"{"indexMap": {"recordID": 0, "street": 1, "city": 2, "state": 3, "zip": 4, "zip+4": 5}}"#,
        )
        .unwrap()
    }

    fn save_operator(store: Arc<dyn DocumentStore>, config: &Value) -> Arc<dyn Operator> {
        let factory = CollectionFactory::new(store);
        let resource = factory
            .create(&Value::object([("collection", Value::from("address"))]))
            .unwrap();
        resource.method("addressTable", "save", config).unwrap()
    }

    #[test]
    fn test_index_map_apply() {
        let map = FieldIndexMap::from_value(address_index_map().get("indexMap").unwrap(), "t").unwrap();
        let record = Record::from_texts(["id1", "1 Main St", "Springfield", "IL", "62701", "1234"]);
        let doc = map.apply(&record).unwrap();
        assert_eq!(doc.get("city"), Some(&serde_json::json!("Springfield")));
        assert_eq!(doc.keys().next().map(String::as_str), Some("recordID"));
    }

    #[test]
    fn test_index_map_duplicate_position_writes_all() {
        let value: Value = serde_json::from_str(r#"{"firstName": 2, "middleName": 2}"#).unwrap();
        let map = FieldIndexMap::from_value(&value, "nameTable.save").unwrap();
        let doc = map.apply(&Record::from_texts(["a", "b", "c"])).unwrap();
        assert_eq!(doc.get("firstName"), Some(&serde_json::json!("c")));
        assert_eq!(doc.get("middleName"), Some(&serde_json::json!("c")));
    }

    #[test]
    fn test_index_map_out_of_bounds() {
        let value: Value = serde_json::from_str(r#"{"zip": 4}"#).unwrap();
        let map = FieldIndexMap::from_value(&value, "t").unwrap();
        assert_eq!(
            map.apply(&Record::from_texts(["a"])),
            Err(RetlError::FieldOutOfBounds { index: 4, len: 1 })
        );
    }

    #[test]
    fn test_index_map_rejects_negative() {
        let value: Value = serde_json::from_str(r#"{"zip": -1}"#).unwrap();
        assert!(FieldIndexMap::from_value(&value, "t").is_err());
    }

    #[tokio::test]
    async fn test_save_to_memory_store() {
        let store = MemoryStore::new();
        let op = save_operator(Arc::new(store.clone()), &address_index_map());
        assert_eq!(op.role(), OperatorRole::Sink);
        assert_eq!(op.name(), "addressTable.save");

        op.open().await.unwrap();
        let emission = op
            .process(&Record::from_texts(["id1", "st", "city", "ST", "00000", "1111"]))
            .await
            .unwrap();
        op.close().await.unwrap();

        assert!(emission.is_empty());
        let docs = store.documents("address");
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].get("zip+4"), Some(&serde_json::json!("1111")));
    }

    #[tokio::test]
    async fn test_save_to_json_lines_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonLinesStore::new(dir.path());
        let path = store.path_for("address");
        let op = save_operator(Arc::new(store), &address_index_map());

        op.open().await.unwrap();
        for id in ["a", "b"] {
            op.process(&Record::from_texts([id, "st", "c", "s", "z", "z4"]))
                .await
                .unwrap();
        }
        op.close().await.unwrap();

        let content = std::fs::read_to_string(path).unwrap();
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains(r#""recordID":"a""#));
    }

    #[test]
    fn test_unknown_method() {
        let resource = CollectionFactory::new(Arc::new(MemoryStore::new()))
            .create(&Value::object([("collection", Value::from("name"))]))
            .unwrap();
        assert_eq!(resource.kind(), "Collection");
        let result = resource.method("nameTable", "drop", &Value::Null);
        assert!(matches!(result, Err(RetlError::UnknownOperator { name }) if name == "nameTable.drop"));
    }

    #[test]
    fn test_collection_requires_name() {
        let factory = CollectionFactory::new(Arc::new(MemoryStore::new()));
        assert!(factory.create(&Value::Null).is_err());
    }
}
