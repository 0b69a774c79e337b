//! Document store collaborator
//!
//! Paths alternate collection and document segments, like
//! `Trackers/<id>/Configurations/<name>`. The engine only needs point reads and
//! writes, collection listing and a change feed per collection.

use crate::error::{Result, TrackerError};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::Path;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Kind of change reported on a feed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Added,
    Modified,
    Removed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DocChange {
    pub kind: ChangeKind,
    pub id: String,
    /// Document after the change; the last known content for `Removed`
    pub data: Value,
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, path: &str) -> Result<Option<Value>>;

    /// Write `fields`; `merge` keeps fields not mentioned
    async fn set(&self, path: &str, fields: Value, merge: bool) -> Result<()>;

    /// Create a document with a generated id
    async fn add(&self, collection: &str, fields: Value) -> Result<String>;

    /// Replace top-level fields of an existing document
    async fn update(&self, path: &str, fields: Value) -> Result<()>;

    async fn delete(&self, path: &str) -> Result<()>;

    /// `(id, document)` pairs ordered by id
    async fn list(&self, collection: &str) -> Result<Vec<(String, Value)>>;

    /// Change feed for one collection; existing documents arrive first as `Added`
    fn subscribe(&self, collection: &str) -> mpsc::UnboundedReceiver<DocChange>;
}

impl dyn DocumentStore {
    pub fn collection(&self, path: impl Into<String>) -> CollectionRef<'_> {
        CollectionRef {
            store: self,
            path: path.into(),
        }
    }

    pub fn doc(&self, path: impl Into<String>) -> DocRef<'_> {
        DocRef {
            store: self,
            path: path.into(),
        }
    }
}

pub struct CollectionRef<'a> {
    store: &'a dyn DocumentStore,
    path: String,
}

impl<'a> CollectionRef<'a> {
    pub fn doc(&self, id: &str) -> DocRef<'a> {
        DocRef {
            store: self.store,
            path: format!("{}/{}", self.path, id),
        }
    }

    pub async fn add(&self, fields: Value) -> Result<String> {
        self.store.add(&self.path, fields).await
    }

    pub async fn list(&self) -> Result<Vec<(String, Value)>> {
        self.store.list(&self.path).await
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

pub struct DocRef<'a> {
    store: &'a dyn DocumentStore,
    path: String,
}

impl<'a> DocRef<'a> {
    pub fn collection(&self, name: &str) -> CollectionRef<'a> {
        CollectionRef {
            store: self.store,
            path: format!("{}/{}", self.path, name),
        }
    }

    pub async fn get(&self) -> Result<Option<Value>> {
        self.store.get(&self.path).await
    }

    pub async fn set(&self, fields: Value, merge: bool) -> Result<()> {
        self.store.set(&self.path, fields, merge).await
    }

    pub async fn update(&self, fields: Value) -> Result<()> {
        self.store.update(&self.path, fields).await
    }

    pub async fn delete(&self) -> Result<()> {
        self.store.delete(&self.path).await
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

// ============================================================================
// In-memory implementation
// ============================================================================

struct Subscriber {
    collection: String,
    sender: mpsc::UnboundedSender<DocChange>,
}

/// Process-local store
#[derive(Default)]
pub struct MemoryStore {
    collections: DashMap<String, BTreeMap<String, Value>>,
    subscribers: Mutex<Vec<Subscriber>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a JSON object of `collection path -> { id -> document }`
    pub fn from_seed_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            TrackerError::store(format!("Failed to read seed {}: {}", path.display(), e))
        })?;
        let store = Self::from_seed(serde_json::from_str(&text)?)?;
        info!("Store seeded from {}", path.display());
        Ok(store)
    }

    pub fn from_seed(seed: Value) -> Result<Self> {
        let Value::Object(collections) = seed else {
            return Err(TrackerError::store("seed must be a JSON object"));
        };
        let store = Self::new();
        for (collection, docs) in collections {
            let Value::Object(docs) = docs else {
                return Err(TrackerError::store(format!(
                    "seed collection {} must be an object",
                    collection
                )));
            };
            store
                .collections
                .insert(collection, docs.into_iter().collect());
        }
        Ok(store)
    }

    /// Number of documents in a collection
    pub fn count(&self, collection: &str) -> usize {
        self.collections.get(collection).map_or(0, |docs| docs.len())
    }

    fn write(&self, collection: &str, id: &str, doc: Value) {
        let existed = {
            let mut docs = self.collections.entry(collection.to_string()).or_default();
            docs.insert(id.to_string(), doc.clone()).is_some()
        };
        let kind = if existed {
            ChangeKind::Modified
        } else {
            ChangeKind::Added
        };
        self.publish(collection, kind, id, doc);
    }

    fn publish(&self, collection: &str, kind: ChangeKind, id: &str, data: Value) {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|subscriber| {
            if subscriber.collection != collection {
                return !subscriber.sender.is_closed();
            }
            subscriber
                .sender
                .send(DocChange {
                    kind,
                    id: id.to_string(),
                    data: data.clone(),
                })
                .is_ok()
        });
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, path: &str) -> Result<Option<Value>> {
        let (collection, id) = split_doc_path(path)?;
        Ok(self
            .collections
            .get(collection)
            .and_then(|docs| docs.get(id).cloned()))
    }

    async fn set(&self, path: &str, fields: Value, merge: bool) -> Result<()> {
        let (collection, id) = split_doc_path(path)?;
        let doc = match (merge, self.get(path).await?) {
            (true, Some(mut existing)) => {
                merge_value(&mut existing, fields);
                existing
            },
            _ => fields,
        };
        self.write(collection, id, doc);
        Ok(())
    }

    async fn add(&self, collection: &str, fields: Value) -> Result<String> {
        let id = uuid::Uuid::new_v4().simple().to_string();
        self.write(collection, &id, fields);
        Ok(id)
    }

    async fn update(&self, path: &str, fields: Value) -> Result<()> {
        let (collection, id) = split_doc_path(path)?;
        let mut doc = self
            .get(path)
            .await?
            .ok_or_else(|| TrackerError::store(format!("No document to update: {}", path)))?;
        if let (Value::Object(doc), Value::Object(fields)) = (&mut doc, fields) {
            doc.extend(fields);
        }
        self.write(collection, id, doc);
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let (collection, id) = split_doc_path(path)?;
        let removed = self
            .collections
            .get_mut(collection)
            .and_then(|mut docs| docs.remove(id));
        match removed {
            Some(data) => self.publish(collection, ChangeKind::Removed, id, data),
            None => debug!("Delete of missing document {}", path),
        }
        Ok(())
    }

    async fn list(&self, collection: &str) -> Result<Vec<(String, Value)>> {
        Ok(self
            .collections
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .map(|(id, doc)| (id.clone(), doc.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }

    fn subscribe(&self, collection: &str) -> mpsc::UnboundedReceiver<DocChange> {
        let (sender, receiver) = mpsc::unbounded_channel();
        // snapshot and registration under one lock so no write slips between them
        let mut subscribers = self.subscribers.lock();
        if let Some(docs) = self.collections.get(collection) {
            for (id, data) in docs.iter() {
                let _ = sender.send(DocChange {
                    kind: ChangeKind::Added,
                    id: id.clone(),
                    data: data.clone(),
                });
            }
        }
        subscribers.push(Subscriber {
            collection: collection.to_string(),
            sender,
        });
        receiver
    }
}

fn split_doc_path(path: &str) -> Result<(&str, &str)> {
    let segments = path.split('/').count();
    match path.rsplit_once('/') {
        Some((collection, id)) if segments % 2 == 0 && !id.is_empty() => Ok((collection, id)),
        _ => Err(TrackerError::store(format!("Not a document path: {}", path))),
    }
}

/// Recursive merge of JSON objects; other values replace
pub fn merge_value(target: &mut Value, patch: Value) {
    match (target, patch) {
        (Value::Object(target), Value::Object(patch)) => merge_map(target, patch),
        (target, patch) => *target = patch,
    }
}

fn merge_map(target: &mut Map<String, Value>, patch: Map<String, Value>) {
    for (key, value) in patch {
        match target.get_mut(&key) {
            Some(existing) if existing.is_object() && value.is_object() => {
                merge_value(existing, value)
            },
            _ => {
                target.insert(key, value);
            },
        }
    }
}
