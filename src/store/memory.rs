//! In-process document store
//!
//! Collections live in a `DashMap` keyed by collection name; each value is
//! the collection's documents. Writes go through the collection's shard
//! guard, so a single write is atomic and `insert_unless_exists` can hold
//! the guard across its check and its insert.
//!
//! Every committed write is announced on a broadcast channel. Each
//! subscription owns a task that re-evaluates its predicates when its
//! collection changes and pushes the new matching set if it differs from
//! the last one sent.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::query::{matches_all, Predicate};
use super::stream::{Snapshot, SnapshotStream};
use super::{ConditionalInsert, ConditionalUpdate, Document, DocumentStore, StoredDocument};
use crate::config::StoreConfig;
use crate::types::{FlareError, Result};

#[derive(Debug, Clone)]
enum StoreEvent {
    Changed { collection: String, id: String },
    Offline { reason: String },
}

struct Inner {
    collections: DashMap<String, HashMap<String, Document>>,
    changes: broadcast::Sender<StoreEvent>,
    online: AtomicBool,
    config: StoreConfig,
}

impl Inner {
    fn ensure_online(&self) -> Result<()> {
        if self.online.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(FlareError::StoreUnavailable("store is offline".to_string()))
        }
    }

    /// Current matching set, ordered by id so equal sets compare equal
    fn snapshot(&self, collection: &str, predicates: &[Predicate]) -> Snapshot {
        let mut docs: Snapshot = self
            .collections
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .filter(|(_, fields)| matches_all(predicates, fields))
                    .map(|(id, fields)| StoredDocument::new(id.clone(), fields.clone()))
                    .collect()
            })
            .unwrap_or_default();
        docs.sort_by(|a, b| a.id.cmp(&b.id));
        docs
    }

    fn notify(&self, collection: &str, id: &str) {
        // No receivers just means nobody is subscribed yet
        let _ = self.changes.send(StoreEvent::Changed {
            collection: collection.to_string(),
            id: id.to_string(),
        });
    }
}

/// In-memory [`DocumentStore`]
///
/// Cheap to clone; clones share the same data.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(StoreConfig::default())
    }
}

impl MemoryStore {
    pub fn new(config: StoreConfig) -> Self {
        let (changes, _) = broadcast::channel(config.change_buffer.max(1));

        info!(
            change_buffer = config.change_buffer,
            snapshot_buffer = config.snapshot_buffer,
            "MemoryStore initialized"
        );

        Self {
            inner: Arc::new(Inner {
                collections: DashMap::new(),
                changes,
                online: AtomicBool::new(true),
                config,
            }),
        }
    }

    /// Simulate losing the store
    ///
    /// Every operation fails with `StoreUnavailable` until [`go_online`]
    /// is called, and every open subscription ends with that error.
    ///
    /// [`go_online`]: MemoryStore::go_online
    pub fn go_offline(&self, reason: impl Into<String>) {
        let reason = reason.into();
        warn!(reason = %reason, "MemoryStore going offline");
        self.inner.online.store(false, Ordering::Release);
        let _ = self.inner.changes.send(StoreEvent::Offline { reason });
    }

    pub fn go_online(&self) {
        info!("MemoryStore back online");
        self.inner.online.store(true, Ordering::Release);
    }

    pub fn is_online(&self) -> bool {
        self.inner.online.load(Ordering::Acquire)
    }

    /// Number of documents in a collection
    pub fn len(&self, collection: &str) -> usize {
        self.inner
            .collections
            .get(collection)
            .map(|docs| docs.len())
            .unwrap_or(0)
    }

    pub fn is_empty(&self, collection: &str) -> bool {
        self.len(collection) == 0
    }

    fn new_id() -> String {
        Uuid::new_v4().simple().to_string()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn insert(&self, collection: &str, document: Document) -> Result<String> {
        self.inner.ensure_online()?;
        let id = Self::new_id();
        self.inner
            .collections
            .entry(collection.to_string())
            .or_default()
            .insert(id.clone(), document);

        debug!(collection, id = %id, "Document inserted");
        self.inner.notify(collection, &id);
        Ok(id)
    }

    async fn update_fields(&self, collection: &str, id: &str, fields: Document) -> Result<()> {
        self.inner.ensure_online()?;
        {
            let mut docs = self
                .inner
                .collections
                .get_mut(collection)
                .ok_or_else(|| FlareError::NotFound(format!("{}/{}", collection, id)))?;
            let doc = docs
                .get_mut(id)
                .ok_or_else(|| FlareError::NotFound(format!("{}/{}", collection, id)))?;
            for (field, value) in fields {
                doc.insert(field, value);
            }
        }

        debug!(collection, id, "Document updated");
        self.inner.notify(collection, id);
        Ok(())
    }

    async fn update_fields_where(
        &self,
        collection: &str,
        id: &str,
        guard: &[Predicate],
        fields: Document,
    ) -> Result<ConditionalUpdate> {
        self.inner.ensure_online()?;

        // Check and write under the same shard guard
        {
            let mut docs = self
                .inner
                .collections
                .get_mut(collection)
                .ok_or_else(|| FlareError::NotFound(format!("{}/{}", collection, id)))?;
            let doc = docs
                .get_mut(id)
                .ok_or_else(|| FlareError::NotFound(format!("{}/{}", collection, id)))?;
            if !matches_all(guard, doc) {
                debug!(collection, id, "Conditional update blocked");
                return Ok(ConditionalUpdate::Blocked {
                    current: doc.clone(),
                });
            }
            for (field, value) in fields {
                doc.insert(field, value);
            }
        }

        debug!(collection, id, "Document updated (conditional)");
        self.inner.notify(collection, id);
        Ok(ConditionalUpdate::Updated)
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<StoredDocument>> {
        self.inner.ensure_online()?;
        Ok(self.inner.collections.get(collection).and_then(|docs| {
            docs.get(id)
                .map(|fields| StoredDocument::new(id, fields.clone()))
        }))
    }

    async fn query_where(
        &self,
        collection: &str,
        predicates: &[Predicate],
    ) -> Result<Vec<StoredDocument>> {
        self.inner.ensure_online()?;
        Ok(self.inner.snapshot(collection, predicates))
    }

    async fn subscribe(
        &self,
        collection: &str,
        predicates: Vec<Predicate>,
    ) -> Result<SnapshotStream> {
        // Subscribe before checking the online flag and before taking the
        // first snapshot, so neither an outage nor a write falls in between.
        let mut changes = self.inner.changes.subscribe();
        self.inner.ensure_online()?;
        let initial = self.inner.snapshot(collection, &predicates);
        let (tx, rx) = mpsc::channel(self.inner.config.snapshot_buffer.max(1));

        let inner = self.inner.clone();
        let collection = collection.to_string();
        let task = tokio::spawn(async move {
            let mut last = initial.clone();
            if tx.send(Ok(initial)).await.is_err() {
                return;
            }

            loop {
                match changes.recv().await {
                    Ok(StoreEvent::Changed { collection: changed, id }) => {
                        if changed != collection {
                            continue;
                        }
                        let snapshot = inner.snapshot(&collection, &predicates);
                        if snapshot == last {
                            continue;
                        }
                        debug!(collection = %collection, id = %id, size = snapshot.len(), "Pushing snapshot");
                        last = snapshot.clone();
                        if tx.send(Ok(snapshot)).await.is_err() {
                            break;
                        }
                    }
                    Ok(StoreEvent::Offline { reason }) => {
                        let _ = tx.send(Err(FlareError::StoreUnavailable(reason))).await;
                        break;
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        // Snapshots are full replacements, so catching up is
                        // just re-reading the current set.
                        warn!(collection = %collection, skipped = n, "Subscription lagged behind change feed");
                        let snapshot = inner.snapshot(&collection, &predicates);
                        if snapshot != last {
                            last = snapshot.clone();
                            if tx.send(Ok(snapshot)).await.is_err() {
                                break;
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }

            debug!(collection = %collection, "Subscription task stopped");
        });

        Ok(SnapshotStream::new(rx, task))
    }

    async fn insert_unless_exists(
        &self,
        collection: &str,
        guard: &[Predicate],
        document: Document,
    ) -> Result<ConditionalInsert> {
        self.inner.ensure_online()?;

        // The entry guard holds the shard write lock across the check and
        // the insert.
        let id = {
            let mut docs = self
                .inner
                .collections
                .entry(collection.to_string())
                .or_default();

            let existing: Vec<String> = docs
                .iter()
                .filter(|(_, fields)| matches_all(guard, fields))
                .map(|(id, _)| id.clone())
                .collect();
            if !existing.is_empty() {
                return Ok(ConditionalInsert::Blocked { existing });
            }

            let id = Self::new_id();
            docs.insert(id.clone(), document);
            id
        };

        debug!(collection, id = %id, "Document inserted (conditional)");
        self.inner.notify(collection, &id);
        Ok(ConditionalInsert::Inserted(id))
    }
}
