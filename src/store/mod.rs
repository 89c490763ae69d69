//! Document store interface
//!
//! The flare engine never talks to a concrete database. It is handed a
//! [`DocumentStore`] at construction time and only relies on what the trait
//! promises: per-document atomic writes, filtered queries and snapshot
//! subscriptions.
//!
//! ```text
//! FlareRepository ──insert / update_fields / query_where──▶ DocumentStore
//!                                                              │
//!                                                       change notification
//!                                                              │
//! FeedProjector / VictimStatusProjector ◀──── SnapshotStream ──┘
//! ```
//!
//! [`MemoryStore`] is the in-process implementation used by the shell
//! binary and the tests.

pub mod memory;
pub mod query;
pub mod stream;

use async_trait::async_trait;
use serde_json::{Map, Value as JsonValue};

use crate::types::{FlareError, Result};

pub use memory::MemoryStore;
pub use query::{matches_all, Op, Predicate};
pub use stream::{Snapshot, SnapshotStream};

/// Document body: a JSON object keyed by field name
pub type Document = Map<String, JsonValue>;

/// A document together with the id the store assigned to it
#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    pub id: String,
    pub fields: Document,
}

impl StoredDocument {
    pub fn new(id: impl Into<String>, fields: Document) -> Self {
        Self {
            id: id.into(),
            fields,
        }
    }
}

/// Outcome of [`DocumentStore::insert_unless_exists`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConditionalInsert {
    /// Nothing matched the guard; the document was written under this id
    Inserted(String),
    /// At least one document matched the guard; nothing was written
    Blocked { existing: Vec<String> },
}

/// Outcome of [`DocumentStore::update_fields_where`]
#[derive(Debug, Clone, PartialEq)]
pub enum ConditionalUpdate {
    /// The document matched the guard and the fields were written
    Updated,
    /// The document no longer matched the guard; nothing was written
    Blocked { current: Document },
}

/// Durable document store collaborator
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Insert a document and return its new id
    async fn insert(&self, collection: &str, document: Document) -> Result<String>;

    /// Set the given fields on an existing document, leaving the others
    /// untouched. Fails with `NotFound` if `id` is absent.
    async fn update_fields(&self, collection: &str, id: &str, fields: Document) -> Result<()>;

    /// Load a single document
    async fn get(&self, collection: &str, id: &str) -> Result<Option<StoredDocument>>;

    /// All documents matching every predicate
    async fn query_where(
        &self,
        collection: &str,
        predicates: &[Predicate],
    ) -> Result<Vec<StoredDocument>>;

    /// Subscribe to the set of documents matching `predicates`
    ///
    /// The first item is the current matching set; later items follow
    /// every change to it.
    async fn subscribe(&self, collection: &str, predicates: Vec<Predicate>)
        -> Result<SnapshotStream>;

    /// Insert `document` only if no document matches `guard`
    ///
    /// The default implementation is a plain query followed by an insert and
    /// is NOT atomic: two concurrent callers can both pass the check. Stores
    /// that can evaluate the condition server-side should override it.
    async fn insert_unless_exists(
        &self,
        collection: &str,
        guard: &[Predicate],
        document: Document,
    ) -> Result<ConditionalInsert> {
        let existing = self.query_where(collection, guard).await?;
        if !existing.is_empty() {
            return Ok(ConditionalInsert::Blocked {
                existing: existing.into_iter().map(|d| d.id).collect(),
            });
        }
        let id = self.insert(collection, document).await?;
        Ok(ConditionalInsert::Inserted(id))
    }

    /// Set `fields` on `id` only if the document still matches `guard`
    ///
    /// Fails with `NotFound` if `id` is absent. Like `insert_unless_exists`,
    /// the default implementation reads then writes and is NOT atomic.
    async fn update_fields_where(
        &self,
        collection: &str,
        id: &str,
        guard: &[Predicate],
        fields: Document,
    ) -> Result<ConditionalUpdate> {
        let current = self
            .get(collection, id)
            .await?
            .ok_or_else(|| FlareError::NotFound(format!("{}/{}", collection, id)))?;
        if !matches_all(guard, &current.fields) {
            return Ok(ConditionalUpdate::Blocked {
                current: current.fields,
            });
        }
        self.update_fields(collection, id, fields).await?;
        Ok(ConditionalUpdate::Updated)
    }
}
