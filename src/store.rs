//! Storage abstraction for extracted documents.
//!
//! The [`DocumentStore`] trait is injected into ingestion and the chat relay
//! so each server (and each test) owns an isolated table. Entries are
//! inserted or removed wholesale and never mutated in place, which is why
//! lookups hand out `Arc<StoredDocument>` instead of guarded references.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;

use crate::models::{DocumentMetadata, StoredDocument};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("document id already exists: {0}")]
    DuplicateId(String),
}

/// Thread-safe associative table of extracted documents.
pub trait DocumentStore: Send + Sync {
    /// Inserts a new document. Fails if the id is already taken.
    fn insert(&self, doc: StoredDocument) -> Result<(), StoreError>;

    fn get(&self, id: &str) -> Option<Arc<StoredDocument>>;

    /// Removes a document, returning it if it existed.
    fn remove(&self, id: &str) -> Option<Arc<StoredDocument>>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn metadata(&self, id: &str) -> Option<DocumentMetadata> {
        self.get(id).map(|doc| DocumentMetadata::from(doc.as_ref()))
    }
}

/// In-memory store. No eviction: entries live until removed or the process exits.
#[derive(Default)]
pub struct InMemoryDocumentStore {
    docs: RwLock<HashMap<String, Arc<StoredDocument>>>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DocumentStore for InMemoryDocumentStore {
    fn insert(&self, doc: StoredDocument) -> Result<(), StoreError> {
        let mut docs = self.docs.write();
        match docs.entry(doc.id.clone()) {
            Entry::Occupied(e) => Err(StoreError::DuplicateId(e.key().clone())),
            Entry::Vacant(e) => {
                e.insert(Arc::new(doc));
                Ok(())
            }
        }
    }

    fn get(&self, id: &str) -> Option<Arc<StoredDocument>> {
        self.docs.read().get(id).cloned()
    }

    fn remove(&self, id: &str) -> Option<Arc<StoredDocument>> {
        self.docs.write().remove(id)
    }

    fn len(&self) -> usize {
        self.docs.read().len()
    }
}
