//! Document loading seam.
//!
//! The engine never touches the filesystem. Front ends implement
//! `DocumentSource` over whatever storage they have; `MemorySource` serves
//! documents that were already parsed.

use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::document::{Category, Document};
use crate::error::LoadError;

pub trait DocumentSource: Send + Sync {
    fn load_document(&self, id: &str) -> Result<Arc<Document>, LoadError>;

    /// Ids of all documents of one category, sorted.
    fn list_documents(&self, category: Category) -> Vec<String>;
}

impl<S: DocumentSource + ?Sized> DocumentSource for Arc<S> {
    fn load_document(&self, id: &str) -> Result<Arc<Document>, LoadError> {
        (**self).load_document(id)
    }

    fn list_documents(&self, category: Category) -> Vec<String> {
        (**self).list_documents(category)
    }
}

enum Entry {
    Ready(Arc<Document>),
    Malformed(String),
}

/// In-memory document store.
#[derive(Default)]
pub struct MemorySource {
    entries: FxHashMap<String, Entry>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a document.
    pub fn insert(&mut self, document: Document) {
        self.entries
            .insert(document.id.clone(), Entry::Ready(Arc::new(document)));
    }

    pub fn with(mut self, document: Document) -> Self {
        self.insert(document);
        self
    }

    /// Register an id whose content could not be parsed. Loading it fails
    /// with `LoadError::Malformed`.
    pub fn insert_malformed(&mut self, id: impl Into<String>, reason: impl Into<String>) {
        self.entries.insert(id.into(), Entry::Malformed(reason.into()));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<Document> for MemorySource {
    fn from_iter<T: IntoIterator<Item = Document>>(iter: T) -> Self {
        let mut source = MemorySource::new();
        for document in iter {
            source.insert(document);
        }
        source
    }
}

impl DocumentSource for MemorySource {
    fn load_document(&self, id: &str) -> Result<Arc<Document>, LoadError> {
        match self.entries.get(id) {
            Some(Entry::Ready(document)) => Ok(Arc::clone(document)),
            Some(Entry::Malformed(reason)) => Err(LoadError::Malformed {
                id: id.to_string(),
                reason: reason.clone(),
            }),
            None => Err(LoadError::NotFound { id: id.to_string() }),
        }
    }

    fn list_documents(&self, category: Category) -> Vec<String> {
        let mut ids: Vec<String> = self
            .entries
            .iter()
            .filter_map(|(id, entry)| match entry {
                Entry::Ready(document) if document.category == category => Some(id.clone()),
                _ => None,
            })
            .collect();
        ids.sort();
        ids
    }
}
