//! Inheritance expansion for documents.
//!
//! `DefinitionGraph` flattens a document's "inherits-from" chain into one
//! `ExpandedDocument`: every key the document or any ancestor mentions, with
//! each property taken from the nearest document that sets it.
//!
//! # Invariants
//!
//! 1. **Nearest wins:** a document's own value beats its parent's, which beats
//!    the grandparent's, property by property.
//! 2. **Acyclic:** a parent chain that revisits a document fails with
//!    `InheritanceCycle`. Traversal is iterative and bounded by
//!    `max_depth`, so it never loops.
//! 3. **Shared ancestors expand once:** every expansion, including the
//!    intermediate ancestors, is cached for the life of the graph.

use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Serialize, Serializer};

use crate::document::{Category, Document, Override, RawValue, SchemaProps};
use crate::error::{LoadError, ResolveError};
use crate::resolve::ResolveOptions;
use crate::source::DocumentSource;
use crate::value::Value;

/// A raw value together with the document that set it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Contribution {
    pub document: String,
    pub raw: RawValue,
    /// Literal declared alongside a formula in the same document.
    pub fallback: Option<Value>,
}

/// All properties of one key after inheritance.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExpandedEntry {
    /// Winning value within the chain.
    pub value: Option<Contribution>,
    /// Values of farther ancestors hidden by `value`, nearest first.
    pub shadowed: Vec<Contribution>,
    pub minimum: Option<RawValue>,
    pub maximum: Option<RawValue>,
    pub enabled: Option<RawValue>,
    pub schema: SchemaProps,
}

impl ExpandedEntry {
    fn from_override(document: &str, ov: &Override) -> Self {
        Self {
            value: ov.value.clone().map(|raw| Contribution {
                document: document.to_string(),
                raw,
                fallback: ov.fallback.clone(),
            }),
            shadowed: Vec::new(),
            minimum: ov.minimum.clone(),
            maximum: ov.maximum.clone(),
            enabled: ov.enabled.clone(),
            schema: ov.schema.clone(),
        }
    }

    /// Merge `farther` (the parent's entry) beneath this one.
    fn inherit(&mut self, farther: &ExpandedEntry) {
        match self.value {
            Some(_) => {
                self.shadowed.extend(farther.value.iter().cloned());
                self.shadowed.extend(farther.shadowed.iter().cloned());
            }
            None => {
                self.value = farther.value.clone();
                self.shadowed = farther.shadowed.clone();
            }
        }
        if self.minimum.is_none() {
            self.minimum = farther.minimum.clone();
        }
        if self.maximum.is_none() {
            self.maximum = farther.maximum.clone();
        }
        if self.enabled.is_none() {
            self.enabled = farther.enabled.clone();
        }
        self.schema.inherit(&farther.schema);
    }

    pub fn defines_value(&self) -> bool {
        self.value.is_some()
    }

    /// Every value in the chain, farthest ancestor first, ending at the winner.
    pub fn contributions(&self) -> impl DoubleEndedIterator<Item = &Contribution> + '_ {
        self.shadowed.iter().rev().chain(self.value.iter())
    }
}

/// A document with its inheritance chain folded in.
#[derive(Debug, Clone, PartialEq)]
pub struct ExpandedDocument {
    pub id: String,
    pub category: Category,
    pub name: Option<String>,
    /// Document ids from this document up to the root.
    pub chain: Vec<String>,
    keys: Vec<String>,
    entries: FxHashMap<String, ExpandedEntry>,
}

impl ExpandedDocument {
    /// Expand `document` over its parent's already expanded form.
    fn expand(document: &Document, parent: Option<&ExpandedDocument>) -> Self {
        let mut keys = Vec::with_capacity(document.overrides.len());
        let mut entries = FxHashMap::default();

        for (key, ov) in document.overrides.iter() {
            keys.push(key.to_string());
            entries.insert(key.to_string(), ExpandedEntry::from_override(&document.id, ov));
        }

        let mut chain = vec![document.id.clone()];
        if let Some(parent) = parent {
            for key in &parent.keys {
                let Some(farther) = parent.entries.get(key) else { continue };
                match entries.get_mut(key) {
                    Some(entry) => entry.inherit(farther),
                    None => {
                        keys.push(key.clone());
                        entries.insert(key.clone(), farther.clone());
                    }
                }
            }
            chain.extend(parent.chain.iter().cloned());
        }

        Self {
            id: document.id.clone(),
            category: document.category,
            name: document.name.clone(),
            chain,
            keys,
            entries,
        }
    }

    pub fn get(&self, key: &str) -> Option<&ExpandedEntry> {
        self.entries.get(key)
    }

    /// Whether any document in the chain sets a value for `key`.
    pub fn defines(&self, key: &str) -> bool {
        self.entries.get(key).is_some_and(ExpandedEntry::defines_value)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Keys in first-occurrence order (own keys, then nearer ancestors').
    pub fn keys(&self) -> impl Iterator<Item = &str> + '_ {
        self.keys.iter().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ExpandedEntry)> + '_ {
        self.keys
            .iter()
            .filter_map(|k| self.entries.get(k).map(|e| (k.as_str(), e)))
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl Serialize for ExpandedDocument {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(self.iter())
    }
}

// =============================================================================
// DefinitionGraph
// =============================================================================

/// Session-owned, memoized inheritance expansion over a `DocumentSource`.
///
/// Safe to share between threads. Concurrent misses on the same document may
/// expand it twice; the first insert wins and both callers get that copy.
pub struct DefinitionGraph<S> {
    source: S,
    cache: RwLock<FxHashMap<String, Arc<ExpandedDocument>>>,
    max_depth: usize,
}

impl<S: DocumentSource> DefinitionGraph<S> {
    pub const DEFAULT_MAX_DEPTH: usize = 64;

    pub fn new(source: S) -> Self {
        Self {
            source,
            cache: RwLock::new(FxHashMap::default()),
            max_depth: Self::DEFAULT_MAX_DEPTH,
        }
    }

    pub fn with_options(source: S, options: &ResolveOptions) -> Self {
        Self::new(source).with_max_depth(options.max_inheritance_depth)
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth.max(1);
        self
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Expanded form of `id`, computing and caching it on first use.
    pub fn resolve(&self, id: &str) -> Result<Arc<ExpandedDocument>, ResolveError> {
        if let Some(hit) = self.cache.read().get(id) {
            return Ok(Arc::clone(hit));
        }

        // Walk up to the first cached ancestor (or the root), child first.
        let mut pending: Vec<Arc<Document>> = Vec::new();
        let mut visited: FxHashSet<String> = FxHashSet::default();
        let mut base: Option<Arc<ExpandedDocument>> = None;
        let mut current = id.to_string();

        loop {
            if let Some(hit) = self.cache.read().get(&current) {
                base = Some(Arc::clone(hit));
                break;
            }
            if visited.contains(&current) {
                let start = pending.iter().position(|d| d.id == current).unwrap_or(0);
                let members = pending[start..].iter().map(|d| d.id.clone()).collect();
                return Err(ResolveError::InheritanceCycle { members });
            }
            if pending.len() >= self.max_depth {
                return Err(ResolveError::InheritanceTooDeep {
                    id: id.to_string(),
                    limit: self.max_depth,
                });
            }

            let document = match self.source.load_document(&current) {
                Ok(document) => document,
                Err(LoadError::NotFound { .. }) if !pending.is_empty() => {
                    let referenced_by = pending.last().map(|d| d.id.clone()).unwrap_or_default();
                    return Err(ResolveError::MissingDocument {
                        id: current,
                        referenced_by,
                    });
                }
                Err(err) => return Err(err.into()),
            };

            visited.insert(current.clone());
            let parent = document.parent.clone();
            pending.push(document);
            match parent {
                Some(parent) => current = parent,
                None => break,
            }
        }

        let depth = pending.len() + base.as_ref().map_or(0, |b| b.chain.len());
        if depth > self.max_depth {
            return Err(ResolveError::InheritanceTooDeep {
                id: id.to_string(),
                limit: self.max_depth,
            });
        }

        log::debug!(
            "expanding '{}': {} uncached document(s), cached base {:?}",
            id,
            pending.len(),
            base.as_ref().map(|b| b.id.as_str())
        );

        // Fold from the farthest uncached ancestor down to the requested one.
        let mut expanded = base;
        while let Some(document) = pending.pop() {
            let fresh = Arc::new(ExpandedDocument::expand(&document, expanded.as_deref()));
            let mut cache = self.cache.write();
            let stored = cache.entry(document.id.clone()).or_insert(fresh);
            expanded = Some(Arc::clone(stored));
        }

        expanded.ok_or_else(|| LoadError::NotFound { id: id.to_string() }.into())
    }

    /// Document ids from `id` up to its root.
    pub fn inheritance_chain(&self, id: &str) -> Result<Vec<String>, ResolveError> {
        Ok(self.resolve(id)?.chain.clone())
    }

    pub fn cached(&self, id: &str) -> Option<Arc<ExpandedDocument>> {
        self.cache.read().get(id).cloned()
    }

    pub fn cache_len(&self) -> usize {
        self.cache.read().len()
    }

    pub fn clear_cache(&self) {
        self.cache.write().clear();
    }
}

/// Manufacturers recognized by id prefix when no `<name>_base` ancestor exists.
pub const KNOWN_MANUFACTURERS: [&str; 10] = [
    "creality", "prusa", "anycubic", "elegoo", "artillery",
    "flashforge", "lulzbot", "ultimaker", "makerbot", "voron",
];

/// Manufacturer named by an inheritance chain (child first).
///
/// A `<name>_base` document names it directly (except `fdm…`, the generic
/// root); otherwise the first id starting with a known manufacturer wins.
pub fn detect_manufacturer<K: AsRef<str>>(chain: &[String], known: &[K]) -> Option<String> {
    for id in chain {
        let id = id.to_lowercase();
        if let Some((prefix, _)) = id.split_once("_base") {
            if !prefix.is_empty() && prefix != "fdm" {
                return Some(prefix.to_string());
            }
        }
        if let Some(found) = known.iter().map(AsRef::as_ref).find(|k| id.starts_with(*k)) {
            return Some(found.to_string());
        }
    }
    None
}
