//! Test harness for building documents and stacks tersely.
//!
//! `doc`/`definition` start a document; `DocumentExt` adds overrides in one
//! line each; `Fixture` bundles a source with a stack spec and resolves it.

use crate::definition_graph::DefinitionGraph;
use crate::document::{Category, Document, Override, RawValue};
use crate::error::ResolveError;
use crate::resolve::{resolve_all, Resolution, ResolveOptions};
use crate::source::MemorySource;
use crate::stack::{LayerStack, StackSpec};
use crate::value::{SettingType, Value};

pub fn doc(id: &str, category: Category) -> Document {
    Document::new(id, category)
}

pub fn definition(id: &str, parent: Option<&str>) -> Document {
    let document = Document::new(id, Category::Definition);
    match parent {
        Some(parent) => document.with_parent(parent),
        None => document,
    }
}

/// One-line override builders for test documents.
pub trait DocumentExt: Sized {
    fn set(self, key: &str, ov: Override) -> Self;

    fn lit(self, key: &str, value: impl Into<Value>) -> Self {
        self.set(key, Override::literal(value))
    }

    fn formula(self, key: &str, source: &str) -> Self {
        self.set(key, Override::formula(source))
    }

    /// Typed literal, as a definition declares it.
    fn typed(self, key: &str, setting_type: SettingType, value: impl Into<Value>) -> Self {
        self.set(key, Override::literal(value).typed(setting_type))
    }

    /// Typed formula with a literal default next to it.
    fn typed_formula(self, key: &str, setting_type: SettingType, source: &str, fallback: impl Into<Value>) -> Self {
        self.set(
            key,
            Override::with_value(RawValue::expression(source))
                .typed(setting_type)
                .fallback(fallback),
        )
    }
}

impl DocumentExt for Document {
    fn set(self, key: &str, ov: Override) -> Self {
        self.with_override(key, ov)
    }
}

/// A source plus a stack spec, resolved in one call.
pub struct Fixture {
    pub graph: DefinitionGraph<MemorySource>,
    pub spec: StackSpec,
}

impl Fixture {
    pub fn new(documents: Vec<Document>) -> Self {
        let mut spec = StackSpec::new();
        for document in &documents {
            // First document of each category fills its layer
            spec.layers
                .entry(document.category)
                .or_insert_with(|| document.id.clone());
        }
        Self {
            graph: DefinitionGraph::new(documents.into_iter().collect()),
            spec,
        }
    }

    /// Use an explicit spec instead of the derived one.
    pub fn with_spec(mut self, spec: StackSpec) -> Self {
        self.spec = spec;
        self
    }

    pub fn stack(&self) -> Result<LayerStack, ResolveError> {
        LayerStack::build(&self.spec, &self.graph)
    }

    pub fn resolve(&self) -> Result<Resolution, ResolveError> {
        resolve_all(&self.stack()?, &ResolveOptions::default())
    }
}
