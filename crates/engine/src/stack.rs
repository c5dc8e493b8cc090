//! Override layer stacks.
//!
//! A `StackSpec` names, per category, which document fills that layer. Building
//! it against a `DefinitionGraph` expands every layer once; the resulting
//! `LayerStack` is immutable and shared by every lookup of a resolution pass.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::definition_graph::{DefinitionGraph, ExpandedDocument};
use crate::document::{Category, Context};
use crate::error::ResolveError;
use crate::source::DocumentSource;

/// Declarative stack description: which document id fills which layer.
///
/// Extruder sub-stacks list only their inner layers; the shared layers in
/// `layers` sit beneath them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackSpec {
    pub layers: BTreeMap<Category, String>,
    #[serde(default)]
    pub extruders: BTreeMap<u32, BTreeMap<Category, String>>,
}

impl StackSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn layer(mut self, category: Category, id: impl Into<String>) -> Self {
        self.layers.insert(category, id.into());
        self
    }

    pub fn extruder_layer(mut self, position: u32, category: Category, id: impl Into<String>) -> Self {
        self.extruders.entry(position).or_default().insert(category, id.into());
        self
    }

    /// Declare an extruder with no inner layers of its own yet.
    pub fn extruder(mut self, position: u32) -> Self {
        self.extruders.entry(position).or_default();
        self
    }

    pub fn base(&self) -> Option<&str> {
        self.layers.get(&Category::Definition).map(String::as_str)
    }
}

/// One populated layer of a stack.
#[derive(Debug, Clone, Serialize)]
pub struct Layer {
    pub category: Category,
    /// `Global` for shared layers, the owning extruder for inner layers.
    pub context: Context,
    pub document: Arc<ExpandedDocument>,
}

impl Layer {
    pub fn document_id(&self) -> &str {
        &self.document.id
    }
}

/// Expanded, immutable stack. Absent layers are simply missing.
#[derive(Debug, Clone, Serialize)]
pub struct LayerStack {
    global: Vec<Layer>,
    extruders: BTreeMap<u32, Vec<Layer>>,
}

impl LayerStack {
    pub fn build<S: DocumentSource>(spec: &StackSpec, graph: &DefinitionGraph<S>) -> Result<Self, ResolveError> {
        if spec.base().is_none() {
            return Err(ResolveError::NoBaseLayer);
        }

        let global = expand_layers(&spec.layers, Context::Global, graph)?;
        let mut extruders = BTreeMap::new();
        for (&position, layers) in &spec.extruders {
            extruders.insert(position, expand_layers(layers, Context::Extruder(position), graph)?);
        }

        log::debug!(
            "built stack: {} shared layer(s), {} extruder(s)",
            global.len(),
            extruders.len()
        );
        Ok(Self { global, extruders })
    }

    /// The base (definition) layer. Always present.
    pub fn base(&self) -> &Layer {
        &self.global[0]
    }

    /// Shared layers, least to most specific.
    pub fn ordered_layers(&self) -> &[Layer] {
        &self.global
    }

    /// Layers applying in `context`, least to most specific. An extruder's
    /// inner layers come after (are more specific than) every shared layer.
    pub fn layers_for(&self, context: Context) -> impl DoubleEndedIterator<Item = &Layer> + '_ {
        let inner: &[Layer] = match context {
            Context::Global => &[],
            Context::Extruder(position) => self.extruders.get(&position).map(Vec::as_slice).unwrap_or_default(),
        };
        self.global.iter().chain(inner.iter())
    }

    /// Inner layers of one extruder.
    pub fn extruder_layers(&self, position: u32) -> &[Layer] {
        self.extruders.get(&position).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn extruder_positions(&self) -> Vec<u32> {
        self.extruders.keys().copied().collect()
    }

    pub fn has_extruder(&self, position: u32) -> bool {
        self.extruders.contains_key(&position)
    }
}

fn expand_layers<S: DocumentSource>(
    layers: &BTreeMap<Category, String>,
    context: Context,
    graph: &DefinitionGraph<S>,
) -> Result<Vec<Layer>, ResolveError> {
    // BTreeMap iteration follows Category order: least to most specific
    layers
        .iter()
        .map(|(&category, id)| {
            Ok(Layer {
                category,
                context,
                document: graph.resolve(id)?,
            })
        })
        .collect()
}
