pub mod definition_graph;
pub mod document;
pub mod error;
pub mod evaluator;
pub mod formula;
pub mod provenance;
pub mod resolve;
pub mod source;
pub mod stack;
pub mod value;

#[cfg(test)]
pub mod harness;

pub use definition_graph::{detect_manufacturer, DefinitionGraph, ExpandedDocument, KNOWN_MANUFACTURERS};
pub use document::{Category, Context, Document, Override, RawValue};
pub use error::{LoadError, PerSettingError, ResolveError, SettingErrorKind};
pub use provenance::ProvenanceIndex;
pub use resolve::{resolve_all, resolve_batch, Resolution, ResolveOptions, ResolvedSetting};
pub use source::{DocumentSource, MemorySource};
pub use stack::{LayerStack, StackSpec};
pub use value::{SettingType, Value};
