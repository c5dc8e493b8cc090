//! Provenance view over a finished resolution.
//!
//! Read-only: answers "where did this value come from" for output assembly.
//! Nothing here evaluates or mutates; every answer is derived from the
//! `Resolution` it borrows.
//!
//! Design principles:
//! - The trail ends at the winner (least to most specific)
//! - Deterministic output (sorted maps, stable ordering)
//! - Extruder lookups fall back to the shared value like the resolver does

use std::collections::BTreeMap;

use serde::Serialize;

use crate::definition_graph::detect_manufacturer;
use crate::document::{Category, Context, RawValue};
use crate::error::PerSettingError;
use crate::resolve::{ChainEntry, Dependency, Resolution, ResolvedSetting, SourceRef};
use crate::value::Value;

/// One step of a provenance trail.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrailStep<'r> {
    pub category: Category,
    pub document: &'r str,
    pub raw: &'r RawValue,
    pub context: Context,
}

impl<'r> From<&'r ChainEntry> for TrailStep<'r> {
    fn from(entry: &'r ChainEntry) -> Self {
        Self {
            category: entry.category,
            document: &entry.document,
            raw: &entry.raw,
            context: entry.context,
        }
    }
}

/// Headline numbers for a resolution.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolutionSummary {
    pub total_settings: usize,
    pub extruder_count: usize,
    /// Base inheritance chain joined child first, e.g. `ender3 → creality_base → fdmprinter`.
    pub inheritance: String,
    pub manufacturer: Option<String>,
    pub error_count: usize,
    /// Number of settings won by each layer category.
    pub settings_by_category: BTreeMap<Category, usize>,
}

/// Value and winning layer of one important setting.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KeySetting<'r> {
    pub value: &'r Value,
    pub source: Option<&'r SourceRef>,
}

pub struct ProvenanceIndex<'r> {
    resolution: &'r Resolution,
}

impl<'r> ProvenanceIndex<'r> {
    pub fn new(resolution: &'r Resolution) -> Self {
        Self { resolution }
    }

    pub fn setting(&self, key: &str, context: Context) -> Option<&'r ResolvedSetting> {
        self.resolution.get_in(key, context)
    }

    /// Override chain of a setting, ending at the winner.
    pub fn trail(&self, key: &str, context: Context) -> Vec<TrailStep<'r>> {
        self.setting(key, context)
            .map(|s| s.chain.iter().map(TrailStep::from).collect())
            .unwrap_or_default()
    }

    pub fn source(&self, key: &str, context: Context) -> Option<&'r SourceRef> {
        self.setting(key, context).and_then(|s| s.source.as_ref())
    }

    pub fn dependencies(&self, key: &str, context: Context) -> &'r [Dependency] {
        self.setting(key, context)
            .map(|s| s.dependencies.as_slice())
            .unwrap_or_default()
    }

    /// Per-setting errors attached to `key`, in any context.
    pub fn errors_for(&self, key: &str) -> Vec<&'r PerSettingError> {
        let resolution: &'r Resolution = self.resolution;
        resolution.errors.iter().filter(|e| e.key == key).collect()
    }

    pub fn summary<K: AsRef<str>>(&self, known_manufacturers: &[K]) -> ResolutionSummary {
        self.summary_with(detect_manufacturer(&self.resolution.base_chain, known_manufacturers))
    }

    /// Summary with an already decided manufacturer.
    pub fn summary_with(&self, manufacturer: Option<String>) -> ResolutionSummary {
        let resolution = self.resolution;
        let mut settings_by_category = BTreeMap::new();
        for source in resolution.global.values().filter_map(|s| s.source.as_ref()) {
            *settings_by_category.entry(source.category).or_insert(0) += 1;
        }

        ResolutionSummary {
            total_settings: resolution.global.len(),
            extruder_count: resolution.extruders.len(),
            inheritance: resolution.base_chain.join(" → "),
            manufacturer,
            error_count: resolution.errors.len(),
            settings_by_category,
        }
    }

    /// Values of the given keys that exist in the global map, keyed by name.
    pub fn key_settings<K: AsRef<str>>(&self, keys: &[K]) -> BTreeMap<&'r str, KeySetting<'r>> {
        let resolution: &'r Resolution = self.resolution;
        keys.iter()
            .filter_map(|key| resolution.global.get_key_value(key.as_ref()))
            .map(|(key, setting)| {
                (
                    key.as_str(),
                    KeySetting {
                        value: &setting.value,
                        source: setting.source.as_ref(),
                    },
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition_graph::KNOWN_MANUFACTURERS;
    use crate::harness::{doc, DocumentExt, Fixture};
    use crate::stack::StackSpec;
    use crate::value::SettingType;

    fn fixture() -> Fixture {
        Fixture::new(vec![
            doc("fdmprinter", Category::Definition)
                .typed("layer_height", SettingType::Float, 0.1)
                .typed("speed_print", SettingType::Float, 60.0)
                .typed_formula("speed_wall_0", SettingType::Float, "speed_print * 0.8", 30.0),
            doc("creality_base", Category::Definition)
                .with_parent("fdmprinter")
                .lit("layer_height", 0.2),
            doc("creality_ender3", Category::Definition).with_parent("creality_base"),
            doc("normal", Category::Quality).lit("layer_height", 0.15),
            doc("pla", Category::Material).lit("speed_print", 50i64),
        ])
        .with_spec(
            StackSpec::new()
                .layer(Category::Definition, "creality_ender3")
                .layer(Category::Material, "pla")
                .layer(Category::Quality, "normal"),
        )
    }

    #[test]
    fn test_trail_ends_at_winner() {
        let resolution = fixture().resolve().unwrap();
        let index = ProvenanceIndex::new(&resolution);
        let trail = index.trail("layer_height", Context::Global);
        let documents: Vec<&str> = trail.iter().map(|s| s.document).collect();
        assert_eq!(documents, vec!["fdmprinter", "creality_base", "normal"]);
        assert_eq!(trail.last().map(|s| s.category), Some(Category::Quality));
        assert!(index.trail("nope", Context::Global).is_empty());
    }

    #[test]
    fn test_dependencies_carry_sources() {
        let resolution = fixture().resolve().unwrap();
        let index = ProvenanceIndex::new(&resolution);
        let deps = index.dependencies("speed_wall_0", Context::Global);
        assert_eq!(deps.len(), 1);
        assert_eq!(deps[0].key, "speed_print");
        assert_eq!(deps[0].value, Value::Float(50.0));
        assert_eq!(deps[0].source.as_ref().map(|s| s.category), Some(Category::Material));
    }

    #[test]
    fn test_summary() {
        let resolution = fixture().resolve().unwrap();
        let summary = ProvenanceIndex::new(&resolution).summary(&KNOWN_MANUFACTURERS);
        assert_eq!(summary.total_settings, 3);
        assert_eq!(summary.inheritance, "creality_ender3 → creality_base → fdmprinter");
        assert_eq!(summary.manufacturer.as_deref(), Some("creality"));
        assert_eq!(summary.error_count, 0);
        assert_eq!(summary.settings_by_category.get(&Category::Quality), Some(&1));
        assert_eq!(summary.settings_by_category.get(&Category::Definition), Some(&1));
    }

    #[test]
    fn test_key_settings_skip_unknown_keys() {
        let resolution = fixture().resolve().unwrap();
        let index = ProvenanceIndex::new(&resolution);
        let picked = index.key_settings(&["layer_height", "retraction_amount"]);
        assert_eq!(picked.len(), 1);
        assert_eq!(picked["layer_height"].value, &Value::Float(0.15));
    }
}
