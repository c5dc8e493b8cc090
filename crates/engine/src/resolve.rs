//! Whole-stack resolution.
//!
//! `resolve_all` produces a `ResolvedSetting` for every key of the base
//! layer's universe: the winning layer, the concrete value, the override chain
//! and the formula references that fed it. Structural and load errors abort the
//! pass; everything else is collected as `PerSettingError`s next to a result
//! that is still complete.

use std::collections::BTreeMap;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::definition_graph::{DefinitionGraph, ExpandedDocument};
use crate::document::{Category, Context, RawValue};
use crate::error::{PerSettingError, ResolveError, SettingErrorKind};
use crate::evaluator::Evaluator;
use crate::source::DocumentSource;
use crate::stack::{LayerStack, StackSpec};
use crate::value::{SettingType, Value};

// =============================================================================
// Options
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolveOptions {
    /// Evaluate minimum/maximum/enabled and report violations.
    pub check_constraints: bool,
    /// Produce per-extruder maps for stacks with extruder sub-stacks.
    pub resolve_extruders: bool,
    /// Longest inheritance chain a document may have.
    pub max_inheritance_depth: usize,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        Self {
            check_constraints: true,
            resolve_extruders: true,
            max_inheritance_depth: 64,
        }
    }
}

// =============================================================================
// Schema
// =============================================================================

/// Declared properties of one key, taken from the base layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SchemaEntry {
    pub setting_type: SettingType,
    pub options: Vec<String>,
    pub unit: Option<String>,
    pub settable_per_extruder: bool,
    pub label: Option<String>,
}

/// The key universe. Fixed by the base (definition) layer.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    keys: Vec<String>,
    entries: FxHashMap<String, SchemaEntry>,
}

impl Schema {
    pub fn from_base(base: &ExpandedDocument) -> Self {
        let mut schema = Schema::default();
        for (key, entry) in base.iter() {
            let props = &entry.schema;
            schema.keys.push(key.to_string());
            schema.entries.insert(
                key.to_string(),
                SchemaEntry {
                    setting_type: props.setting_type.unwrap_or_default(),
                    options: props.options.clone().unwrap_or_default(),
                    unit: props.unit.clone(),
                    settable_per_extruder: props.settable_per_extruder.unwrap_or(false),
                    label: props.label.clone(),
                },
            );
        }
        schema
    }

    pub fn get(&self, key: &str) -> Option<&SchemaEntry> {
        self.entries.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn setting_type(&self, key: &str) -> SettingType {
        self.entries.get(key).map(|e| e.setting_type).unwrap_or_default()
    }

    pub fn options(&self, key: &str) -> &[String] {
        self.entries.get(key).map(|e| e.options.as_slice()).unwrap_or_default()
    }

    pub fn per_extruder(&self, key: &str) -> bool {
        self.entries.get(key).is_some_and(|e| e.settable_per_extruder)
    }

    /// Keys in base-layer order.
    pub fn keys(&self) -> impl Iterator<Item = &str> + '_ {
        self.keys.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

// =============================================================================
// Results
// =============================================================================

/// Which layer and document a value came from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct SourceRef {
    pub category: Category,
    pub context: Context,
    pub document: String,
}

/// One step of an override chain.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChainEntry {
    pub category: Category,
    pub context: Context,
    pub document: String,
    pub raw: RawValue,
}

/// A setting a formula read, with where its own value came from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Dependency {
    pub key: String,
    pub context: Context,
    pub source: Option<SourceRef>,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedSetting {
    pub key: String,
    pub context: Context,
    pub value: Value,
    pub declared_type: SettingType,
    /// `None` only when no layer sets the key.
    pub source: Option<SourceRef>,
    /// Every value set for the key, least to most specific, ending at the winner.
    pub chain: Vec<ChainEntry>,
    pub enabled: bool,
    pub dependencies: Vec<Dependency>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Resolution {
    pub global: BTreeMap<String, ResolvedSetting>,
    /// Keys settable per extruder, per extruder position.
    pub extruders: BTreeMap<u32, BTreeMap<String, ResolvedSetting>>,
    pub errors: Vec<PerSettingError>,
    /// Inheritance chain of the base document, child first.
    pub base_chain: Vec<String>,
}

impl Resolution {
    pub fn get(&self, key: &str) -> Option<&ResolvedSetting> {
        self.global.get(key)
    }

    /// Setting in `context`. Keys without a per-extruder entry read the
    /// global map.
    pub fn get_in(&self, key: &str, context: Context) -> Option<&ResolvedSetting> {
        match context {
            Context::Global => self.global.get(key),
            Context::Extruder(position) => self
                .extruders
                .get(&position)
                .and_then(|settings| settings.get(key))
                .or_else(|| self.global.get(key)),
        }
    }

    pub fn errors_for<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a PerSettingError> + 'a {
        self.errors.iter().filter(move |e| e.key == key)
    }

    pub fn value(&self, key: &str) -> Option<&Value> {
        self.global.get(key).map(|s| &s.value)
    }
}

// =============================================================================
// Resolution
// =============================================================================

/// Resolve every key of the stack's base universe.
pub fn resolve_all(stack: &LayerStack, options: &ResolveOptions) -> Result<Resolution, ResolveError> {
    let base = &stack.base().document;
    let schema = Schema::from_base(base);
    let mut evaluator = Evaluator::new(stack, &schema);

    report_unknown_keys(stack, &schema, &mut evaluator);

    let mut global = BTreeMap::new();
    for key in schema.keys() {
        let setting = resolve_setting(&mut evaluator, stack, &schema, key, Context::Global, options)?;
        global.insert(key.to_string(), setting);
    }

    let mut extruders = BTreeMap::new();
    if options.resolve_extruders {
        for position in stack.extruder_positions() {
            let context = Context::Extruder(position);
            let mut settings = BTreeMap::new();
            for key in schema.keys().filter(|k| schema.per_extruder(k)) {
                let setting = resolve_setting(&mut evaluator, stack, &schema, key, context, options)?;
                settings.insert(key.to_string(), setting);
            }
            extruders.insert(position, settings);
        }
    }

    let errors = evaluator.into_errors();
    log::debug!(
        "resolved '{}': {} settings, {} extruder(s), {} error(s)",
        base.id,
        global.len(),
        extruders.len(),
        errors.len()
    );

    Ok(Resolution {
        global,
        extruders,
        errors,
        base_chain: base.chain.clone(),
    })
}

/// Build and resolve many stacks in parallel.
///
/// Each stack gets its own evaluator; only the graph's expansion cache is
/// shared. Results come back in `specs` order.
pub fn resolve_batch<S: DocumentSource>(
    graph: &DefinitionGraph<S>,
    specs: &[StackSpec],
    options: &ResolveOptions,
) -> Vec<Result<Resolution, ResolveError>> {
    if specs.is_empty() {
        return Vec::new();
    }

    let workers = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .min(specs.len());
    let chunk_size = specs.len().div_ceil(workers);

    std::thread::scope(|scope| {
        let handles: Vec<_> = specs
            .chunks(chunk_size)
            .map(|chunk| {
                scope.spawn(move || {
                    chunk
                        .iter()
                        .map(|spec| LayerStack::build(spec, graph).and_then(|stack| resolve_all(&stack, options)))
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut results = Vec::with_capacity(specs.len());
        for handle in handles {
            match handle.join() {
                Ok(part) => results.extend(part),
                Err(panic) => std::panic::resume_unwind(panic),
            }
        }
        results
    })
}

fn resolve_setting(
    evaluator: &mut Evaluator<'_>,
    stack: &LayerStack,
    schema: &Schema,
    key: &str,
    context: Context,
    options: &ResolveOptions,
) -> Result<ResolvedSetting, ResolveError> {
    let evaluated = evaluator.evaluated(key, context)?;
    let enabled = evaluator.check_constraints(
        key,
        context,
        &evaluated.value,
        evaluated.winner.as_ref(),
        options.check_constraints,
    )?;

    let dependencies = evaluated
        .dependencies
        .iter()
        .map(|(dep_key, dep_context)| {
            let outcome = evaluator.cached(dep_key, *dep_context);
            Dependency {
                key: dep_key.clone(),
                context: *dep_context,
                source: outcome.and_then(|o| o.winner.clone()),
                value: outcome.map(|o| o.value.clone()).unwrap_or_default(),
            }
        })
        .collect();

    Ok(ResolvedSetting {
        key: key.to_string(),
        context,
        value: evaluated.value,
        declared_type: schema.setting_type(key),
        source: evaluated.winner,
        chain: override_chain(stack, key, context),
        enabled,
        dependencies,
    })
}

/// Every value set for `key` in `context`, least to most specific. Within a
/// layer, shadowed ancestors come before the document that wins there.
pub fn override_chain(stack: &LayerStack, key: &str, context: Context) -> Vec<ChainEntry> {
    let mut chain = Vec::new();
    for layer in stack.layers_for(context) {
        let Some(entry) = layer.document.get(key) else { continue };
        for contribution in entry.contributions() {
            chain.push(ChainEntry {
                category: layer.category,
                context: layer.context,
                document: contribution.document.clone(),
                raw: contribution.raw.clone(),
            });
        }
    }
    chain
}

/// Keys set above the base layer that the base does not know.
fn report_unknown_keys(stack: &LayerStack, schema: &Schema, evaluator: &mut Evaluator<'_>) {
    let shared = stack.ordered_layers().iter().skip(1);
    let inner = stack
        .extruder_positions()
        .into_iter()
        .flat_map(|position| stack.extruder_layers(position).iter());
    for layer in shared.chain(inner) {
        for key in layer.document.keys().filter(|k| !schema.contains(k)) {
            evaluator.record(
                key,
                layer.context,
                SettingErrorKind::UnknownKey {
                    category: layer.category,
                    document: layer.document.id.clone(),
                },
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Override;
    use crate::error::Constraint;
    use crate::harness::{doc, DocumentExt, Fixture};

    #[test]
    fn test_chain_orders_ancestors_before_winner() {
        let fixture = Fixture::new(vec![
            doc("fdmprinter", Category::Definition).typed("layer_height", SettingType::Float, 0.1),
            doc("printer", Category::Definition)
                .with_parent("fdmprinter")
                .lit("layer_height", 0.2),
            doc("fine", Category::Quality).lit("layer_height", 0.06),
        ])
        .with_spec(
            StackSpec::new()
                .layer(Category::Definition, "printer")
                .layer(Category::Quality, "fine"),
        );
        let resolution = fixture.resolve().unwrap();
        let setting = resolution.get("layer_height").unwrap();
        let docs: Vec<&str> = setting.chain.iter().map(|c| c.document.as_str()).collect();
        assert_eq!(docs, vec!["fdmprinter", "printer", "fine"]);
        assert_eq!(setting.value, Value::Float(0.06));
        assert_eq!(setting.source.as_ref().map(|s| s.category), Some(Category::Quality));
        assert_eq!(resolution.base_chain, vec!["printer", "fdmprinter"]);
    }

    #[test]
    fn test_unknown_key_reported_once_per_layer() {
        let fixture = Fixture::new(vec![
            doc("base", Category::Definition).typed("layer_height", SettingType::Float, 0.2),
            doc("normal", Category::Quality).lit("mystery_setting", 1i64),
        ]);
        let resolution = fixture.resolve().unwrap();
        assert!(resolution.get("mystery_setting").is_none());
        let errors: Vec<_> = resolution.errors_for("mystery_setting").collect();
        assert_eq!(errors.len(), 1);
        assert_eq!(
            errors[0].kind,
            SettingErrorKind::UnknownKey {
                category: Category::Quality,
                document: "normal".into()
            }
        );
    }

    #[test]
    fn test_key_without_value_gets_zero() {
        let fixture = Fixture::new(vec![doc("base", Category::Definition)
            .set("infill_pattern", Override::new().typed(SettingType::Enum))]);
        let resolution = fixture.resolve().unwrap();
        let setting = resolution.get("infill_pattern").unwrap();
        assert_eq!(setting.value, Value::Text(String::new()));
        assert_eq!(setting.source, None);
        assert!(setting.chain.is_empty());
        assert_eq!(resolution.errors[0].kind, SettingErrorKind::NoValue);
    }

    #[test]
    fn test_minimum_and_maximum_checked() {
        let fixture = Fixture::new(vec![
            doc("base", Category::Definition)
                .set(
                    "speed_print",
                    Override::literal(60.0)
                        .typed(SettingType::Float)
                        .minimum(RawValue::literal(1.0))
                        .maximum(RawValue::expression("speed_max")),
                )
                .typed("speed_max", SettingType::Float, 150.0),
            doc("fast", Category::Quality).lit("speed_print", 200i64),
        ]);
        let resolution = fixture.resolve().unwrap();
        assert_eq!(resolution.value("speed_print"), Some(&Value::Float(200.0)));
        let errors: Vec<_> = resolution.errors_for("speed_print").collect();
        assert_eq!(errors.len(), 1);
        assert!(matches!(
            errors[0].kind,
            SettingErrorKind::ConstraintViolation { constraint: Constraint::Maximum, .. }
        ));
    }

    #[test]
    fn test_constraints_can_be_disabled() {
        let fixture = Fixture::new(vec![
            doc("base", Category::Definition).set(
                "speed_print",
                Override::literal(60.0).typed(SettingType::Float).minimum(RawValue::literal(1.0)),
            ),
            doc("slow", Category::User).lit("speed_print", 0.5),
        ]);
        let stack = fixture.stack().unwrap();
        let options = ResolveOptions {
            check_constraints: false,
            ..ResolveOptions::default()
        };
        let resolution = resolve_all(&stack, &options).unwrap();
        assert!(resolution.errors.is_empty());
    }

    #[test]
    fn test_disabled_setting_overridden_by_user() {
        let fixture = Fixture::new(vec![
            doc("base", Category::Definition)
                .typed("support_enable", SettingType::Bool, false)
                .set(
                    "support_angle",
                    Override::literal(50i64)
                        .typed(SettingType::Float)
                        .enabled(RawValue::expression("support_enable")),
                ),
            doc("me", Category::User).lit("support_angle", 60i64),
        ]);
        let resolution = fixture.resolve().unwrap();
        let setting = resolution.get("support_angle").unwrap();
        assert!(!setting.enabled);
        assert!(matches!(
            resolution.errors_for("support_angle").next().map(|e| &e.kind),
            Some(SettingErrorKind::ConstraintViolation { constraint: Constraint::Enabled, .. })
        ));
    }

    #[test]
    fn test_extruder_maps_hold_per_extruder_keys_only() {
        let fixture = Fixture::new(vec![
            doc("base", Category::Definition)
                .set("line_width", Override::literal(0.4).typed(SettingType::Float).per_extruder(true))
                .typed("machine_width", SettingType::Float, 220.0),
            doc("nozzle_08", Category::Variant).lit("line_width", 0.8),
        ])
        .with_spec(
            StackSpec::new()
                .layer(Category::Definition, "base")
                .extruder_layer(0, Category::Variant, "nozzle_08"),
        );
        let resolution = fixture.resolve().unwrap();
        let extruder = &resolution.extruders[&0];
        assert_eq!(extruder.len(), 1);
        assert_eq!(extruder["line_width"].value, Value::Float(0.8));
        assert_eq!(
            resolution.get_in("machine_width", Context::Extruder(0)).map(|s| &s.value),
            Some(&Value::Float(220.0))
        );
    }

    #[test]
    fn test_batch_keeps_input_order() {
        let fixture = Fixture::new(vec![
            doc("base", Category::Definition).typed("layer_height", SettingType::Float, 0.2),
            doc("draft", Category::Quality).lit("layer_height", 0.3),
        ]);
        let specs = vec![
            StackSpec::new().layer(Category::Definition, "base"),
            StackSpec::new()
                .layer(Category::Definition, "base")
                .layer(Category::Quality, "draft"),
            StackSpec::new().layer(Category::Quality, "draft"),
        ];
        let results = resolve_batch(&fixture.graph, &specs, &ResolveOptions::default());
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].as_ref().unwrap().value("layer_height"), Some(&Value::Float(0.2)));
        assert_eq!(results[1].as_ref().unwrap().value("layer_height"), Some(&Value::Float(0.3)));
        assert_eq!(results[2].as_ref().unwrap_err(), &ResolveError::NoBaseLayer);
    }
}
