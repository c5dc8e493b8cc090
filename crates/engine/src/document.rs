//! Document model: one configuration file's content, already parsed.
//!
//! A `Document` carries an ordered map of setting key to `Override`. Formulas
//! are parsed once here, when the override is constructed, so resolution
//! never re-parses text.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize, Serializer};

use crate::formula::parser::{self, Expr};
use crate::value::{SettingType, Value};

// =============================================================================
// Category / Context
// =============================================================================

/// Stack layer kind, ordered least to most specific.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Definition,
    DefinitionChanges,
    Variant,
    Material,
    Quality,
    Intent,
    QualityChanges,
    User,
}

impl Category {
    pub const ALL: [Category; 8] = [
        Category::Definition,
        Category::DefinitionChanges,
        Category::Variant,
        Category::Material,
        Category::Quality,
        Category::Intent,
        Category::QualityChanges,
        Category::User,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Definition => "definition",
            Category::DefinitionChanges => "definition_changes",
            Category::Variant => "variant",
            Category::Material => "material",
            Category::Quality => "quality",
            Category::QualityChanges => "quality_changes",
            Category::Intent => "intent",
            Category::User => "user",
        }
    }

    /// Map the `type` metadata of an instance container onto a layer kind.
    pub fn from_container_type(name: &str) -> Option<Category> {
        match name.trim() {
            "definition" | "machine" | "extruder" => Some(Category::Definition),
            "definition_changes" => Some(Category::DefinitionChanges),
            "variant" => Some(Category::Variant),
            "material" => Some(Category::Material),
            "quality" => Some(Category::Quality),
            "quality_changes" => Some(Category::QualityChanges),
            "intent" => Some(Category::Intent),
            "user" => Some(Category::User),
            _ => None,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a setting is resolved: the shared stack or one extruder's sub-stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Context {
    #[default]
    Global,
    Extruder(u32),
}

impl fmt::Display for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Context::Global => f.write_str("global"),
            Context::Extruder(position) => write!(f, "extruder {}", position),
        }
    }
}

// =============================================================================
// RawValue
// =============================================================================

/// A formula with its parse tree. The tree is shared between clones.
#[derive(Debug, Clone)]
pub struct Formula {
    pub source: String,
    pub expr: Arc<Expr>,
}

/// The value an override sets, before evaluation.
#[derive(Debug, Clone)]
pub enum RawValue {
    Literal(Value),
    Expression(Formula),
    /// A formula that did not parse. Reported only if it wins.
    Invalid { source: String, message: String },
}

impl RawValue {
    pub fn literal(value: impl Into<Value>) -> Self {
        RawValue::Literal(value.into())
    }

    /// Parse `source` (without a leading `=`) as a formula.
    pub fn expression(source: &str) -> Self {
        let source = source.trim();
        match parser::parse(source) {
            Ok(expr) => RawValue::Expression(Formula {
                source: source.to_string(),
                expr: Arc::new(expr),
            }),
            Err(message) => RawValue::Invalid {
                source: source.to_string(),
                message,
            },
        }
    }

    /// Container-file convention: `=` prefix marks a formula, anything else
    /// is literal text left for type coercion.
    pub fn from_text(text: &str) -> Self {
        match text.trim_start().strip_prefix('=') {
            Some(formula) => RawValue::expression(formula),
            None => RawValue::Literal(Value::Text(text.trim().to_string())),
        }
    }

    /// Text as it would be written in a container file.
    pub fn source_text(&self) -> String {
        match self {
            RawValue::Literal(value) => value.to_text(),
            RawValue::Expression(formula) => format!("={}", formula.source),
            RawValue::Invalid { source, .. } => format!("={}", source),
        }
    }

    pub fn as_literal(&self) -> Option<&Value> {
        match self {
            RawValue::Literal(value) => Some(value),
            _ => None,
        }
    }

    pub fn is_expression(&self) -> bool {
        !matches!(self, RawValue::Literal(_))
    }
}

impl PartialEq for RawValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (RawValue::Literal(a), RawValue::Literal(b)) => a == b,
            (RawValue::Expression(a), RawValue::Expression(b)) => a.source == b.source,
            (RawValue::Invalid { source: a, .. }, RawValue::Invalid { source: b, .. }) => a == b,
            _ => false,
        }
    }
}

impl Serialize for RawValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            RawValue::Literal(value) => value.serialize(serializer),
            _ => serializer.serialize_str(&self.source_text()),
        }
    }
}

impl From<Value> for RawValue {
    fn from(value: Value) -> Self {
        RawValue::Literal(value)
    }
}

// =============================================================================
// Override
// =============================================================================

/// Schema properties. Only the base layer's copy is authoritative.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SchemaProps {
    pub setting_type: Option<SettingType>,
    pub options: Option<Vec<String>>,
    pub unit: Option<String>,
    pub settable_per_extruder: Option<bool>,
    pub label: Option<String>,
}

impl SchemaProps {
    /// Fill every property this one lacks from `farther`.
    pub fn inherit(&mut self, farther: &SchemaProps) {
        if self.setting_type.is_none() {
            self.setting_type = farther.setting_type;
        }
        if self.options.is_none() {
            self.options = farther.options.clone();
        }
        if self.unit.is_none() {
            self.unit = farther.unit.clone();
        }
        if self.settable_per_extruder.is_none() {
            self.settable_per_extruder = farther.settable_per_extruder;
        }
        if self.label.is_none() {
            self.label = farther.label.clone();
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == SchemaProps::default()
    }
}

/// What one document says about one setting.
///
/// An override without `value` changes properties only and does not make its
/// document define the key.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Override {
    pub value: Option<RawValue>,
    /// Literal default declared next to a `value` formula.
    pub fallback: Option<Value>,
    pub minimum: Option<RawValue>,
    pub maximum: Option<RawValue>,
    pub enabled: Option<RawValue>,
    pub schema: SchemaProps,
}

impl Override {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value(raw: RawValue) -> Self {
        Self {
            value: Some(raw),
            ..Self::default()
        }
    }

    pub fn literal(value: impl Into<Value>) -> Self {
        Self::with_value(RawValue::literal(value))
    }

    pub fn formula(source: &str) -> Self {
        Self::with_value(RawValue::expression(source))
    }

    pub fn typed(mut self, setting_type: SettingType) -> Self {
        self.schema.setting_type = Some(setting_type);
        self
    }

    pub fn fallback(mut self, value: impl Into<Value>) -> Self {
        self.fallback = Some(value.into());
        self
    }

    pub fn minimum(mut self, raw: RawValue) -> Self {
        self.minimum = Some(raw);
        self
    }

    pub fn maximum(mut self, raw: RawValue) -> Self {
        self.maximum = Some(raw);
        self
    }

    pub fn enabled(mut self, raw: RawValue) -> Self {
        self.enabled = Some(raw);
        self
    }

    pub fn options<I, S>(mut self, options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.schema.options = Some(options.into_iter().map(Into::into).collect());
        self
    }

    pub fn unit(mut self, unit: &str) -> Self {
        self.schema.unit = Some(unit.to_string());
        self
    }

    pub fn label(mut self, label: &str) -> Self {
        self.schema.label = Some(label.to_string());
        self
    }

    pub fn per_extruder(mut self, settable: bool) -> Self {
        self.schema.settable_per_extruder = Some(settable);
        self
    }

    pub fn defines_value(&self) -> bool {
        self.value.is_some()
    }
}

// =============================================================================
// OverrideMap
// =============================================================================

/// Insertion-ordered map of setting key to override.
#[derive(Debug, Clone, Default)]
pub struct OverrideMap {
    entries: Vec<(String, Override)>,
    index: FxHashMap<String, usize>,
}

impl OverrideMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace. A replaced key keeps its original position.
    pub fn insert(&mut self, key: impl Into<String>, ov: Override) {
        let key = key.into();
        match self.index.get(&key) {
            Some(&i) => self.entries[i].1 = ov,
            None => {
                self.index.insert(key.clone(), self.entries.len());
                self.entries.push((key, ov));
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&Override> {
        self.index.get(key).map(|&i| &self.entries[i].1)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut Override> {
        match self.index.get(key) {
            Some(&i) => Some(&mut self.entries[i].1),
            None => None,
        }
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Override)> + '_ {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> + '_ {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl PartialEq for OverrideMap {
    fn eq(&self, other: &Self) -> bool {
        self.entries == other.entries
    }
}

impl Serialize for OverrideMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(self.iter())
    }
}

impl<K: Into<String>> FromIterator<(K, Override)> for OverrideMap {
    fn from_iter<T: IntoIterator<Item = (K, Override)>>(iter: T) -> Self {
        let mut map = OverrideMap::new();
        for (key, ov) in iter {
            map.insert(key, ov);
        }
        map
    }
}

// =============================================================================
// Document
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Document {
    pub id: String,
    pub category: Category,
    pub parent: Option<String>,
    pub name: Option<String>,
    pub metadata: BTreeMap<String, String>,
    pub overrides: OverrideMap,
}

impl Document {
    pub fn new(id: impl Into<String>, category: Category) -> Self {
        Self {
            id: id.into(),
            category,
            parent: None,
            name: None,
            metadata: BTreeMap::new(),
            overrides: OverrideMap::new(),
        }
    }

    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_override(mut self, key: impl Into<String>, ov: Override) -> Self {
        self.overrides.insert(key, ov);
        self
    }

    pub fn get(&self, key: &str) -> Option<&Override> {
        self.overrides.get(key)
    }

    /// Display name, falling back to the id.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}
