// Definition files (.def.json)
//
// A definition declares settings under a `settings` tree (categories nest
// their settings in `children`) and changes inherited ones under `overrides`.
// Both end up as overrides of a single Definition document.

use serde_json::{Map, Value as Json};

use profilestack_engine::{Category, Document, Override, RawValue, SettingType, Value};

use crate::error::FormatError;

/// Node type marking a settings group rather than a setting.
const CATEGORY_NODE: &str = "category";

pub fn parse_definition(id: &str, text: &str) -> Result<Document, FormatError> {
    let json: Json = serde_json::from_str(text)?;
    let root = json
        .as_object()
        .ok_or_else(|| FormatError::invalid("<root>", "expected an object"))?;

    let mut document = Document::new(id, Category::Definition);
    if let Some(name) = optional_str(root, "name")? {
        document.name = Some(name.to_string());
    }
    if let Some(parent) = optional_str(root, "inherits")? {
        document.parent = Some(parent.to_string());
    }
    if let Some(metadata) = root.get("metadata") {
        let metadata = metadata
            .as_object()
            .ok_or_else(|| FormatError::invalid("metadata", "expected an object"))?;
        for (key, value) in metadata {
            document.metadata.insert(key.clone(), metadata_text(value));
        }
    }

    let mut properties: Vec<(String, Map<String, Json>)> = Vec::new();
    if let Some(settings) = root.get("settings") {
        let settings = settings
            .as_object()
            .ok_or_else(|| FormatError::invalid("settings", "expected an object"))?;
        for (key, node) in settings {
            collect_settings(key, node, &mut properties)?;
        }
    }
    if let Some(overrides) = root.get("overrides") {
        let overrides = overrides
            .as_object()
            .ok_or_else(|| FormatError::invalid("overrides", "expected an object"))?;
        for (key, node) in overrides {
            let node = node
                .as_object()
                .ok_or_else(|| FormatError::invalid(&format!("overrides.{}", key), "expected an object"))?;
            // Later properties replace earlier ones for the same key
            match properties.iter_mut().find(|(k, _)| k == key) {
                Some((_, existing)) => existing.extend(node.iter().map(|(k, v)| (k.clone(), v.clone()))),
                None => properties.push((key.clone(), node.clone())),
            }
        }
    }

    for (key, props) in &properties {
        document.overrides.insert(key.as_str(), setting_override(key, props)?);
    }

    log::debug!(
        "parsed definition '{}': {} setting(s), inherits {:?}",
        id,
        document.overrides.len(),
        document.parent
    );
    Ok(document)
}

/// Walk a settings node, keeping every node that is a setting. Groups are
/// descended into but not kept.
fn collect_settings(
    key: &str,
    node: &Json,
    out: &mut Vec<(String, Map<String, Json>)>,
) -> Result<(), FormatError> {
    let node = node
        .as_object()
        .ok_or_else(|| FormatError::invalid(&format!("settings.{}", key), "expected an object"))?;

    if let Some(children) = node.get("children") {
        let children = children
            .as_object()
            .ok_or_else(|| FormatError::invalid(&format!("{}.children", key), "expected an object"))?;
        for (child_key, child) in children {
            collect_settings(child_key, child, out)?;
        }
    }

    match node.get("type").and_then(Json::as_str) {
        Some(CATEGORY_NODE) | None => {}
        Some(_) => {
            let mut props = node.clone();
            props.remove("children");
            out.push((key.to_string(), props));
        }
    }
    Ok(())
}

fn setting_override(key: &str, props: &Map<String, Json>) -> Result<Override, FormatError> {
    let mut ov = Override::new();

    let default_value = props.get("default_value").map(Value::from_json);
    match props.get("value") {
        Some(value) => {
            ov.value = Some(property_value(value));
            ov.fallback = default_value;
        }
        None => ov.value = default_value.map(RawValue::Literal),
    }

    ov.minimum = props.get("minimum_value").map(property_value);
    ov.maximum = props.get("maximum_value").map(property_value);
    ov.enabled = props.get("enabled").map(property_value);

    if let Some(name) = optional_str(props, "type")? {
        ov.schema.setting_type = Some(SettingType::from_name(name));
    }
    if let Some(unit) = optional_str(props, "unit")? {
        ov.schema.unit = Some(unit.to_string());
    }
    if let Some(label) = optional_str(props, "label")? {
        ov.schema.label = Some(label.to_string());
    }
    if let Some(per_extruder) = props.get("settable_per_extruder") {
        let per_extruder = per_extruder
            .as_bool()
            .ok_or_else(|| FormatError::invalid(&format!("{}.settable_per_extruder", key), "expected a boolean"))?;
        ov.schema.settable_per_extruder = Some(per_extruder);
    }
    if let Some(options) = props.get("options") {
        let options = options
            .as_object()
            .ok_or_else(|| FormatError::invalid(&format!("{}.options", key), "expected an object"))?;
        ov.schema.options = Some(options.keys().cloned().collect());
    }

    Ok(ov)
}

/// Strings in property slots are formulas; anything else is a literal.
fn property_value(json: &Json) -> RawValue {
    match json {
        Json::String(source) => RawValue::expression(source),
        other => RawValue::Literal(Value::from_json(other)),
    }
}

fn optional_str<'a>(object: &'a Map<String, Json>, field: &str) -> Result<Option<&'a str>, FormatError> {
    match object.get(field) {
        None | Some(Json::Null) => Ok(None),
        Some(Json::String(s)) => Ok(Some(s.as_str())),
        Some(_) => Err(FormatError::invalid(field, "expected a string")),
    }
}

fn metadata_text(value: &Json) -> String {
    match value {
        Json::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PRINTER: &str = r#"{
        "name": "FFF Printer",
        "version": 2,
        "metadata": { "type": "machine", "visible": false },
        "settings": {
            "resolution": {
                "label": "Quality",
                "type": "category",
                "children": {
                    "layer_height": {
                        "label": "Layer Height",
                        "unit": "mm",
                        "type": "float",
                        "default_value": 0.1,
                        "minimum_value": "0.001",
                        "maximum_value": "machine_nozzle_size",
                        "settable_per_extruder": false,
                        "children": {
                            "layer_height_0": {
                                "type": "float",
                                "default_value": 0.3,
                                "value": "layer_height * 1.5"
                            }
                        }
                    }
                }
            },
            "infill": {
                "type": "category",
                "children": {
                    "infill_pattern": {
                        "type": "enum",
                        "options": { "grid": "Grid", "lines": "Lines" },
                        "default_value": "grid",
                        "enabled": "infill_sparse_density > 0"
                    }
                }
            }
        },
        "overrides": {
            "layer_height": { "default_value": 0.2 }
        }
    }"#;

    #[test]
    fn test_settings_tree_flattened() {
        let doc = parse_definition("fdmprinter", PRINTER).unwrap();
        assert_eq!(doc.category, Category::Definition);
        assert_eq!(doc.name.as_deref(), Some("FFF Printer"));
        assert_eq!(doc.parent, None);
        assert_eq!(doc.metadata.get("type").map(String::as_str), Some("machine"));
        assert_eq!(doc.metadata.get("visible").map(String::as_str), Some("false"));

        let keys: Vec<&str> = doc.overrides.keys().collect();
        assert_eq!(keys.len(), 3);
        assert!(!doc.overrides.contains_key("resolution"));
        assert!(!doc.overrides.contains_key("infill"));
    }

    #[test]
    fn test_value_formula_keeps_default_as_fallback() {
        let doc = parse_definition("fdmprinter", PRINTER).unwrap();
        let ov = doc.get("layer_height_0").unwrap();
        assert_eq!(ov.value, Some(RawValue::expression("layer_height * 1.5")));
        assert_eq!(ov.fallback, Some(Value::Float(0.3)));
    }

    #[test]
    fn test_overrides_section_replaces_default() {
        let doc = parse_definition("fdmprinter", PRINTER).unwrap();
        let ov = doc.get("layer_height").unwrap();
        assert_eq!(ov.value, Some(RawValue::literal(0.2)));
        // Properties from the settings tree survive
        assert_eq!(ov.schema.unit.as_deref(), Some("mm"));
        assert_eq!(ov.schema.setting_type, Some(SettingType::Float));
        assert_eq!(ov.schema.settable_per_extruder, Some(false));
        assert_eq!(ov.maximum, Some(RawValue::expression("machine_nozzle_size")));
    }

    #[test]
    fn test_enum_options_and_enabled() {
        let doc = parse_definition("fdmprinter", PRINTER).unwrap();
        let ov = doc.get("infill_pattern").unwrap();
        assert_eq!(ov.schema.setting_type, Some(SettingType::Enum));
        let mut options = ov.schema.options.clone().unwrap();
        options.sort();
        assert_eq!(options, vec!["grid", "lines"]);
        assert_eq!(ov.enabled, Some(RawValue::expression("infill_sparse_density > 0")));
    }

    #[test]
    fn test_child_definition() {
        let text = r#"{
            "name": "Creality Ender-3 Pro",
            "inherits": "creality_base",
            "overrides": {
                "machine_width": { "default_value": 220 },
                "speed_print": { "value": "50" },
                "support_enable": { "enabled": false }
            }
        }"#;
        let doc = parse_definition("creality_ender3pro", text).unwrap();
        assert_eq!(doc.parent.as_deref(), Some("creality_base"));
        assert_eq!(doc.get("machine_width").unwrap().value, Some(RawValue::literal(220i64)));
        assert_eq!(doc.get("speed_print").unwrap().value, Some(RawValue::expression("50")));
        let support = doc.get("support_enable").unwrap();
        assert!(!support.defines_value());
        assert_eq!(support.enabled, Some(RawValue::literal(false)));
    }

    #[test]
    fn test_bad_formula_is_kept_as_invalid() {
        let text = r#"{ "overrides": { "speed_wall": { "value": "speed_print *" } } }"#;
        let doc = parse_definition("broken", text).unwrap();
        assert!(matches!(doc.get("speed_wall").unwrap().value, Some(RawValue::Invalid { .. })));
    }

    #[test]
    fn test_malformed_documents() {
        assert!(matches!(parse_definition("x", "{ not json"), Err(FormatError::Json(_))));
        assert!(matches!(parse_definition("x", "[1, 2]"), Err(FormatError::InvalidField { .. })));
        assert!(matches!(
            parse_definition("x", r#"{ "inherits": 3 }"#),
            Err(FormatError::InvalidField { field, .. }) if field == "inherits"
        ));
        assert!(matches!(
            parse_definition("x", r#"{ "overrides": { "a": { "settable_per_extruder": "yes" } } }"#),
            Err(FormatError::InvalidField { .. })
        ));
    }
}
