//! Concrete setting values and declared setting types.
//!
//! `Value` is the scalar (or list) primitive every formula evaluates to and
//! every literal override carries. `SettingType` is the declared type taken
//! from the base layer's schema; `coerce` converts a computed value into it.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::formula::parser;

// =============================================================================
// Value
// =============================================================================

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(untagged)]
pub enum Value {
    #[default]
    Empty,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    List(Vec<Value>),
}

impl Value {
    /// Numeric view. Booleans count as 0/1, numeric text is parsed.
    pub fn to_number(&self) -> Result<f64, String> {
        match self {
            Value::Int(i) => Ok(*i as f64),
            Value::Float(f) => Ok(*f),
            Value::Bool(b) => Ok(if *b { 1.0 } else { 0.0 }),
            Value::Text(s) => s
                .trim()
                .parse::<f64>()
                .map_err(|_| format!("cannot convert '{}' to a number", s)),
            Value::Empty => Err("cannot convert None to a number".to_string()),
            Value::List(_) => Err("cannot convert a list to a number".to_string()),
        }
    }

    /// Text view, using the same spelling the profile formulas use
    /// (`True`, `0.8`, `40.0`, `[1, 2]`).
    pub fn to_text(&self) -> String {
        match self {
            Value::Empty => "None".to_string(),
            Value::Bool(b) => if *b { "True".to_string() } else { "False".to_string() },
            Value::Int(i) => i.to_string(),
            Value::Float(f) => format_float(*f),
            Value::Text(s) => s.clone(),
            Value::List(items) => {
                let inner: Vec<String> = items.iter().map(|v| v.to_repr()).collect();
                format!("[{}]", inner.join(", "))
            }
        }
    }

    /// Like `to_text`, but quotes strings. Used inside list rendering.
    fn to_repr(&self) -> String {
        match self {
            Value::Text(s) => format!("'{}'", s),
            other => other.to_text(),
        }
    }

    /// Truthiness as used by `if`/`and`/`or`/`not`.
    pub fn truthy(&self) -> bool {
        match self {
            Value::Empty => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Text(s) => !s.is_empty(),
            Value::List(items) => !items.is_empty(),
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Value::Int(_) | Value::Float(_))
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Value::Empty)
    }

    /// Short type name for error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Empty => "none",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Text(_) => "str",
            Value::List(_) => "list",
        }
    }

    /// Convert a JSON value (definition files carry typed defaults).
    pub fn from_json(json: &serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::Empty,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Value::Text(s.clone()),
            serde_json::Value::Array(items) => Value::List(items.iter().map(Value::from_json).collect()),
            // Objects never appear as setting values; keep their text so nothing is lost.
            serde_json::Value::Object(_) => Value::Text(json.to_string()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_text())
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

fn format_float(f: f64) -> String {
    if f.is_finite() && f.fract() == 0.0 && f.abs() < 1e16 {
        format!("{:.1}", f)
    } else {
        format!("{}", f)
    }
}

// =============================================================================
// SettingType
// =============================================================================

/// Declared type of a setting, as named in definition files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SettingType {
    #[serde(rename = "float")]
    Float,
    #[serde(rename = "int")]
    Int,
    #[serde(rename = "bool")]
    Bool,
    #[serde(rename = "str")]
    Str,
    #[serde(rename = "enum")]
    Enum,
    #[serde(rename = "extruder")]
    Extruder,
    #[serde(rename = "optional_extruder")]
    OptionalExtruder,
    #[serde(rename = "polygon")]
    Polygon,
    #[serde(rename = "polygons")]
    Polygons,
    #[serde(rename = "[int]")]
    IntList,
    /// A type name the engine does not know; values pass through unchanged.
    #[default]
    #[serde(rename = "unknown")]
    Unknown,
}

impl SettingType {
    pub fn from_name(name: &str) -> SettingType {
        match name {
            "float" => SettingType::Float,
            "int" => SettingType::Int,
            "bool" => SettingType::Bool,
            "str" => SettingType::Str,
            "enum" => SettingType::Enum,
            "extruder" => SettingType::Extruder,
            "optional_extruder" => SettingType::OptionalExtruder,
            "polygon" => SettingType::Polygon,
            "polygons" => SettingType::Polygons,
            "[int]" => SettingType::IntList,
            _ => SettingType::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SettingType::Float => "float",
            SettingType::Int => "int",
            SettingType::Bool => "bool",
            SettingType::Str => "str",
            SettingType::Enum => "enum",
            SettingType::Extruder => "extruder",
            SettingType::OptionalExtruder => "optional_extruder",
            SettingType::Polygon => "polygon",
            SettingType::Polygons => "polygons",
            SettingType::IntList => "[int]",
            SettingType::Unknown => "unknown",
        }
    }

    /// Value reported when no layer provides one.
    pub fn zero_value(&self) -> Value {
        match self {
            SettingType::Float => Value::Float(0.0),
            SettingType::Int | SettingType::Extruder => Value::Int(0),
            SettingType::OptionalExtruder => Value::Int(-1),
            SettingType::Bool => Value::Bool(false),
            SettingType::Str | SettingType::Enum => Value::Text(String::new()),
            SettingType::Polygon | SettingType::Polygons | SettingType::IntList => Value::List(Vec::new()),
            SettingType::Unknown => Value::Empty,
        }
    }

    /// Convert `value` into this type.
    ///
    /// `options` restricts `enum` values when non-empty. On failure the
    /// error describes what was found, e.g. `"str 'adaptive'"`.
    pub fn coerce(&self, value: &Value, options: &[String]) -> Result<Value, String> {
        let mismatch = || match value {
            Value::Text(s) => format!("str '{}'", s),
            other => format!("{} {}", other.type_name(), other.to_text()),
        };
        match self {
            SettingType::Unknown => Ok(value.clone()),
            SettingType::Float => match value {
                Value::Float(_) => Ok(value.clone()),
                Value::Int(i) => Ok(Value::Float(*i as f64)),
                Value::Bool(b) => Ok(Value::Float(if *b { 1.0 } else { 0.0 })),
                Value::Text(s) => s.trim().parse::<f64>().map(Value::Float).map_err(|_| mismatch()),
                _ => Err(mismatch()),
            },
            SettingType::Int | SettingType::Extruder | SettingType::OptionalExtruder => {
                let as_int = |f: f64| -> Result<Value, String> {
                    if f.is_finite() {
                        Ok(Value::Int(f.round() as i64))
                    } else {
                        Err(mismatch())
                    }
                };
                match value {
                    Value::Int(_) => Ok(value.clone()),
                    Value::Float(f) => as_int(*f),
                    Value::Bool(b) => Ok(Value::Int(*b as i64)),
                    Value::Text(s) => {
                        let s = s.trim();
                        if let Ok(i) = s.parse::<i64>() {
                            Ok(Value::Int(i))
                        } else {
                            s.parse::<f64>().map_err(|_| mismatch()).and_then(as_int)
                        }
                    }
                    _ => Err(mismatch()),
                }
            }
            SettingType::Bool => match value {
                Value::Bool(_) => Ok(value.clone()),
                Value::Int(_) | Value::Float(_) => Ok(Value::Bool(value.truthy())),
                Value::Text(s) => match s.trim() {
                    "True" | "true" | "1" => Ok(Value::Bool(true)),
                    "False" | "false" | "0" => Ok(Value::Bool(false)),
                    _ => Err(mismatch()),
                },
                _ => Err(mismatch()),
            },
            SettingType::Str => match value {
                Value::Empty => Ok(Value::Text(String::new())),
                other => Ok(Value::Text(other.to_text())),
            },
            SettingType::Enum => {
                let text = match value {
                    Value::Text(s) => s.clone(),
                    Value::List(_) | Value::Empty => return Err(mismatch()),
                    other => other.to_text(),
                };
                if options.is_empty() || options.iter().any(|o| *o == text) {
                    Ok(Value::Text(text))
                } else {
                    Err(format!("'{}' (allowed: {})", text, options.join(", ")))
                }
            }
            SettingType::Polygon | SettingType::Polygons | SettingType::IntList => match value {
                Value::List(_) => Ok(value.clone()),
                Value::Text(s) if s.trim().starts_with('[') => parser::parse(s)
                    .ok()
                    .and_then(|expr| expr.as_literal())
                    .filter(|v| matches!(v, Value::List(_)))
                    .ok_or_else(mismatch),
                _ => Err(mismatch()),
            },
        }
    }
}

impl fmt::Display for SettingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_spelling() {
        assert_eq!(Value::Float(40.0).to_text(), "40.0");
        assert_eq!(Value::Float(0.15).to_text(), "0.15");
        assert_eq!(Value::Bool(true).to_text(), "True");
        assert_eq!(
            Value::List(vec![Value::Int(1), Value::Text("a".into())]).to_text(),
            "[1, 'a']"
        );
    }

    #[test]
    fn test_coerce_float_from_text() {
        let v = SettingType::Float.coerce(&Value::Text("0.15".into()), &[]).unwrap();
        assert_eq!(v, Value::Float(0.15));
    }

    #[test]
    fn test_coerce_float_rejects_word() {
        let err = SettingType::Float.coerce(&Value::Text("adaptive".into()), &[]).unwrap_err();
        assert_eq!(err, "str 'adaptive'");
    }

    #[test]
    fn test_coerce_int_rounds_integral_floats() {
        assert_eq!(SettingType::Int.coerce(&Value::Float(3.0), &[]).unwrap(), Value::Int(3));
        assert_eq!(SettingType::Int.coerce(&Value::Text("4".into()), &[]).unwrap(), Value::Int(4));
    }

    #[test]
    fn test_coerce_bool_spellings() {
        assert_eq!(SettingType::Bool.coerce(&Value::Text("True".into()), &[]).unwrap(), Value::Bool(true));
        assert_eq!(SettingType::Bool.coerce(&Value::Text("false".into()), &[]).unwrap(), Value::Bool(false));
        assert!(SettingType::Bool.coerce(&Value::Text("maybe".into()), &[]).is_err());
    }

    #[test]
    fn test_coerce_enum_checks_options() {
        let options = vec!["grid".to_string(), "lines".to_string()];
        assert!(SettingType::Enum.coerce(&Value::Text("grid".into()), &options).is_ok());
        assert!(SettingType::Enum.coerce(&Value::Text("gyroid".into()), &options).is_err());
        // No declared options: anything textual goes
        assert!(SettingType::Enum.coerce(&Value::Text("gyroid".into()), &[]).is_ok());
    }

    #[test]
    fn test_coerce_polygon_from_text() {
        let v = SettingType::Polygon
            .coerce(&Value::Text("[[-26, 34], [-26, -32]]".into()), &[])
            .unwrap();
        match v {
            Value::List(points) => assert_eq!(points.len(), 2),
            other => panic!("Expected list, got {:?}", other),
        }
    }

    #[test]
    fn test_from_json() {
        let json: serde_json::Value = serde_json::json!({"a": [1, 2.5, true, "x", null]});
        let v = Value::from_json(&json["a"]);
        assert_eq!(
            v,
            Value::List(vec![
                Value::Int(1),
                Value::Float(2.5),
                Value::Bool(true),
                Value::Text("x".into()),
                Value::Empty,
            ])
        );
    }

    #[test]
    fn test_setting_type_names_round_trip() {
        for name in ["float", "int", "bool", "str", "enum", "extruder", "optional_extruder", "polygon", "polygons", "[int]"] {
            assert_eq!(SettingType::from_name(name).as_str(), name);
        }
        assert_eq!(SettingType::from_name("category"), SettingType::Unknown);
    }
}
