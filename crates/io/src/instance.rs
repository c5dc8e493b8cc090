// Instance containers (.inst.cfg)
//
// [general]   name, definition (the machine the container was made for)
// [metadata]  type picks the layer; everything else is kept as metadata
// [values]    key = literal, or key = =formula

use profilestack_engine::{Category, Document, Override, RawValue};

use crate::error::FormatError;
use crate::ini::IniFile;

pub fn parse_instance(id: &str, text: &str) -> Result<Document, FormatError> {
    let ini = IniFile::parse(text)?;

    let container_type = ini.require("metadata", "type")?;
    let category = Category::from_container_type(container_type).ok_or_else(|| FormatError::UnknownContainerType {
        name: container_type.to_string(),
    })?;

    let mut document = Document::new(id, category);
    document.name = ini.get("general", "name").filter(|n| !n.is_empty()).map(str::to_string);
    if let Some(definition) = ini.get("general", "definition") {
        document.metadata.insert("definition".to_string(), definition.to_string());
    }
    if let Some(metadata) = ini.section("metadata") {
        for (key, value) in metadata.iter() {
            document.metadata.insert(key.to_string(), value.to_string());
        }
    }
    if let Some(values) = ini.section("values") {
        for (key, text) in values.iter() {
            document.overrides.insert(key, Override::with_value(RawValue::from_text(text)));
        }
    }

    log::debug!(
        "parsed {} container '{}': {} value(s)",
        category,
        id,
        document.overrides.len()
    );
    Ok(document)
}
