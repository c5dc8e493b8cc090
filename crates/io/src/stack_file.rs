// Container stack files (.global.cfg, .extruder.cfg)
//
// [containers] lists layer documents by slot, most specific first:
//   0 user, 1 quality_changes, 2 intent, 3 quality, 4 material, 5 variant,
//   6 definition_changes, 7 definition
// Ids starting with "empty" mark an unused slot.

use std::collections::BTreeMap;

use profilestack_engine::{Category, StackSpec};

use crate::error::FormatError;
use crate::ini::IniFile;

const SLOTS: [Category; 8] = [
    Category::User,
    Category::QualityChanges,
    Category::Intent,
    Category::Quality,
    Category::Material,
    Category::Variant,
    Category::DefinitionChanges,
    Category::Definition,
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StackKind {
    Global,
    Extruder {
        position: u32,
        /// Global stack the extruder belongs to.
        machine: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackFile {
    pub id: String,
    pub name: Option<String>,
    pub kind: StackKind,
    /// Populated slots only.
    pub layers: BTreeMap<Category, String>,
}

impl StackFile {
    pub fn position(&self) -> Option<u32> {
        match self.kind {
            StackKind::Global => None,
            StackKind::Extruder { position, .. } => Some(position),
        }
    }

    pub fn definition(&self) -> Option<&str> {
        self.layers.get(&Category::Definition).map(String::as_str)
    }

    /// Whether this extruder stack names `global` as its machine. Stacks
    /// without a machine entry belong to any machine.
    fn belongs_to(&self, global: &StackFile) -> bool {
        match &self.kind {
            StackKind::Extruder { machine: Some(machine), .. } => {
                *machine == global.id || global.name.as_deref() == Some(machine.as_str())
            }
            _ => true,
        }
    }
}

pub fn parse_stack(id: &str, text: &str) -> Result<StackFile, FormatError> {
    let ini = IniFile::parse(text)?;

    let kind = match ini.require("metadata", "type")? {
        "machine" => StackKind::Global,
        "extruder_train" => {
            let raw = ini.require("metadata", "position")?;
            let position = raw
                .parse::<u32>()
                .map_err(|_| FormatError::InvalidPosition { value: raw.to_string() })?;
            StackKind::Extruder {
                position,
                machine: ini.get("metadata", "machine").map(str::to_string),
            }
        }
        other => {
            return Err(FormatError::UnknownContainerType {
                name: other.to_string(),
            })
        }
    };

    let mut layers = BTreeMap::new();
    if let Some(containers) = ini.section("containers") {
        for (slot, container) in containers.iter() {
            let category = slot
                .parse::<usize>()
                .ok()
                .and_then(|index| SLOTS.get(index))
                .ok_or_else(|| FormatError::invalid(&format!("containers.{}", slot), "unknown slot"))?;
            if container.is_empty() || container.starts_with("empty") {
                continue;
            }
            layers.insert(*category, container.to_string());
        }
    }

    if kind == StackKind::Global && !layers.contains_key(&Category::Definition) {
        return Err(FormatError::missing("containers.7"));
    }

    Ok(StackFile {
        id: ini.get("general", "id").unwrap_or(id).to_string(),
        name: ini.get("general", "name").map(str::to_string),
        kind,
        layers,
    })
}

/// Combine a global stack and its extruder stacks into one `StackSpec`.
///
/// Extruder stacks that name another machine are skipped. Every populated
/// slot of an extruder stack becomes one of its inner layers.
pub fn assemble_stack(global: &StackFile, extruders: &[StackFile]) -> Result<StackSpec, FormatError> {
    if global.kind != StackKind::Global {
        return Err(FormatError::invalid("metadata.type", "expected a machine stack"));
    }

    let mut spec = StackSpec {
        layers: global.layers.clone(),
        extruders: BTreeMap::new(),
    };
    for extruder in extruders {
        let Some(position) = extruder.position() else {
            return Err(FormatError::invalid("metadata.type", "expected an extruder stack"));
        };
        if !extruder.belongs_to(global) {
            log::debug!("skipping extruder stack '{}': belongs to another machine", extruder.id);
            continue;
        }
        if spec.extruders.insert(position, extruder.layers.clone()).is_some() {
            return Err(FormatError::InvalidPosition {
                value: format!("{} (used twice)", position),
            });
        }
    }
    Ok(spec)
}
