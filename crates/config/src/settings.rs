// Resolver settings
// Loaded from ~/.config/profilestack/settings.toml

use std::fs;
use std::path::{Path, PathBuf};

use profilestack_engine::{detect_manufacturer, ResolveOptions, KNOWN_MANUFACTURERS};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Settings shown in the key-settings section of a summary, by default.
pub const IMPORTANT_SETTINGS: [&str; 38] = [
    // Quality
    "layer_height",
    "layer_height_0",
    // Walls
    "wall_thickness",
    "wall_line_count",
    "top_layers",
    "bottom_layers",
    "top_bottom_thickness",
    // Infill
    "infill_sparse_density",
    "infill_pattern",
    // Speed
    "speed_print",
    "speed_infill",
    "speed_wall",
    "speed_wall_0",
    "speed_wall_x",
    "speed_topbottom",
    "speed_travel",
    "speed_layer_0",
    // Travel
    "retraction_enable",
    "retraction_amount",
    "retraction_speed",
    "retraction_hop_enabled",
    "retraction_hop",
    // Material
    "material_print_temperature",
    "material_bed_temperature",
    // Cooling
    "cool_fan_speed",
    "cool_fan_speed_min",
    "cool_fan_speed_max",
    // Support
    "support_enable",
    "support_type",
    "support_structure",
    // Adhesion
    "adhesion_type",
    "skirt_line_count",
    "brim_width",
    // Machine
    "machine_width",
    "machine_depth",
    "machine_height",
    "machine_heated_bed",
    "machine_nozzle_size",
];

/// How the printer manufacturer is named in summaries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManufacturerSettings {
    /// Use this name instead of detecting one.
    #[serde(rename = "override", skip_serializing_if = "Option::is_none")]
    pub override_name: Option<String>,

    /// Extra id prefixes recognized alongside the built-in list.
    pub additional: Vec<String>,
}

impl ManufacturerSettings {
    /// Manufacturer for a base inheritance chain (child first).
    pub fn detect(&self, chain: &[String]) -> Option<String> {
        if let Some(name) = &self.override_name {
            return Some(name.clone());
        }
        let mut known: Vec<&str> = KNOWN_MANUFACTURERS.to_vec();
        known.extend(self.additional.iter().map(String::as_str));
        detect_manufacturer(chain, &known)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SummarySettings {
    pub key_settings: Vec<String>,
}

impl Default for SummarySettings {
    fn default() -> Self {
        Self {
            key_settings: IMPORTANT_SETTINGS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub resolve: ResolveOptions,
    pub manufacturer: ManufacturerSettings,
    pub summary: SummarySettings,
}

impl Settings {
    /// Get the settings file path
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("profilestack")
            .join("settings.toml")
    }

    /// Load settings from disk, falling back to defaults
    pub fn load() -> Self {
        let path = Self::config_path();
        if !path.exists() {
            return Self::default();
        }
        match Self::load_from(&path) {
            Ok(settings) => settings,
            Err(e) => {
                log::warn!("{}; using default settings", e);
                Self::default()
            }
        }
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        let settings: Settings = toml::from_str(contents)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Write settings to `path`, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let io_error = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_error)?;
        }
        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents).map_err(io_error)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.resolve.max_inheritance_depth == 0 {
            return Err(ConfigError::Validation {
                field: "resolve.max_inheritance_depth".into(),
                reason: "must be greater than 0".into(),
            });
        }
        if self.manufacturer.override_name.as_deref().is_some_and(|n| n.trim().is_empty()) {
            return Err(empty_name("manufacturer.override"));
        }
        if self.manufacturer.additional.iter().any(|n| n.trim().is_empty()) {
            return Err(empty_name("manufacturer.additional"));
        }
        if self.summary.key_settings.iter().any(|k| k.trim().is_empty()) {
            return Err(empty_name("summary.key_settings"));
        }
        Ok(())
    }
}

fn empty_name(field: &str) -> ConfigError {
    ConfigError::Validation {
        field: field.to_string(),
        reason: "names must not be empty".into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn chain(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert!(settings.resolve.check_constraints);
        assert!(settings.resolve.resolve_extruders);
        assert_eq!(settings.resolve.max_inheritance_depth, 64);
        assert_eq!(settings.summary.key_settings.len(), IMPORTANT_SETTINGS.len());
        assert!(settings.manufacturer.override_name.is_none());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let settings = Settings::from_toml("[resolve]\ncheck_constraints = false\n").unwrap();
        assert!(!settings.resolve.check_constraints);
        assert!(settings.resolve.resolve_extruders);
        assert_eq!(settings.summary, SummarySettings::default());
    }

    #[test]
    fn test_full_file() {
        let text = r#"
[resolve]
check_constraints = true
resolve_extruders = false
max_inheritance_depth = 8

[manufacturer]
override = "creality"
additional = ["biqu", "tronxy"]

[summary]
key_settings = ["layer_height", "speed_print"]
"#;
        let settings = Settings::from_toml(text).unwrap();
        assert!(!settings.resolve.resolve_extruders);
        assert_eq!(settings.resolve.max_inheritance_depth, 8);
        assert_eq!(settings.manufacturer.override_name.as_deref(), Some("creality"));
        assert_eq!(settings.manufacturer.additional, vec!["biqu", "tronxy"]);
        assert_eq!(settings.summary.key_settings, vec!["layer_height", "speed_print"]);
    }

    #[test]
    fn test_validation() {
        assert!(matches!(
            Settings::from_toml("[resolve]\nmax_inheritance_depth = 0\n"),
            Err(ConfigError::Validation { field, .. }) if field == "resolve.max_inheritance_depth"
        ));
        assert!(matches!(
            Settings::from_toml("[manufacturer]\nadditional = [\"biqu\", \" \"]\n"),
            Err(ConfigError::Validation { field, .. }) if field == "manufacturer.additional"
        ));
        assert!(matches!(
            Settings::from_toml("[summary]\nkey_settings = [\"\"]\n"),
            Err(ConfigError::Validation { .. })
        ));
        assert!(matches!(
            Settings::from_toml("[resolve]\ncheck_constraints = \"yes\"\n"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_manufacturer_detection() {
        let detect = ManufacturerSettings::default();
        assert_eq!(
            detect.detect(&chain(&["creality_ender3pro", "creality_base", "fdmprinter"])),
            Some("creality".to_string())
        );
        assert_eq!(detect.detect(&chain(&["biqu_b1", "fdmprinter"])), None);

        let extended = ManufacturerSettings {
            override_name: None,
            additional: vec!["biqu".into()],
        };
        assert_eq!(extended.detect(&chain(&["biqu_b1", "fdmprinter"])), Some("biqu".to_string()));

        let forced = ManufacturerSettings {
            override_name: Some("Acme".into()),
            additional: Vec::new(),
        };
        assert_eq!(forced.detect(&chain(&["creality_base"])), Some("Acme".to_string()));
    }

    #[test]
    fn test_save_and_load_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.toml");

        let mut settings = Settings::default();
        settings.resolve.max_inheritance_depth = 16;
        settings.manufacturer.additional = vec!["tronxy".into()];
        settings.save_to(&path).unwrap();

        let loaded = Settings::load_from(&path).unwrap();
        assert_eq!(loaded, settings);
    }

    #[test]
    fn test_unreadable_file() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("missing.toml");
        assert!(matches!(Settings::load_from(&missing), Err(ConfigError::Io { .. })));

        let bad = dir.path().join("bad.toml");
        fs::write(&bad, "[resolve\n").unwrap();
        assert!(matches!(Settings::load_from(&bad), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_config_path_location() {
        let path = Settings::config_path();
        assert!(path.ends_with("profilestack/settings.toml"));
    }
}
