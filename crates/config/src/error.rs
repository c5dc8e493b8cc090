use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot access {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid settings file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("cannot write settings: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("invalid setting '{field}': {reason}")]
    Validation { field: String, reason: String },
}
