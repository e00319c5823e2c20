//! TOML-based configuration for BibSync.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::errors::ConfigError;

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Local repository settings.
    pub repository: RepositoryConfig,

    /// Library file settings.
    pub library: LibraryConfig,

    /// Identity recorded on merge commits.
    pub author: AuthorConfig,
}

/// Local repository settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryConfig {
    /// Path to the repository working directory.
    pub path: PathBuf,

    /// Name of the remote whose tracking ref is merged (default `origin`).
    #[serde(default = "default_remote")]
    pub remote: String,
}

/// Library file settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LibraryConfig {
    /// Path of the library file, relative to the repository root.
    pub file: PathBuf,

    /// Encoding the file is written with (WHATWG label, default `utf-8`).
    #[serde(default = "default_encoding")]
    pub encoding: String,
}

/// Commit author identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorConfig {
    pub name: String,
    pub email: String,
}

fn default_remote() -> String {
    "origin".into()
}

fn default_encoding() -> String {
    "utf-8".into()
}

impl AppConfig {
    /// Load and validate a configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::FileNotFound(path.display().to_string())
            } else {
                ConfigError::IoError(e)
            }
        })?;
        let config: Self =
            toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        info!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    /// Check value-level constraints serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.repository.remote.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "repository.remote".into(),
                detail: "remote name must not be empty".into(),
            });
        }
        if self.library.file.is_absolute() {
            return Err(ConfigError::InvalidValue {
                field: "library.file".into(),
                detail: "must be relative to the repository root".into(),
            });
        }
        if encoding_rs::Encoding::for_label(self.library.encoding.as_bytes()).is_none() {
            return Err(ConfigError::InvalidValue {
                field: "library.encoding".into(),
                detail: format!("unknown encoding label '{}'", self.library.encoding),
            });
        }
        if self.author.name.is_empty() || !self.author.email.contains('@') {
            return Err(ConfigError::InvalidValue {
                field: "author".into(),
                detail: "author name and a valid email are required".into(),
            });
        }
        Ok(())
    }
}
