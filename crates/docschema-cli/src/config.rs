//! Runtime configuration.
//!
//! Settings are merged in priority order: environment variables, then
//! `.docschema.local.yml`, then `.docschema.yml`. Command-line flags
//! override all of them.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main config file name.
pub const CONFIG_FILE: &str = ".docschema.yml";

/// Local override file name, meant to stay out of version control.
pub const LOCAL_CONFIG_FILE: &str = ".docschema.local.yml";

/// Environment variable for the data directory.
pub const ENV_DATA_PATH: &str = "DOCSCHEMA_DATA_PATH";

/// Environment variable for the collection name.
pub const ENV_COLLECTION: &str = "DOCSCHEMA_COLLECTION";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing data path: set data_path in .docschema.yml, .docschema.local.yml, or DOCSCHEMA_DATA_PATH")]
    MissingDataPath,

    #[error("missing collection: set collection in .docschema.yml, .docschema.local.yml, or DOCSCHEMA_COLLECTION")]
    MissingCollection,

    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

/// Contents of a config file. Every key is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub data_path: Option<PathBuf>,
    #[serde(default)]
    pub collection: Option<String>,
}

impl FileConfig {
    /// Read a config file. A missing or empty file is an empty config.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => {
                return Err(ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Fill unset keys from `other`.
    fn or(self, other: FileConfig) -> Self {
        Self {
            data_path: self.data_path.or(other.data_path),
            collection: self.collection.or(other.collection),
        }
    }
}

/// Resolved settings for commands that touch a collection.
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeConfig {
    pub data_path: PathBuf,
    pub collection: String,
}

impl RuntimeConfig {
    /// Create a runtime configuration.
    pub fn new(data_path: impl Into<PathBuf>, collection: impl Into<String>) -> Self {
        Self {
            data_path: data_path.into(),
            collection: collection.into(),
        }
    }

    /// Resolve from config files in `dir`, the process environment and
    /// command-line overrides.
    pub fn load(dir: &Path, overrides: FileConfig) -> Result<Self, ConfigError> {
        Self::resolve(dir, overrides, |key| std::env::var(key).ok())
    }

    /// Resolve with an explicit environment lookup.
    pub fn resolve<F>(dir: &Path, overrides: FileConfig, env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let merged = merge_sources(dir, overrides, env)?;

        let data_path = merged.data_path.ok_or(ConfigError::MissingDataPath)?;
        let collection = merged
            .collection
            .filter(|c| !c.is_empty())
            .ok_or(ConfigError::MissingCollection)?;

        Ok(Self {
            data_path,
            collection,
        })
    }
}

/// Resolve only the data path, for commands that span every collection.
pub fn load_data_path(dir: &Path, overrides: FileConfig) -> Result<PathBuf, ConfigError> {
    resolve_data_path(dir, overrides, |key| std::env::var(key).ok())
}

/// [`load_data_path`] with an explicit environment lookup.
pub fn resolve_data_path<F>(
    dir: &Path,
    overrides: FileConfig,
    env: F,
) -> Result<PathBuf, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    merge_sources(dir, overrides, env)?
        .data_path
        .ok_or(ConfigError::MissingDataPath)
}

/// Flags, then environment, then the local file, then the main file.
fn merge_sources<F>(dir: &Path, overrides: FileConfig, env: F) -> Result<FileConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let from_env = FileConfig {
        data_path: env(ENV_DATA_PATH)
            .filter(|v| !v.is_empty())
            .map(PathBuf::from),
        collection: env(ENV_COLLECTION).filter(|v| !v.is_empty()),
    };
    let local = FileConfig::load(&dir.join(LOCAL_CONFIG_FILE))?;
    let main = FileConfig::load(&dir.join(CONFIG_FILE))?;

    Ok(overrides.or(from_env).or(local).or(main))
}

/// Write a starter config file unless one already exists.
///
/// Returns `false` when the file was already there.
pub fn write_default_config(path: &Path) -> Result<bool, ConfigError> {
    if path.exists() {
        return Ok(false);
    }
    let content = FileConfig {
        data_path: Some(PathBuf::from("./docschema-data")),
        collection: Some("documents".to_string()),
    };
    let io_err = |source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    };
    let text = serde_yaml::to_string(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(io_err)?;
    }
    std::fs::write(path, text).map_err(io_err)?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_missing_everything() {
        let dir = tempfile::tempdir().unwrap();
        let err = RuntimeConfig::resolve(dir.path(), FileConfig::default(), no_env).unwrap_err();
        assert!(matches!(err, ConfigError::MissingDataPath));
    }

    #[test]
    fn test_missing_collection() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "data_path: ./data\n").unwrap();
        let err = RuntimeConfig::resolve(dir.path(), FileConfig::default(), no_env).unwrap_err();
        assert!(matches!(err, ConfigError::MissingCollection));
    }

    #[test]
    fn test_priority_order() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE),
            "data_path: ./main\ncollection: main\n",
        )
        .unwrap();
        std::fs::write(dir.path().join(LOCAL_CONFIG_FILE), "collection: local\n").unwrap();

        let config = RuntimeConfig::resolve(dir.path(), FileConfig::default(), no_env).unwrap();
        assert_eq!(config, RuntimeConfig::new("./main", "local"));

        let env = |key: &str| (key == ENV_COLLECTION).then(|| "env".to_string());
        let config = RuntimeConfig::resolve(dir.path(), FileConfig::default(), env).unwrap();
        assert_eq!(config.collection, "env");

        let flags = FileConfig {
            data_path: Some(PathBuf::from("./flag")),
            collection: Some("flag".to_string()),
        };
        let config = RuntimeConfig::resolve(dir.path(), flags, env).unwrap();
        assert_eq!(config, RuntimeConfig::new("./flag", "flag"));
    }

    #[test]
    fn test_data_path_without_collection() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "data_path: ./data\n").unwrap();

        let path = resolve_data_path(dir.path(), FileConfig::default(), no_env).unwrap();
        assert_eq!(path, PathBuf::from("./data"));

        let env = |key: &str| (key == ENV_DATA_PATH).then(|| "./env".to_string());
        let path = resolve_data_path(dir.path(), FileConfig::default(), env).unwrap();
        assert_eq!(path, PathBuf::from("./env"));

        let empty = tempfile::tempdir().unwrap();
        let err = resolve_data_path(empty.path(), FileConfig::default(), no_env).unwrap_err();
        assert!(matches!(err, ConfigError::MissingDataPath));
    }

    #[test]
    fn test_invalid_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "collection: [unclosed\n").unwrap();
        let err = RuntimeConfig::resolve(dir.path(), FileConfig::default(), no_env).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_write_default_config_does_not_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);

        assert!(write_default_config(&path).unwrap());
        std::fs::write(&path, "collection: mine\n").unwrap();
        assert!(!write_default_config(&path).unwrap());

        let loaded = FileConfig::load(&path).unwrap();
        assert_eq!(loaded.collection.as_deref(), Some("mine"));
    }
}
