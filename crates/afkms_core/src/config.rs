//! Runtime settings.
//!
//! Layering, later wins: built-in defaults, then an optional TOML file,
//! then `AFKMS_*` environment variables.
//!
//! ```toml
//! [storage]
//! db_path = "/var/lib/afkms/afkms.db"
//!
//! [logging]
//! level = "info"
//! dir = "/var/log/afkms"
//! ```

use crate::logging::default_log_level;
use serde::Deserialize;
use std::path::{Path, PathBuf};

pub const ENV_DB_PATH: &str = "AFKMS_DB_PATH";
pub const ENV_LOG_LEVEL: &str = "AFKMS_LOG_LEVEL";
pub const ENV_LOG_DIR: &str = "AFKMS_LOG_DIR";

const DEFAULT_DB_FILE: &str = "afkms.db";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config `{path}`: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config `{path}`: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub db_path: PathBuf,
    pub log_level: String,
    /// Absolute directory for rolling log files.
    pub log_dir: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from(DEFAULT_DB_FILE),
            log_level: default_log_level().to_string(),
            log_dir: std::env::temp_dir().join("afkms").join("logs"),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    #[serde(default)]
    storage: StorageSection,
    #[serde(default)]
    logging: LoggingSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct StorageSection {
    db_path: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct LoggingSection {
    level: Option<String>,
    dir: Option<PathBuf>,
}

impl Settings {
    /// Loads settings from `config_file` (if any) and the process environment.
    pub fn load(config_file: Option<&Path>) -> Result<Self, ConfigError> {
        Self::from_sources(config_file, |key| std::env::var(key).ok())
    }

    /// Same as [`Settings::load`] with an injectable environment lookup.
    pub fn from_sources(
        config_file: Option<&Path>,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let mut settings = Self::default();

        if let Some(path) = config_file {
            let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;
            settings.merge_toml(&text).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        }

        let lookup = |key: &str| env(key).filter(|value| !value.trim().is_empty());
        if let Some(db_path) = lookup(ENV_DB_PATH) {
            settings.db_path = PathBuf::from(db_path.trim());
        }
        if let Some(level) = lookup(ENV_LOG_LEVEL) {
            settings.log_level = level.trim().to_string();
        }
        if let Some(dir) = lookup(ENV_LOG_DIR) {
            settings.log_dir = PathBuf::from(dir.trim());
        }
        Ok(settings)
    }

    fn merge_toml(&mut self, text: &str) -> Result<(), toml::de::Error> {
        let file: FileConfig = toml::from_str(text)?;
        if let Some(db_path) = file.storage.db_path {
            self.db_path = db_path;
        }
        if let Some(level) = file.logging.level {
            self.log_level = level;
        }
        if let Some(dir) = file.logging.dir {
            self.log_dir = dir;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn defaults_apply_without_sources() {
        let settings = Settings::from_sources(None, no_env).unwrap();
        assert_eq!(settings.db_path, PathBuf::from("afkms.db"));
        assert_eq!(settings.log_level, default_log_level());
        assert!(settings.log_dir.is_absolute());
    }

    #[test]
    fn file_then_env_layering() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("afkms.toml");
        std::fs::write(
            &path,
            "[storage]\ndb_path = \"/data/a.db\"\n\n[logging]\nlevel = \"warn\"\ndir = \"/logs\"\n",
        )
        .unwrap();

        let from_file = Settings::from_sources(Some(path.as_path()), no_env).unwrap();
        assert_eq!(from_file.db_path, PathBuf::from("/data/a.db"));
        assert_eq!(from_file.log_level, "warn");
        assert_eq!(from_file.log_dir, PathBuf::from("/logs"));

        let env: HashMap<&str, &str> =
            HashMap::from([(ENV_DB_PATH, "/override.db"), (ENV_LOG_LEVEL, "  ")]);
        let layered =
            Settings::from_sources(Some(path.as_path()), |key| env.get(key).map(|v| v.to_string()))
                .unwrap();
        assert_eq!(layered.db_path, PathBuf::from("/override.db"));
        assert_eq!(layered.log_level, "warn", "blank env values are ignored");
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[storage]\ndatabase = \"x\"\n").unwrap();
        let err = Settings::from_sources(Some(path.as_path()), no_env).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let err = Settings::from_sources(Some(Path::new("/nonexistent/afkms.toml")), no_env)
            .unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
