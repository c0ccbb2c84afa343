//! Configuration file discovery and TOML loading
//!
//! Config file resolution priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. Per-user config file (`~/.config/dss/<file_name>`)
//! 4. System config file (`/etc/dss/<file_name>`, unix only)
//!
//! A missing config file is not an error: callers fall back to compiled
//! defaults and log a warning.

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};

/// Where a resolved configuration file came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    /// Passed explicitly on the command line
    CommandLine(PathBuf),
    /// Named by an environment variable
    Environment(PathBuf),
    /// Found in the platform config directory
    ConfigFile(PathBuf),
    /// No file found; compiled defaults apply
    Defaults,
}

impl ConfigSource {
    /// Path of the config file, if any
    pub fn path(&self) -> Option<&Path> {
        match self {
            ConfigSource::CommandLine(p)
            | ConfigSource::Environment(p)
            | ConfigSource::ConfigFile(p) => Some(p),
            ConfigSource::Defaults => None,
        }
    }
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigSource::CommandLine(p) => write!(f, "{} (command line)", p.display()),
            ConfigSource::Environment(p) => write!(f, "{} (environment)", p.display()),
            ConfigSource::ConfigFile(p) => write!(f, "{} (config directory)", p.display()),
            ConfigSource::Defaults => write!(f, "compiled defaults"),
        }
    }
}

/// Resolve which configuration file to load
///
/// # Arguments
/// * `cli_arg` - Path given on the command line
/// * `env_var_name` - Environment variable that may name a config file
/// * `file_name` - File name looked up under the `dss` config directories
pub fn resolve_config_path(
    cli_arg: Option<&Path>,
    env_var_name: &str,
    file_name: &str,
) -> ConfigSource {
    if let Some(path) = cli_arg {
        return ConfigSource::CommandLine(path.to_path_buf());
    }

    if let Ok(path) = std::env::var(env_var_name) {
        if !path.is_empty() {
            return ConfigSource::Environment(PathBuf::from(path));
        }
    }

    if let Some(user_config) = dirs::config_dir().map(|d| d.join("dss").join(file_name)) {
        if user_config.exists() {
            return ConfigSource::ConfigFile(user_config);
        }
    }

    if cfg!(unix) {
        let system_config = PathBuf::from("/etc/dss").join(file_name);
        if system_config.exists() {
            return ConfigSource::ConfigFile(system_config);
        }
    }

    ConfigSource::Defaults
}

/// Read and parse a TOML file into `T`
pub fn load_toml<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;

    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Failed to parse {}: {}", path.display(), e)))
}
