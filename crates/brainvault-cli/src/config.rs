//! Configuration vault: reads and writes `~/.brainvault/config.toml`.

use brainvault_memory::BrainConfig;
use brainvault_types::ValidationError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

const VAULT_DIR: &str = ".brainvault";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("failed to write config at {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid memory settings: {0}")]
    Invalid(#[from] ValidationError),
}

/// Persisted user configuration stored in `~/.brainvault/config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// SQLite database holding every memory record.
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    /// Tunables handed to the memory subsystem.
    #[serde(default)]
    pub memory: BrainConfig,
}

impl Config {
    /// Defaults rooted at `home` instead of the process home directory.
    pub(crate) fn for_home(home: &Path) -> Self {
        Self {
            database_path: vault_dir(home).join("brain.db"),
            memory: BrainConfig::default(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        Ok(self.memory.validate()?)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::for_home(&home_dir())
    }
}

fn default_database_path() -> PathBuf {
    vault_dir(&home_dir()).join("brain.db")
}

fn home_dir() -> PathBuf {
    std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
}

fn vault_dir(home: &Path) -> PathBuf {
    home.join(VAULT_DIR)
}

/// Return the path to `~/.brainvault/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(&home_dir())
}

pub(crate) fn config_path_for_home(home: &Path) -> PathBuf {
    vault_dir(home).join("config.toml")
}

/// REPL history lives next to the config file.
pub fn history_path() -> PathBuf {
    vault_dir(&home_dir()).join("history.txt")
}

/// Load the config, writing defaults on first run.  The flag reports
/// whether the file was just created.
pub fn load_or_init() -> Result<(Config, bool), ConfigError> {
    load_or_init_at(&config_path(), Config::default())
}

pub(crate) fn load_or_init_at(path: &Path, defaults: Config) -> Result<(Config, bool), ConfigError> {
    let (mut cfg, created) = match load_from(path)? {
        Some(cfg) => (cfg, false),
        None => {
            save_to(&defaults, path)?;
            (defaults, true)
        }
    };
    apply_env_overrides(&mut cfg);
    cfg.validate()?;
    Ok((cfg, created))
}

/// Load the config from a specific path.  Returns `None` if the file does
/// not exist.
pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(Some(toml::from_str(&raw)?))
}

/// Apply `BRAINVAULT_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `BRAINVAULT_DB_PATH` | `database_path` |
/// | `BRAINVAULT_CONSOLIDATION_INTERVAL_HOURS` | `memory.consolidation.interval_hours` |
pub fn apply_env_overrides(cfg: &mut Config) {
    apply_overrides_from(cfg, |name| std::env::var(name).ok());
}

fn apply_overrides_from(cfg: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(v) = lookup("BRAINVAULT_DB_PATH")
        && !v.trim().is_empty()
    {
        cfg.database_path = PathBuf::from(v);
    }
    if let Some(v) = lookup("BRAINVAULT_CONSOLIDATION_INTERVAL_HOURS")
        && let Ok(hours) = v.trim().parse::<i64>()
    {
        cfg.memory.consolidation.interval_hours = hours;
    }
}

/// Save the config, creating its directory if necessary.
pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    let write_err = |source| ConfigError::Write {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        create_private_dir(parent).map_err(write_err)?;
    }
    let raw = toml::to_string_pretty(cfg)?;
    #[cfg(unix)]
    {
        use std::io::Write;
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| f.write_all(raw.as_bytes()))
            .map_err(write_err)?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw).map_err(write_err)?;
    Ok(())
}

/// Create `dir` (and parents), restricted to the owner (rwx------) on Unix.
pub fn create_private_dir(dir: &Path) -> std::io::Result<()> {
    if dir.as_os_str().is_empty() {
        return Ok(());
    }
    fs::create_dir_all(dir)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(dir, fs::Permissions::from_mode(0o700))?;
    }
    Ok(())
}
