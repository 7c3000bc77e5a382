//! Client settings – reads/writes `~/.rcc/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rcc_client::{DEFAULT_TIME_TOLERANCE, workspace_search_dirs};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config at {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("failed to write config at {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Persisted settings stored in `~/.rcc/config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Namespace every endpoint lives under (e.g. `/arm`).
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Controller addressed by `/trigger`, `/set` and `/traj`.
    #[serde(default = "default_controller")]
    pub controller: String,

    /// How long to wait for an action server to appear.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: f64,

    /// How long a blocking command may take before it is cancelled.
    #[serde(default = "default_call_timeout")]
    pub call_timeout_secs: f64,

    /// Minimum waypoint spacing used when converting trajectories.
    #[serde(default = "default_time_tolerance")]
    pub time_tolerance: f64,

    #[serde(default = "default_joint_states_topic")]
    pub joint_states_topic: String,

    /// Resource search directories; the environment is consulted when empty.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub workspace_paths: Vec<PathBuf>,
}

fn default_namespace() -> String {
    "/arm".to_string()
}
fn default_controller() -> String {
    "trajectory_controller".to_string()
}
fn default_connect_timeout() -> f64 {
    2.0
}
fn default_call_timeout() -> f64 {
    10.0
}
fn default_time_tolerance() -> f64 {
    DEFAULT_TIME_TOLERANCE
}
fn default_joint_states_topic() -> String {
    "/joint_states".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            controller: default_controller(),
            connect_timeout_secs: default_connect_timeout(),
            call_timeout_secs: default_call_timeout(),
            time_tolerance: default_time_tolerance(),
            joint_states_topic: default_joint_states_topic(),
            workspace_paths: Vec::new(),
        }
    }
}

impl Config {
    pub fn connect_timeout(&self) -> Duration {
        secs_or(self.connect_timeout_secs, default_connect_timeout())
    }

    pub fn call_timeout(&self) -> Duration {
        secs_or(self.call_timeout_secs, default_call_timeout())
    }

    /// Where package resources are looked up.
    pub fn search_dirs(&self) -> Vec<PathBuf> {
        if self.workspace_paths.is_empty() {
            workspace_search_dirs()
        } else {
            self.workspace_paths.clone()
        }
    }
}

fn secs_or(secs: f64, fallback: f64) -> Duration {
    Duration::try_from_secs_f64(secs).unwrap_or_else(|_| Duration::from_secs_f64(fallback))
}

/// Return the path to `~/.rcc/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".rcc").join("config.toml")
}

/// Load the config from disk. Returns `None` if the file does not exist.
pub fn load() -> Result<Option<Config>, ConfigError> {
    load_from(&config_path())
}

pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let mut cfg: Config = toml::from_str(&raw)?;
    apply_env_overrides(&mut cfg);
    Ok(Some(cfg))
}

/// Apply `RCC_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `RCC_NAMESPACE` | `namespace` |
/// | `RCC_CONTROLLER` | `controller` |
/// | `RCC_CONNECT_TIMEOUT` | `connect_timeout_secs` |
/// | `RCC_CALL_TIMEOUT` | `call_timeout_secs` |
/// | `RCC_TIME_TOLERANCE` | `time_tolerance` |
/// | `RCC_JOINT_STATES_TOPIC` | `joint_states_topic` |
///
/// Numeric values that do not parse are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    apply_overrides(cfg, |key| std::env::var(key).ok());
}

fn apply_overrides(cfg: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(v) = lookup("RCC_NAMESPACE") {
        cfg.namespace = v;
    }
    if let Some(v) = lookup("RCC_CONTROLLER") {
        cfg.controller = v;
    }
    if let Some(v) = lookup("RCC_JOINT_STATES_TOPIC") {
        cfg.joint_states_topic = v;
    }
    let number = |key: &str| lookup(key).and_then(|v| v.trim().parse::<f64>().ok());
    if let Some(secs) = number("RCC_CONNECT_TIMEOUT") {
        cfg.connect_timeout_secs = secs;
    }
    if let Some(secs) = number("RCC_CALL_TIMEOUT") {
        cfg.call_timeout_secs = secs;
    }
    if let Some(tol) = number("RCC_TIME_TOLERANCE") {
        cfg.time_tolerance = tol;
    }
}

/// Save the config to disk, creating `~/.rcc/` if necessary.
pub fn save(cfg: &Config) -> Result<(), ConfigError> {
    save_to(cfg, &config_path())
}

pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    let write_err = |source| ConfigError::Write {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(write_err)?;
        // Owner-only (rwx------) on Unix.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700)).map_err(write_err)?;
        }
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
