//! Daemon configuration – reads/writes `~/.belfry/config.toml`.

use belfry_hal::PinMap;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Which motor backend the daemon drives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[derive(Default)]
pub enum Backend {
    /// In-process simulation; no hardware required.
    #[default]
    Sim,
    /// wiringOP `gpio` CLI driving the L298N board.
    WiringOp,
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Backend::Sim => write!(f, "sim"),
            Backend::WiringOp => write!(f, "wiringop"),
        }
    }
}

/// Persisted daemon configuration stored in `~/.belfry/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Motor backend to drive.
    #[serde(default)]
    pub backend: Backend,

    /// Duty percentage used for alarm-driven motor starts.
    #[serde(default = "default_duty")]
    pub default_duty: u8,

    /// SQLite database holding the alarm definitions.
    #[serde(default = "default_database")]
    pub database: PathBuf,

    /// Whether to watch the physical STOP button (hardware backend only).
    #[serde(default = "default_stop_button")]
    pub stop_button: bool,

    /// STOP-button poll cadence in milliseconds; doubles as the debounce
    /// window.
    #[serde(default = "default_button_poll_ms")]
    pub button_poll_ms: u64,

    /// GPIO pin assignments for the motor driver and STOP button.
    #[serde(default)]
    pub pins: PinMap,
}

fn default_duty() -> u8 {
    belfry_types::DEFAULT_DUTY
}
fn default_database() -> PathBuf {
    belfry_dir().join("alarms.db")
}
fn default_stop_button() -> bool {
    true
}
fn default_button_poll_ms() -> u64 {
    50
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend: Backend::default(),
            default_duty: default_duty(),
            database: default_database(),
            stop_button: default_stop_button(),
            button_poll_ms: default_button_poll_ms(),
            pins: PinMap::default(),
        }
    }
}

/// Return `~/.belfry`.
fn belfry_dir() -> PathBuf {
    let home = std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(".belfry")
}

/// Return the config file path: `BELFRY_CONFIG` when set, otherwise
/// `~/.belfry/config.toml`.
pub fn config_path() -> PathBuf {
    if let Ok(path) = std::env::var("BELFRY_CONFIG") {
        return PathBuf::from(path);
    }
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

/// Build the config path relative to the given home directory.
/// Extracted for testability without mutating environment variables.
pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".belfry").join("config.toml")
}

/// Load the config from disk.  Returns `None` if the file does not exist.
pub fn load() -> Result<Option<Config>, String> {
    load_from(&config_path())
}

/// Load the config from a specific path.
pub(crate) fn load_from(path: &PathBuf) -> Result<Option<Config>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let mut cfg: Config =
        toml::from_str(&raw).map_err(|e| format!("Failed to parse config: {}", e))?;
    apply_env_overrides(&mut cfg);
    Ok(Some(cfg))
}

/// Apply `BELFRY_*` environment variable overrides to `cfg`.
///
/// Supported variables:
///
/// | Variable | Config field |
/// |---|---|
/// | `BELFRY_BACKEND` | `backend` (`sim` or `wiringop`) |
/// | `BELFRY_DATABASE` | `database` |
/// | `BELFRY_DUTY` | `default_duty` |
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("BELFRY_BACKEND") {
        match v.to_ascii_lowercase().as_str() {
            "sim" => cfg.backend = Backend::Sim,
            "wiringop" => cfg.backend = Backend::WiringOp,
            _ => {}
        }
    }
    if let Ok(v) = std::env::var("BELFRY_DATABASE") {
        cfg.database = PathBuf::from(v);
    }
    if let Ok(v) = std::env::var("BELFRY_DUTY")
        && let Ok(duty) = v.parse::<u8>()
    {
        cfg.default_duty = duty.min(100);
    }
}

/// Save the config to disk, creating `~/.belfry/` if necessary.
pub fn save(cfg: &Config) -> Result<(), String> {
    save_to(cfg, &config_path())
}

/// Save the config to a specific path.
pub(crate) fn save_to(cfg: &Config, path: &PathBuf) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory: {}", e))?;
    }
    let raw =
        toml::to_string_pretty(cfg).map_err(|e| format!("Failed to serialize config: {}", e))?;
    fs::write(path, raw).map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_default_config() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        let cfg = Config::default();
        save_to(&cfg, &path).expect("save");

        let loaded = load_from(&path).expect("load ok").expect("some");
        assert_eq!(loaded.backend, Backend::Sim);
        assert_eq!(loaded.default_duty, 100);
        assert!(loaded.stop_button);
        assert_eq!(loaded.button_poll_ms, 50);
        assert_eq!(loaded.pins, PinMap::default());
    }

    #[test]
    fn config_path_points_to_belfry_dir() {
        let p = config_path_for_home("/home/testuser");
        assert!(p.to_string_lossy().contains(".belfry"));
        assert!(p.to_string_lossy().ends_with("config.toml"));
    }

    #[test]
    fn load_from_returns_none_when_missing() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        let result = load_from(&path).expect("no error");
        assert!(result.is_none());
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "backend = \"wiringop\"\n").unwrap();

        let loaded = load_from(&path).expect("load ok").expect("some");
        assert_eq!(loaded.backend, Backend::WiringOp);
        assert_eq!(loaded.default_duty, 100);
    }

    #[test]
    fn apply_env_overrides_changes_backend() {
        // SAFETY: single-threaded test; no data races on env vars.
        unsafe { std::env::set_var("BELFRY_BACKEND", "wiringop") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.backend, Backend::WiringOp);
        unsafe { std::env::remove_var("BELFRY_BACKEND") };
    }

    #[test]
    fn apply_env_overrides_clamps_duty() {
        // SAFETY: single-threaded test; no data races on env vars.
        unsafe { std::env::set_var("BELFRY_DUTY", "250") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.default_duty, 100);
        unsafe { std::env::remove_var("BELFRY_DUTY") };
    }

    #[test]
    fn apply_env_overrides_ignores_invalid_duty() {
        // SAFETY: single-threaded test; no data races on env vars.
        unsafe { std::env::set_var("BELFRY_DUTY", "loud") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.default_duty, 100);
        unsafe { std::env::remove_var("BELFRY_DUTY") };
    }
}
