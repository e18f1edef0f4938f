//! Configuration for the orchestrator, its driver, and storage paths.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("failed to serialize config at {path}: {source}")]
    Serialize {
        path: PathBuf,
        #[source]
        source: toml::ser::Error,
    },
    #[error("failed to create config parent directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write config file at {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Top-level configuration, read from `easel.toml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct EaselConfig {
    #[serde(default)]
    pub driver: DriverConfig,
    #[serde(default)]
    pub merge: MergeConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Settings for the TUI automation driver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverConfig {
    /// Executable of the driven CLI coding tool.
    #[serde(default = "default_tool_bin")]
    pub tool_bin: String,
    /// Shell used to host the tool inside the terminal.
    #[serde(default = "default_shell_bin")]
    pub shell_bin: String,
    /// Delay between injecting the prompt text and pressing Enter.
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
    /// Requested terminal grid. Clamped up to the 24x80 minimum the driven
    /// tool requires.
    #[serde(default = "default_lines")]
    pub lines: u16,
    #[serde(default = "default_cols")]
    pub cols: u16,
}

fn default_tool_bin() -> String {
    "claude".to_string()
}

fn default_shell_bin() -> String {
    "bash".to_string()
}

fn default_settle_delay_ms() -> u64 {
    500
}

fn default_lines() -> u16 {
    40
}

fn default_cols() -> u16 {
    120
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            tool_bin: default_tool_bin(),
            shell_bin: default_shell_bin(),
            settle_delay_ms: default_settle_delay_ms(),
            lines: default_lines(),
            cols: default_cols(),
        }
    }
}

/// Settings for the merge background agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Upper bound on one driver run inside a merge attempt.
    #[serde(default = "default_attempt_timeout_secs")]
    pub attempt_timeout_secs: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_attempt_timeout_secs() -> u64 {
    30 * 60
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            attempt_timeout_secs: default_attempt_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    #[serde(default = "default_event_log_dir")]
    pub event_log_dir: PathBuf,
    /// Where canvas working copies are created.
    #[serde(default = "default_canvas_dir")]
    pub canvas_dir: PathBuf,
}

fn default_db_path() -> PathBuf {
    PathBuf::from(".easel/easel.db")
}

fn default_event_log_dir() -> PathBuf {
    PathBuf::from(".easel/events")
}

fn default_canvas_dir() -> PathBuf {
    PathBuf::from(".easel/canvases")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            event_log_dir: default_event_log_dir(),
            canvas_dir: default_canvas_dir(),
        }
    }
}

pub fn parse_config(contents: &str) -> Result<EaselConfig, toml::de::Error> {
    toml::from_str(contents)
}

pub fn load_config(path: impl AsRef<Path>) -> Result<EaselConfig, ConfigError> {
    let path_ref = path.as_ref();
    let body = fs::read_to_string(path_ref).map_err(|source| ConfigError::Read {
        path: path_ref.to_path_buf(),
        source,
    })?;
    parse_config(&body).map_err(|source| ConfigError::Parse {
        path: path_ref.to_path_buf(),
        source,
    })
}

pub fn save_config(path: impl AsRef<Path>, config: &EaselConfig) -> Result<(), ConfigError> {
    let path_ref = path.as_ref();
    if let Some(parent) = path_ref.parent().map(Path::to_path_buf) {
        fs::create_dir_all(&parent).map_err(|source| ConfigError::CreateDir {
            path: parent,
            source,
        })?;
    }

    let body = toml::to_string_pretty(config).map_err(|source| ConfigError::Serialize {
        path: path_ref.to_path_buf(),
        source,
    })?;
    fs::write(path_ref, body).map_err(|source| ConfigError::Write {
        path: path_ref.to_path_buf(),
        source,
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unique_temp_path(file_name: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "{file_name}-{}.toml",
            chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default()
        ))
    }

    #[test]
    fn empty_config_yields_defaults() {
        let config = parse_config("").expect("parse empty config");
        assert_eq!(config.driver.tool_bin, "claude");
        assert_eq!(config.driver.settle_delay_ms, 500);
        assert_eq!(config.merge.max_attempts, 3);
        assert_eq!(config.merge.attempt_timeout_secs, 1800);
        assert_eq!(config.storage.db_path, PathBuf::from(".easel/easel.db"));
    }

    #[test]
    fn partial_sections_keep_per_field_defaults() {
        let config = parse_config(
            r#"
[driver]
tool_bin = "claude-next"

[merge]
max_attempts = 5
"#,
        )
        .expect("parse partial config");

        assert_eq!(config.driver.tool_bin, "claude-next");
        assert_eq!(config.driver.shell_bin, "bash");
        assert_eq!(config.merge.max_attempts, 5);
        assert_eq!(config.merge.attempt_timeout_secs, 1800);
    }

    #[test]
    fn save_and_load_roundtrip() {
        let mut config = EaselConfig::default();
        config.driver.lines = 50;
        config.merge.max_attempts = 4;

        let path = unique_temp_path("easel-config-roundtrip");
        save_config(&path, &config).expect("save config");
        let loaded = load_config(&path).expect("load config");
        assert_eq!(loaded, config);

        let _ = fs::remove_file(path);
    }

    #[test]
    fn load_config_classifies_read_and_parse_errors() {
        let missing = unique_temp_path("easel-missing-config");
        let err = load_config(&missing).expect_err("missing file should fail");
        assert!(matches!(err, ConfigError::Read { path, .. } if path == missing));

        let invalid = unique_temp_path("easel-invalid-config");
        fs::write(&invalid, "driver = [").expect("write invalid config fixture");
        let err = load_config(&invalid).expect_err("invalid config should fail");
        assert!(matches!(err, ConfigError::Parse { path, .. } if path == invalid));
        let _ = fs::remove_file(invalid);
    }
}
