//! Output options for plan rendering and the TOML file they can be loaded from.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Output format of a rendered plan.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExplainFormat {
    /// Fixed-column rows.
    #[default]
    Tabular,
    /// Nested JSON document.
    Json,
}

impl fmt::Display for ExplainFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ExplainFormat::Tabular => "tabular",
            ExplainFormat::Json => "json",
        })
    }
}

/// Optional tabular columns (`EXPLAIN EXTENDED` / `EXPLAIN PARTITIONS`).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExplainFlags {
    /// Adds the `filtered` column.
    pub extended: bool,
    /// Adds the `partitions` column.
    pub partitions: bool,
}

impl ExplainFlags {
    /// No optional columns.
    pub const NONE: ExplainFlags = ExplainFlags {
        extended: false,
        partitions: false,
    };

    /// `filtered` column only.
    pub const EXTENDED: ExplainFlags = ExplainFlags {
        extended: true,
        partitions: false,
    };
}

/// Rendering defaults, usually loaded from `<config_dir>/qplan/config.toml`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExplainConfig {
    /// Default output format.
    pub format: ExplainFormat,
    /// Show the `filtered` column.
    pub extended: bool,
    /// Show the `partitions` column.
    pub partitions: bool,
    /// Include runtime counters.
    pub analyze: bool,
    /// Pretty-print JSON output.
    pub json_pretty: bool,
    /// How long a live EXPLAIN request waits for the target statement.
    pub live_timeout_ms: u64,
}

impl Default for ExplainConfig {
    fn default() -> Self {
        Self {
            format: ExplainFormat::Tabular,
            extended: false,
            partitions: false,
            analyze: false,
            json_pretty: true,
            live_timeout_ms: 1_000,
        }
    }
}

impl ExplainConfig {
    /// Parses TOML text; missing keys take their defaults.
    pub fn from_toml_str(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Loads `path`, or the default location when `None`. A missing file
    /// yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => match default_config_path() {
                Some(path) => path,
                None => return Ok(Self::default()),
            },
        };
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        Self::from_toml_str(&contents).map_err(|source| ConfigError::Parse { path, source })
    }

    /// Optional-column flags.
    pub fn flags(&self) -> ExplainFlags {
        ExplainFlags {
            extended: self.extended,
            partitions: self.partitions,
        }
    }

    /// Live EXPLAIN wait as a duration.
    pub fn live_timeout(&self) -> Duration {
        Duration::from_millis(self.live_timeout_ms)
    }
}

/// Failure to load an [`ExplainConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File exists but could not be read.
    #[error("failed to read qplan config {path}: {source}")]
    Read {
        /// Config file.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },
    /// File is not valid config TOML.
    #[error("failed to parse qplan config {path}: {source}")]
    Parse {
        /// Config file.
        path: PathBuf,
        /// Underlying error.
        source: toml::de::Error,
    },
}

/// `<config_dir>/qplan/config.toml`, when the platform has a config directory.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|base| base.join("qplan").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let cfg = ExplainConfig::from_toml_str("format = \"json\"\nanalyze = true\n")
            .expect("valid toml");
        assert_eq!(cfg.format, ExplainFormat::Json);
        assert!(cfg.analyze);
        assert!(cfg.json_pretty);
        assert_eq!(cfg.live_timeout(), Duration::from_secs(1));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(ExplainConfig::from_toml_str("colour = true").is_err());
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("absent.toml");
        let cfg = ExplainConfig::load(Some(path.as_path())).expect("defaults");
        assert_eq!(cfg, ExplainConfig::default());
    }

    #[test]
    fn parse_error_names_the_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        fs::write(&path, "extended = \"yes\"").expect("write config");
        let err = ExplainConfig::load(Some(path.as_path())).unwrap_err();
        assert!(err.to_string().contains("config.toml"));
    }

    #[test]
    fn flags_follow_config() {
        let cfg = ExplainConfig {
            extended: true,
            ..ExplainConfig::default()
        };
        assert_eq!(cfg.flags(), ExplainFlags::EXTENDED);
    }
}
