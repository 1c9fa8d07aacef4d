//! Configuration schema for circlet
//!
//! Global configuration is stored at `~/.config/circlet/config.toml`,
//! project overrides in `.circlet.toml`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,

    /// Pipeline document settings
    pub pipeline: PipelineConfig,

    /// Workflow executor settings
    pub executor: ExecutorConfig,

    /// Cache settings
    pub cache: CacheConfig,

    /// Extra environment variables passed to every job
    pub env: BTreeMap<String, String>,
}

/// General application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log format: "text" or "json"
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_format: "text".to_string(),
        }
    }
}

/// Pipeline document location
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Path of the pipeline document, relative to the project directory
    pub file: PathBuf,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            file: PathBuf::from(".circleci/config.yml"),
        }
    }
}

/// Workflow executor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Maximum concurrently running jobs (0 = available parallelism)
    pub workers: usize,

    /// Shell invocation; the step command is appended as the last argument
    pub shell: Vec<String>,

    /// Timeout applied to run steps without their own (0 = none)
    pub default_timeout_secs: u64,

    /// Stop launching new jobs after the first failure
    pub fail_fast: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            workers: 0,
            shell: vec![
                "/bin/bash".to_string(),
                "-eo".to_string(),
                "pipefail".to_string(),
                "-c".to_string(),
            ],
            default_timeout_secs: 0,
            fail_fast: false,
        }
    }
}

impl ExecutorConfig {
    /// Worker count with `0` resolved to the machine's parallelism
    pub fn effective_workers(&self) -> usize {
        if self.workers > 0 {
            return self.workers;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }
}

/// Cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Enable restore_cache / save_cache steps (default: true)
    pub enabled: bool,

    /// Cache directory (default: state dir)
    pub dir: Option<PathBuf>,

    /// `cache gc` removes entries older than N days (0 = disabled)
    pub gc_days: u32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: None,
            gc_days: 30,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = Config::default();
        let toml = toml::to_string_pretty(&config).unwrap();
        assert!(toml.contains("[general]"));
        assert!(toml.contains("[executor]"));
    }

    #[test]
    fn config_deserializes_empty() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.pipeline.file, PathBuf::from(".circleci/config.yml"));
        assert!(config.cache.enabled);
    }

    #[test]
    fn config_deserializes_partial() {
        let toml = r#"
            [executor]
            workers = 3

            [env]
            RUST_BACKTRACE = "1"
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.executor.workers, 3);
        assert_eq!(config.executor.shell[0], "/bin/bash"); // default preserved
        assert_eq!(config.env.get("RUST_BACKTRACE").map(String::as_str), Some("1"));
    }

    #[test]
    fn effective_workers_never_zero() {
        let config = ExecutorConfig::default();
        assert!(config.effective_workers() >= 1);

        let pinned = ExecutorConfig {
            workers: 2,
            ..ExecutorConfig::default()
        };
        assert_eq!(pinned.effective_workers(), 2);
    }
}
