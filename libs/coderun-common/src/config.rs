// Engine configuration
// Defaults, optionally overlaid by a JSON file and then by environment variables

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_DETECT_TIMEOUT_MS: u64 = 3_000;
pub const DEFAULT_KILL_GRACE_MS: u64 = 500;
pub const DEFAULT_MAX_SOURCE_BYTES: usize = 1024 * 1024; // 1MB
pub const DEFAULT_FALLBACK_SHELL: &str = "/bin/sh";

pub const ENV_SCRATCH_DIR: &str = "CODERUN_SCRATCH_DIR";
pub const ENV_TIMEOUT_MS: &str = "CODERUN_TIMEOUT_MS";
pub const ENV_SHELL: &str = "CODERUN_SHELL";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    NotFound(PathBuf),

    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("invalid value for {name}: {value}")]
    InvalidEnv { name: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Shared directory for ephemeral sources and compiled artifacts
    pub scratch_dir: PathBuf,
    /// Wall-clock bound for a whole compile-and-run pipeline
    pub timeout_ms: u64,
    /// Bound for a single toolchain probe during detection
    pub detect_timeout_ms: u64,
    /// How long output readers may drain after a kill
    pub kill_grace_ms: u64,
    /// Shell used when neither `shell` nor `$SHELL` is set
    pub fallback_shell: PathBuf,
    /// Explicit login shell, taking precedence over `$SHELL`
    pub shell: Option<PathBuf>,
    pub max_source_bytes: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            scratch_dir: default_scratch_dir(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            detect_timeout_ms: DEFAULT_DETECT_TIMEOUT_MS,
            kill_grace_ms: DEFAULT_KILL_GRACE_MS,
            fallback_shell: PathBuf::from(DEFAULT_FALLBACK_SHELL),
            shell: None,
            max_source_bytes: DEFAULT_MAX_SOURCE_BYTES,
        }
    }
}

pub fn default_scratch_dir() -> PathBuf {
    std::env::temp_dir().join("coderun-scratch")
}

impl EngineConfig {
    /// Load from a JSON file; missing keys keep their defaults
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Defaults overlaid with `CODERUN_*` environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().with_env_overrides()
    }

    pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
        self.with_overrides(|name| std::env::var(name).ok())
    }

    fn with_overrides<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup(ENV_SCRATCH_DIR).filter(|v| !v.trim().is_empty()) {
            self.scratch_dir = PathBuf::from(dir);
        }

        if let Some(raw) = lookup(ENV_TIMEOUT_MS) {
            self.timeout_ms = raw
                .trim()
                .parse::<u64>()
                .ok()
                .filter(|ms| *ms > 0)
                .ok_or(ConfigError::InvalidEnv {
                    name: ENV_TIMEOUT_MS,
                    value: raw.clone(),
                })?;
        }

        if let Some(shell) = lookup(ENV_SHELL).filter(|v| !v.trim().is_empty()) {
            self.shell = Some(PathBuf::from(shell));
        }

        Ok(self)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn detect_timeout(&self) -> Duration {
        Duration::from_millis(self.detect_timeout_ms)
    }

    pub fn kill_grace(&self) -> Duration {
        Duration::from_millis(self.kill_grace_ms)
    }
}
