//! Runtime configuration and execution policy.
//!
//! Defaults live in [`crate::defaults`]; overrides merge field-wise. The host
//! binary builds a [`RuntimeConfig`] once (typically via [`RuntimeConfig::from_env`])
//! and hands it to every component at construction.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::defaults;
use crate::error::{Error, Result};

/// Deployment mode of the host process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Dev,
    Prod,
}

impl Default for Mode {
    fn default() -> Self {
        Mode::Prod
    }
}

impl FromStr for Mode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "dev" => Ok(Mode::Dev),
            "prod" => Ok(Mode::Prod),
            other => Err(Error::InvalidRequest(format!("unknown mode: {other:?}"))),
        }
    }
}

/// Timeout and retry budget governing one tool call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionPolicy {
    /// Wall-clock budget per attempt, in milliseconds.
    pub timeout_ms: u64,
    /// Extra attempts after the first failure.
    pub max_retries: u32,
}

impl Default for ExecutionPolicy {
    fn default() -> Self {
        ExecutionPolicy {
            timeout_ms: defaults::TOOL_TIMEOUT_MS,
            max_retries: defaults::TOOL_MAX_RETRIES,
        }
    }
}

impl ExecutionPolicy {
    /// Apply a partial override on top of this policy.
    pub fn merged(&self, overrides: &PolicyOverride) -> ExecutionPolicy {
        ExecutionPolicy {
            timeout_ms: overrides.timeout_ms.unwrap_or(self.timeout_ms),
            max_retries: overrides.max_retries.unwrap_or(self.max_retries),
        }
    }
}

/// Per-call policy override carried alongside a tool request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct PolicyOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
}

/// Full runtime configuration of the host process.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Root of the authoritative note vault.
    pub vault_path: PathBuf,
    /// Index database file. Derived from the vault when left blank.
    pub index_path: PathBuf,
    pub mode: Mode,
    pub policy: ExecutionPolicy,
    /// tracing filter directive: debug, info, warn, or error.
    pub log_level: String,
}

impl RuntimeConfig {
    /// Build a config for the given vault with defaults everywhere else.
    pub fn for_vault(vault_path: impl Into<PathBuf>) -> Self {
        let vault_path = vault_path.into();
        let index_path = default_index_path(&vault_path);
        RuntimeConfig {
            vault_path,
            index_path,
            mode: Mode::default(),
            policy: ExecutionPolicy::default(),
            log_level: "info".to_string(),
        }
    }

    /// Read configuration from `MEMENTA_*` environment variables.
    ///
    /// `MEMENTA_VAULT_PATH` is required; everything else falls back to
    /// defaults. Malformed numeric or enum values are an error rather than a
    /// silent fallback.
    pub fn from_env() -> Result<Self> {
        let vault_path = std::env::var("MEMENTA_VAULT_PATH")
            .map_err(|_| Error::InvalidRequest("MEMENTA_VAULT_PATH is not set".into()))?;
        let vault_path = PathBuf::from(vault_path);

        let index_path = match std::env::var("MEMENTA_INDEX_PATH") {
            Ok(raw) if !raw.trim().is_empty() => {
                let p = PathBuf::from(raw);
                if p.is_absolute() {
                    p
                } else {
                    vault_path.join(p)
                }
            }
            _ => default_index_path(&vault_path),
        };

        let mode = match std::env::var("MEMENTA_MODE") {
            Ok(raw) => raw.parse()?,
            Err(_) => Mode::default(),
        };

        let mut policy = ExecutionPolicy::default();
        if let Ok(raw) = std::env::var("MEMENTA_TIMEOUT_MS") {
            policy.timeout_ms = raw
                .parse()
                .map_err(|_| Error::InvalidRequest(format!("bad MEMENTA_TIMEOUT_MS: {raw:?}")))?;
        }
        if let Ok(raw) = std::env::var("MEMENTA_MAX_RETRIES") {
            policy.max_retries = raw
                .parse()
                .map_err(|_| Error::InvalidRequest(format!("bad MEMENTA_MAX_RETRIES: {raw:?}")))?;
        }

        let log_level = match std::env::var("MEMENTA_LOG_LEVEL") {
            Ok(raw) => {
                if !matches!(raw.as_str(), "debug" | "info" | "warn" | "error") {
                    return Err(Error::InvalidRequest(format!(
                        "bad MEMENTA_LOG_LEVEL: {raw:?}"
                    )));
                }
                raw
            }
            Err(_) => "info".to_string(),
        };

        Ok(RuntimeConfig {
            vault_path,
            index_path,
            mode,
            policy,
            log_level,
        })
    }
}

fn default_index_path(vault: &Path) -> PathBuf {
    vault.join(crate::defaults::INDEX_DB_FILENAME)
}
