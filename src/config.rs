//! Configuration loading via `ortho-config`.
//!
//! The engine itself is constructed programmatically (see [`crate::db::Db`]);
//! [`EngineConfig`] exists for embedding applications that want the usual
//! defaults-then-file-then-env-then-CLI precedence instead of wiring every
//! value by hand.

use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

/// TOML section name for engine configuration.
const ENGINE_SECTION: &str = "engine";

/// Top-level engine configuration derived from environment variables,
/// configuration files, and CLI flags.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(prefix = "NANDB")]
pub struct EngineConfig {
    /// Working directory URIs are resolved relative to. Defaults to `/`.
    #[ortho_config(default = "/".to_owned())]
    pub cwd: String,
    /// Root prefix every resolved URI is nested under. Defaults to `/`.
    #[ortho_config(default = "/".to_owned())]
    pub root: String,
    /// Cache TTL in milliseconds; `0` disables expiry.
    #[ortho_config(default = 0)]
    pub ttl_ms: u64,
    /// The reserved inheritance filename (`Directory.FILE`). Defaults to `_`.
    #[ortho_config(default = "_".to_owned())]
    pub inheritance_file: String,
    /// Data file extensions recognised for extension-less lookups, in probe
    /// order. Falls back to [`crate::fetch::DATA_EXTNAMES`] when unset; see
    /// [`EngineConfig::data_extnames_or_default`].
    pub data_extnames: Option<Vec<String>>,
    /// Default role assigned to a freshly constructed `AuthContext` when the
    /// caller provides none.
    pub default_role: Option<String>,
    /// Path to a local filesystem root to mount as the primary driver, if
    /// any.
    pub local_root: Option<String>,
    /// Base URL to mount as the primary HTTP driver, if any.
    pub http_base_url: Option<String>,
}

impl EngineConfig {
    /// Loads configuration using the `ortho-config` derive. Values merge
    /// defaults, configuration files, environment variables, and CLI flags in
    /// that order of precedence.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the loader fails to merge sources.
    pub fn load_from_sources() -> Result<Self, ConfigError> {
        Self::load().map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Loads configuration without attempting to parse CLI arguments. Values
    /// still merge defaults, configuration files, and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([std::ffi::OsString::from("nandb")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Returns the configured data extensions, or
    /// [`crate::fetch::DATA_EXTNAMES`] when none were configured.
    #[must_use]
    pub fn data_extnames_or_default(&self) -> Vec<String> {
        self.data_extnames.clone().unwrap_or_else(|| {
            crate::fetch::DATA_EXTNAMES
                .iter()
                .map(|ext| (*ext).to_owned())
                .collect()
        })
    }

    /// Validates that at least one driver root is configured.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when neither `local_root` nor
    /// `http_base_url` is set.
    pub fn validate_has_driver_root(&self) -> Result<(), ConfigError> {
        if self.local_root.is_none() && self.http_base_url.is_none() {
            return Err(ConfigError::MissingField(format!(
                "missing driver root: set NANDB_LOCAL_ROOT or NANDB_HTTP_BASE_URL \
                 (or local_root / http_base_url in [{ENGINE_SECTION}])"
            )));
        }
        Ok(())
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}
