//! Configuration types.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{MappingError, MappingResult};

/// Public snapshot of the validator mapping.
pub const DEFAULT_MAPPING_URL: &str =
    "https://storage.googleapis.com/public_eth_data/openethdata/validator_data.parquet.gzip";

/// Local file name, relative to the working directory.
pub const DEFAULT_MAPPING_PATH: &str = "validator_mapping.parquet";

/// Mapping cache configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingConfig {
    /// Remote origin serving the parquet snapshot.
    #[serde(default = "default_mapping_url")]
    pub url: String,

    /// Local persisted file.
    #[serde(default = "default_mapping_path")]
    pub path: PathBuf,

    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Verify the integrity sidecar when loading.
    #[serde(default = "default_verify_integrity")]
    pub verify_integrity: bool,
}

fn default_mapping_url() -> String {
    DEFAULT_MAPPING_URL.to_string()
}

fn default_mapping_path() -> PathBuf {
    PathBuf::from(DEFAULT_MAPPING_PATH)
}

fn default_timeout() -> u64 {
    120
}

fn default_verify_integrity() -> bool {
    true
}

impl Default for MappingConfig {
    fn default() -> Self {
        Self {
            url: default_mapping_url(),
            path: default_mapping_path(),
            timeout_secs: default_timeout(),
            verify_integrity: default_verify_integrity(),
        }
    }
}

impl MappingConfig {
    /// Create config from environment variables.
    ///
    /// | Variable | Description |
    /// |----------|-------------|
    /// | `VALIDATOR_MAPPING_URL` | Remote origin URL |
    /// | `VALIDATOR_MAPPING_PATH` | Local persisted file |
    /// | `VALIDATOR_MAPPING_TIMEOUT` | Request timeout in seconds |
    /// | `VALIDATOR_MAPPING_VERIFY` | Verify integrity sidecar (`0`/`false` disables) |
    pub fn from_env() -> Self {
        Self {
            url: std::env::var("VALIDATOR_MAPPING_URL").unwrap_or_else(|_| default_mapping_url()),
            path: std::env::var_os("VALIDATOR_MAPPING_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(default_mapping_path),
            timeout_secs: std::env::var("VALIDATOR_MAPPING_TIMEOUT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_timeout),
            verify_integrity: std::env::var("VALIDATOR_MAPPING_VERIFY")
                .map(|v| !(v == "0" || v.eq_ignore_ascii_case("false")))
                .unwrap_or_else(|_| default_verify_integrity()),
        }
    }

    /// Set the remote origin.
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    /// Set the local persisted file.
    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = path.into();
        self
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    pub fn with_verify_integrity(mut self, verify: bool) -> Self {
        self.verify_integrity = verify;
        self
    }

    /// Reject configurations that cannot work.
    pub fn validate(&self) -> MappingResult<()> {
        let parsed = url::Url::parse(&self.url).map_err(|e| MappingError::Config {
            message: format!("invalid mapping url {:?}: {}", self.url, e),
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(MappingError::Config {
                message: format!("unsupported url scheme: {}", parsed.scheme()),
            });
        }

        if self.path.as_os_str().is_empty() {
            return Err(MappingError::Config {
                message: "mapping path is empty".to_string(),
            });
        }

        if self.timeout_secs == 0 {
            return Err(MappingError::Config {
                message: "timeout must be greater than zero".to_string(),
            });
        }

        Ok(())
    }
}
