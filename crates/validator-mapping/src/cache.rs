//! Local cache for the validator mapping.
//!
//! Serves the mapping from a persisted parquet file, downloading it from the
//! remote origin on a cache miss.
//!
//! # Cache Structure
//!
//! ```text
//! <dir>/
//!   validator_mapping.parquet            # Mapping table
//!   validator_mapping.parquet.meta.json  # Integrity metadata
//! ```

use std::future::Future;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, info, warn};

use crate::client::MappingClient;
use crate::digest::sha256_hex_bytes;
use crate::error::{MappingError, MappingResult};
use crate::table::{TableError, ValidatorMapping};
use crate::types::MappingConfig;

mod io;
mod sidecar;

/// Sidecar schema version.
pub const CACHE_FORMAT_VERSION: u32 = 1;

const META_SUFFIX: &str = ".meta.json";

/// Integrity metadata stored next to the mapping file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheMeta {
    pub format_version: u32,

    /// When the file was written.
    pub fetched_at: DateTime<Utc>,

    /// Digest of the file bytes (sha256:...).
    pub digest: String,

    pub row_count: usize,

    /// Origin URL or builder marker.
    #[serde(default)]
    pub source: Option<String>,
}

/// Ensures a validator mapping is available locally.
#[derive(Debug, Clone)]
pub struct MappingCache {
    config: MappingConfig,
    client: MappingClient,
}

impl MappingCache {
    pub fn new(config: MappingConfig) -> MappingResult<Self> {
        config.validate()?;
        let client = MappingClient::new(&config)?;
        Ok(Self { config, client })
    }

    pub fn from_env() -> MappingResult<Self> {
        Self::new(MappingConfig::from_env())
    }

    pub fn config(&self) -> &MappingConfig {
        &self.config
    }

    /// Local mapping file.
    pub fn path(&self) -> &Path {
        &self.config.path
    }

    /// Integrity sidecar file.
    pub fn metadata_path(&self) -> PathBuf {
        io::with_suffix(&self.config.path, META_SUFFIX)
    }

    /// Return the mapping, fetching and persisting it first on a cache miss.
    ///
    /// The local read is retried exactly once after a fetch.
    pub async fn load(&self) -> MappingResult<ValidatorMapping> {
        self.load_with(|| self.fetch_and_persist()).await
    }

    async fn load_with<F, Fut>(&self, fetch: F) -> MappingResult<ValidatorMapping>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = MappingResult<()>>,
    {
        if let Some(mapping) = self.load_local().await? {
            return Ok(mapping);
        }

        warn!(path = %self.path().display(), "no validator mapping found locally");
        fetch().await?;
        self.reload_after_fetch().await
    }

    /// Read back what a successful fetch just wrote.
    ///
    /// The file can be removed between the write and this read. That ends
    /// the load with an error instead of fetching again.
    async fn reload_after_fetch(&self) -> MappingResult<ValidatorMapping> {
        self.load_local()
            .await?
            .ok_or_else(|| MappingError::MissingAfterFetch {
                path: self.path().to_path_buf(),
            })
    }

    /// Read the persisted mapping; `None` on a cache miss.
    pub async fn load_local(&self) -> MappingResult<Option<ValidatorMapping>> {
        let path = self.path();

        let exists = fs::try_exists(path).await.map_err(|e| MappingError::Load {
            path: path.to_path_buf(),
            message: format!("failed to stat mapping file: {}", e),
        })?;
        if !exists {
            debug!(path = %path.display(), "mapping not in cache");
            return Ok(None);
        }

        let bytes = fs::read(path).await.map_err(|e| MappingError::Load {
            path: path.to_path_buf(),
            message: format!("failed to read mapping file: {}", e),
        })?;

        if self.config.verify_integrity {
            self.verify_integrity(&bytes).await?;
        }

        let mapping =
            ValidatorMapping::from_parquet(Bytes::from(bytes)).map_err(|source| {
                MappingError::Corrupt {
                    path: path.to_path_buf(),
                    source,
                }
            })?;

        debug!(path = %path.display(), rows = mapping.num_rows(), "cache hit");
        Ok(Some(mapping))
    }

    /// Download the mapping from the remote origin and persist it locally.
    ///
    /// Nothing is written unless the payload decodes into a non-empty mapping.
    pub async fn fetch_and_persist(&self) -> MappingResult<()> {
        let url = self.client.url().to_string();
        let body = self.client.fetch_snapshot().await?;

        let mapping = ValidatorMapping::from_parquet(body).map_err(|source| {
            MappingError::InvalidPayload {
                url: url.clone(),
                source,
            }
        })?;
        if mapping.is_empty() {
            return Err(MappingError::InvalidPayload {
                url,
                source: TableError::EmptyTable,
            });
        }

        let meta = self.persist(&mapping, &url).await?;
        info!(
            path = %self.path().display(),
            rows = meta.row_count,
            digest = %meta.digest,
            "validator mapping downloaded and stored"
        );
        Ok(())
    }

    /// Fetch a fresh copy, replacing the persisted one wholesale.
    ///
    /// The existing file stays in place if the fetch fails.
    pub async fn refresh(&self) -> MappingResult<ValidatorMapping> {
        self.fetch_and_persist().await?;
        self.reload_after_fetch().await
    }

    /// Write a mapping and its integrity sidecar.
    ///
    /// The previous sidecar is removed before the table is replaced, so an
    /// interrupted write leaves a table without metadata (accepted with a
    /// warning on load) rather than one paired with a stale digest.
    pub async fn persist(
        &self,
        mapping: &ValidatorMapping,
        source: &str,
    ) -> MappingResult<CacheMeta> {
        let path = self.path();
        let encoded = mapping.to_parquet().map_err(|e| MappingError::Persist {
            path: path.to_path_buf(),
            message: format!("failed to encode parquet: {}", e),
        })?;

        let meta = CacheMeta {
            format_version: CACHE_FORMAT_VERSION,
            fetched_at: Utc::now(),
            digest: sha256_hex_bytes(&encoded),
            row_count: mapping.num_rows(),
            source: Some(source.to_string()),
        };

        let meta_path = self.metadata_path();
        io::remove_if_exists(&meta_path).await?;
        io::write_atomic(path, &encoded).await?;
        sidecar::write_meta(&meta_path, &meta).await?;

        debug!(path = %path.display(), rows = meta.row_count, "persisted mapping");
        Ok(meta)
    }

    /// Sidecar metadata, if present and readable.
    pub async fn get_metadata(&self) -> Option<CacheMeta> {
        sidecar::read_meta(&self.metadata_path()).await.ok().flatten()
    }

    pub async fn is_cached(&self) -> bool {
        fs::try_exists(self.path()).await.unwrap_or(false)
    }

    /// Remove the persisted mapping and its sidecar.
    pub async fn evict(&self) -> MappingResult<()> {
        io::remove_if_exists(self.path()).await?;
        io::remove_if_exists(&self.metadata_path()).await?;
        debug!(path = %self.path().display(), "evicted mapping");
        Ok(())
    }

    async fn verify_integrity(&self, bytes: &[u8]) -> MappingResult<()> {
        let meta_path = self.metadata_path();
        let Some(meta) = sidecar::read_meta(&meta_path).await? else {
            warn!(
                path = %self.path().display(),
                "no cache metadata found, integrity not verified"
            );
            return Ok(());
        };

        let actual = sha256_hex_bytes(bytes);
        if actual != meta.digest {
            warn!(
                path = %self.path().display(),
                expected = %meta.digest,
                actual = %actual,
                "cache integrity check failed"
            );
            return Err(MappingError::Integrity {
                path: self.path().to_path_buf(),
                expected: meta.digest,
                actual,
            });
        }

        Ok(())
    }
}
