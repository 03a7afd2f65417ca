//! Validator identity mapping cache.
//!
//! This crate keeps a local copy of the public validator mapping table
//! (validator id → validator metadata), providing:
//!
//! - Load-through cache: serve the local parquet file, download it on a miss
//! - `validator_id` normalization to 64-bit integers on ingestion
//! - Atomic writes with an integrity sidecar
//! - A builder that folds records from enrichment providers into the mapping
//!
//! # Quick Start
//!
//! ```no_run
//! use validator_mapping::{MappingCache, MappingConfig};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let cache = MappingCache::new(MappingConfig::default().with_path("data/validators.parquet"))?;
//!
//! // Downloads the snapshot on first use, then reads the local copy.
//! let mapping = cache.load().await?;
//! println!("{} validators", mapping.num_rows());
//! # Ok(())
//! # }
//! ```
//!
//! # Configuration
//!
//! | Environment Variable | Description |
//! |---------------------|-------------|
//! | `VALIDATOR_MAPPING_URL` | Remote origin (default: public `validator_data.parquet.gzip` snapshot) |
//! | `VALIDATOR_MAPPING_PATH` | Local file (default: `./validator_mapping.parquet`) |
//! | `VALIDATOR_MAPPING_TIMEOUT` | Request timeout in seconds (default: 120) |
//! | `VALIDATOR_MAPPING_VERIFY` | Verify the integrity sidecar on load (default: true) |

pub mod builder;
pub mod cache;
pub mod client;
mod digest;
pub mod enrichment;
pub mod error;
pub mod table;
pub mod types;

pub use builder::{BuildReport, MappingBuilder, ProviderContribution, BUILDER_SOURCE};
pub use cache::{CacheMeta, MappingCache, CACHE_FORMAT_VERSION};
pub use client::{MappingClient, MAPPING_USER_AGENT};
pub use enrichment::{
    BinanceProvider, CoinbaseProvider, EnrichmentProvider, EnrichmentRecords, KilnProvider,
    ProviderSet, RocketPoolProvider,
};
pub use error::{MappingError, MappingResult, Stage};
pub use table::{TableError, ValidatorMapping, VALIDATOR_ID_COLUMN};
pub use types::{MappingConfig, DEFAULT_MAPPING_PATH, DEFAULT_MAPPING_URL};
