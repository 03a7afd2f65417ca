//! Error types for the mapping cache.

use std::fmt;
use std::path::PathBuf;

use crate::table::TableError;

/// Pipeline stage an error originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Config,
    Fetch,
    Persist,
    Load,
    Enrich,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Config => "config",
            Self::Fetch => "fetch",
            Self::Persist => "persist",
            Self::Load => "load",
            Self::Enrich => "enrich",
        };
        f.write_str(name)
    }
}

/// Mapping cache errors.
#[derive(Debug, thiserror::Error)]
pub enum MappingError {
    /// Transport failure talking to the remote origin.
    #[error("fetch failed for {url}: {message}")]
    Fetch { url: String, message: String },

    /// Remote origin answered with a non-success status.
    #[error("remote origin {url} returned HTTP {status}")]
    HttpStatus { url: String, status: u16 },

    /// Remote payload was empty, unparsable or failed normalization.
    #[error("invalid mapping payload from {url}: {source}")]
    InvalidPayload {
        url: String,
        #[source]
        source: TableError,
    },

    /// Writing the mapping to disk failed.
    #[error("failed to persist mapping to {}: {message}", path.display())]
    Persist { path: PathBuf, message: String },

    /// Reading the local mapping or its metadata failed.
    #[error("failed to load mapping from {}: {message}", path.display())]
    Load { path: PathBuf, message: String },

    /// Local file exists but is not a valid mapping.
    #[error("local mapping at {} is corrupt: {source}", path.display())]
    Corrupt {
        path: PathBuf,
        #[source]
        source: TableError,
    },

    /// Local file does not match the digest recorded at persist time.
    #[error("integrity check failed for {}: expected {expected}, got {actual}", path.display())]
    Integrity {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    /// Fetch reported success but the local copy is still absent.
    #[error("mapping still missing at {} after fetch", path.display())]
    MissingAfterFetch { path: PathBuf },

    /// An enrichment provider failed or returned non-conforming records.
    #[error("enrichment provider {provider} failed: {message}")]
    Enrichment { provider: String, message: String },

    /// Two providers contributed the same validator.
    #[error("validator {validator_id} contributed by both {first} and {second}")]
    EnrichmentConflict {
        validator_id: i64,
        first: String,
        second: String,
    },

    /// A provider with the same name is already registered.
    #[error("enrichment provider already registered: {name}")]
    DuplicateProvider { name: String },

    /// Configuration error.
    #[error("configuration error: {message}")]
    Config { message: String },
}

impl MappingError {
    /// Stage the error belongs to.
    pub fn stage(&self) -> Stage {
        match self {
            Self::Config { .. } => Stage::Config,

            Self::Fetch { .. } | Self::HttpStatus { .. } | Self::InvalidPayload { .. } => {
                Stage::Fetch
            }

            Self::Persist { .. } => Stage::Persist,

            Self::Load { .. }
            | Self::Corrupt { .. }
            | Self::Integrity { .. }
            | Self::MissingAfterFetch { .. } => Stage::Load,

            Self::Enrichment { .. }
            | Self::EnrichmentConflict { .. }
            | Self::DuplicateProvider { .. } => Stage::Enrich,
        }
    }

    /// Exit code for CLI hosts.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config { .. } => 1,

            // Remote origin
            Self::Fetch { .. } | Self::HttpStatus { .. } => 2,
            Self::InvalidPayload { .. } => 3,

            // Local storage
            Self::Persist { .. } => 4,
            Self::Load { .. } | Self::MissingAfterFetch { .. } => 5,
            Self::Corrupt { .. } | Self::Integrity { .. } => 6,

            Self::Enrichment { .. }
            | Self::EnrichmentConflict { .. }
            | Self::DuplicateProvider { .. } => 7,
        }
    }

    /// Whether the payload failed because `validator_id` could not be coerced.
    pub fn is_coercion(&self) -> bool {
        match self {
            Self::InvalidPayload { source, .. } | Self::Corrupt { source, .. } => {
                source.is_coercion()
            }
            _ => false,
        }
    }
}

/// Result type for mapping operations.
pub type MappingResult<T> = Result<T, MappingError>;
