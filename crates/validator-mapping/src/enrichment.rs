//! Enrichment providers.
//!
//! A provider contributes validator records that the
//! [`MappingBuilder`](crate::builder::MappingBuilder) folds into the base
//! mapping. Records must conform to the mapping schema; see
//! [`ValidatorMapping::conform`].
//!
//! The standard set registers one provider per staking service. None of them
//! has a record source yet, so each contributes nothing.

use std::fmt;
use std::sync::Arc;

use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use tracing::debug;

use crate::error::{MappingError, MappingResult};
use crate::table::ValidatorMapping;

/// Records contributed by one provider.
pub type EnrichmentRecords = Vec<RecordBatch>;

#[async_trait]
pub trait EnrichmentProvider: Send + Sync {
    /// Unique provider name.
    fn name(&self) -> &str;

    /// Records to merge into `mapping`.
    async fn fetch_records(&self, mapping: &ValidatorMapping) -> MappingResult<EnrichmentRecords>;
}

macro_rules! inert_provider {
    ($(#[$doc:meta])* $ty:ident, $name:literal) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, Default)]
        pub struct $ty;

        impl $ty {
            pub const NAME: &'static str = $name;
        }

        #[async_trait]
        impl EnrichmentProvider for $ty {
            fn name(&self) -> &str {
                Self::NAME
            }

            async fn fetch_records(
                &self,
                mapping: &ValidatorMapping,
            ) -> MappingResult<EnrichmentRecords> {
                debug!(
                    provider = Self::NAME,
                    base_rows = mapping.num_rows(),
                    "no record source configured"
                );
                Ok(Vec::new())
            }
        }
    };
}

inert_provider!(
    /// Coinbase staking validators.
    CoinbaseProvider,
    "coinbase"
);
inert_provider!(
    /// Kiln staking validators.
    KilnProvider,
    "kiln"
);
inert_provider!(
    /// Binance staking validators.
    BinanceProvider,
    "binance"
);
inert_provider!(
    /// Rocket Pool minipool validators.
    RocketPoolProvider,
    "rocketpool"
);

/// Named collection of enrichment providers.
#[derive(Clone, Default)]
pub struct ProviderSet {
    providers: Vec<Arc<dyn EnrichmentProvider>>,
}

impl ProviderSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Coinbase, Kiln, Binance and Rocket Pool.
    pub fn standard() -> Self {
        Self {
            providers: vec![
                Arc::new(CoinbaseProvider),
                Arc::new(KilnProvider),
                Arc::new(BinanceProvider),
                Arc::new(RocketPoolProvider),
            ],
        }
    }

    /// Add a provider; names must be unique.
    pub fn register(&mut self, provider: Arc<dyn EnrichmentProvider>) -> MappingResult<()> {
        if self.get(provider.name()).is_some() {
            return Err(MappingError::DuplicateProvider {
                name: provider.name().to_string(),
            });
        }
        self.providers.push(provider);
        Ok(())
    }

    pub fn with_provider(mut self, provider: Arc<dyn EnrichmentProvider>) -> MappingResult<Self> {
        self.register(provider)?;
        Ok(self)
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn EnrichmentProvider>> {
        self.providers.iter().find(|p| p.name() == name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.name()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn EnrichmentProvider>> {
        self.providers.iter()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

impl fmt::Debug for ProviderSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderSet")
            .field("providers", &self.names())
            .finish()
    }
}
