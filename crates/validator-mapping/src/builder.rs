//! Folds enrichment provider records into the cached mapping.
//!
//! Merge rules:
//! - a provider row replaces the base row with the same `validator_id`
//! - a new `validator_id` is appended
//! - two providers contributing the same `validator_id` is an error, so the
//!   result does not depend on provider order
//!
//! The merged mapping is written back through [`MappingCache::persist`] only
//! when at least one provider contributed rows.

use std::collections::HashMap;
use std::sync::Arc;

use arrow::compute::concat_batches;
use tracing::{debug, info};

use crate::cache::MappingCache;
use crate::enrichment::{EnrichmentProvider, ProviderSet};
use crate::error::{MappingError, MappingResult};
use crate::table::ValidatorMapping;

/// Source marker recorded in the cache metadata for built mappings.
pub const BUILDER_SOURCE: &str = "mapping-builder";

/// Rows one provider contributed to a build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderContribution {
    pub provider: String,
    pub rows: usize,
}

/// Outcome of a build.
#[derive(Debug, Clone)]
pub struct BuildReport {
    pub mapping: ValidatorMapping,
    pub contributions: Vec<ProviderContribution>,
    /// Whether the merged mapping was written back to the cache.
    pub persisted: bool,
}

impl BuildReport {
    pub fn total_rows_contributed(&self) -> usize {
        self.contributions.iter().map(|c| c.rows).sum()
    }
}

/// Merges provider records into the cached mapping.
#[derive(Debug, Clone)]
pub struct MappingBuilder {
    cache: MappingCache,
    providers: ProviderSet,
}

impl MappingBuilder {
    pub fn new(cache: MappingCache, providers: ProviderSet) -> Self {
        Self { cache, providers }
    }

    /// Builder over the standard provider set.
    pub fn standard(cache: MappingCache) -> Self {
        Self::new(cache, ProviderSet::standard())
    }

    pub fn cache(&self) -> &MappingCache {
        &self.cache
    }

    pub fn providers(&self) -> &ProviderSet {
        &self.providers
    }

    /// Run every registered provider.
    pub async fn build(&self) -> MappingResult<BuildReport> {
        self.run(self.providers.iter().cloned().collect()).await
    }

    /// Run a single provider by name.
    pub async fn enrich_with(&self, name: &str) -> MappingResult<BuildReport> {
        let provider = self
            .providers
            .get(name)
            .cloned()
            .ok_or_else(|| MappingError::Config {
                message: format!("unknown enrichment provider: {}", name),
            })?;
        self.run(vec![provider]).await
    }

    async fn run(
        &self,
        providers: Vec<Arc<dyn EnrichmentProvider>>,
    ) -> MappingResult<BuildReport> {
        let base = self.cache.load().await?;

        let mut owners: HashMap<i64, String> = HashMap::new();
        let mut contributions = Vec::with_capacity(providers.len());
        let mut merged = base.clone();

        for provider in &providers {
            let name = provider.name().to_string();
            let rows = collect_rows(provider.as_ref(), &base).await?;
            let count = rows.as_ref().map_or(0, ValidatorMapping::num_rows);
            debug!(provider = %name, rows = count, "provider records collected");

            if let Some(rows) = rows {
                for validator_id in rows.validator_ids() {
                    if let Some(first) = owners.insert(validator_id, name.clone()) {
                        return Err(MappingError::EnrichmentConflict {
                            validator_id,
                            first,
                            second: name,
                        });
                    }
                }
                merged = merged.upsert(&rows).map_err(|e| MappingError::Enrichment {
                    provider: name.clone(),
                    message: e.to_string(),
                })?;
            }

            contributions.push(ProviderContribution {
                provider: name,
                rows: count,
            });
        }

        let total: usize = contributions.iter().map(|c| c.rows).sum();
        if total == 0 {
            debug!(
                providers = providers.len(),
                "no enrichment records, mapping unchanged"
            );
            return Ok(BuildReport {
                mapping: base,
                contributions,
                persisted: false,
            });
        }

        self.cache.persist(&merged, BUILDER_SOURCE).await?;
        info!(
            path = %self.cache.path().display(),
            rows = merged.num_rows(),
            contributed = total,
            "validator mapping enriched and stored"
        );

        Ok(BuildReport {
            mapping: merged,
            contributions,
            persisted: true,
        })
    }
}

/// Conform and combine one provider's record batches.
async fn collect_rows(
    provider: &dyn EnrichmentProvider,
    base: &ValidatorMapping,
) -> MappingResult<Option<ValidatorMapping>> {
    let name = provider.name();
    let enrichment_error = |message: String| MappingError::Enrichment {
        provider: name.to_string(),
        message,
    };

    let records = provider
        .fetch_records(base)
        .await
        .map_err(|e| enrichment_error(e.to_string()))?;
    let parts = records
        .into_iter()
        .filter(|batch| batch.num_rows() > 0)
        .map(|batch| base.conform(batch).map(ValidatorMapping::into_record_batch))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| enrichment_error(e.to_string()))?;

    if parts.is_empty() {
        return Ok(None);
    }

    let combined =
        concat_batches(&base.schema(), &parts).map_err(|e| enrichment_error(e.to_string()))?;
    ValidatorMapping::from_record_batch(combined)
        .map(Some)
        .map_err(|e| enrichment_error(e.to_string()))
}
