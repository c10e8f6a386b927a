use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{info, warn};

use crate::address::{normalize, SiteRecord};
use crate::cache::{ResolutionCache, ResolvedCoordinate};
use crate::errors::{AppError, AppResult};
use crate::fallback::{FallbackResolutionStrategy, Resolution, ResolutionSource};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResolutionSummary {
    pub total: usize,
    pub precise: usize,
    pub degraded: usize,
    pub cache_hit: usize,
    pub unresolved: usize,
    pub external_calls: usize,
}

impl ResolutionSummary {
    fn record(&mut self, resolution: &Resolution) {
        self.total += 1;
        self.external_calls += resolution.external_calls as usize;
        match resolution.source {
            ResolutionSource::Cache => self.cache_hit += 1,
            ResolutionSource::Precise => self.precise += 1,
            ResolutionSource::Degraded => self.degraded += 1,
            ResolutionSource::Unresolved => self.unresolved += 1,
        }
    }

    pub fn resolved(&self) -> usize {
        self.total - self.unresolved
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedSite {
    pub record: SiteRecord,
    pub resolution: Resolution,
}

impl ResolvedSite {
    pub fn coordinate(&self) -> ResolvedCoordinate {
        self.resolution.coordinate
    }
}

/// One entry per input record, in input order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResolvedDataset {
    pub sites: Vec<ResolvedSite>,
}

impl ResolvedDataset {
    pub fn coordinates(&self) -> Vec<ResolvedCoordinate> {
        self.sites.iter().map(ResolvedSite::coordinate).collect()
    }

    pub fn len(&self) -> usize {
        self.sites.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }
}

pub struct BatchResolver {
    strategy: FallbackResolutionStrategy,
    cache_path: PathBuf,
    persist_attempts: u32,
}

impl BatchResolver {
    pub fn new(strategy: FallbackResolutionStrategy, cache_path: impl Into<PathBuf>) -> Self {
        Self {
            strategy,
            cache_path: cache_path.into(),
            persist_attempts: 3,
        }
    }

    pub fn with_persist_attempts(mut self, attempts: u32) -> Self {
        self.persist_attempts = attempts.max(1);
        self
    }

    /// Resolves records sequentially, then persists the cache once.
    pub async fn resolve_batch(
        &mut self,
        cache: &mut ResolutionCache,
        records: &[SiteRecord],
    ) -> AppResult<(ResolvedDataset, ResolutionSummary)> {
        let mut summary = ResolutionSummary::default();
        let mut sites = Vec::with_capacity(records.len());
        for record in records {
            let resolution = self.strategy.resolve_with_fallback(cache, record).await;
            summary.record(&resolution);
            sites.push(ResolvedSite {
                record: record.clone(),
                resolution,
            });
        }

        self.persist(cache)?;
        info!(
            total = summary.total,
            precise = summary.precise,
            degraded = summary.degraded,
            cache_hit = summary.cache_hit,
            unresolved = summary.unresolved,
            external_calls = summary.external_calls,
            "batch resolution completed"
        );
        Ok((ResolvedDataset { sites }, summary))
    }

    /// Clears the `Unresolved` markers of `records` and resolves them again.
    pub async fn re_resolve_unresolved(
        &mut self,
        cache: &mut ResolutionCache,
        records: &[SiteRecord],
    ) -> AppResult<(ResolvedDataset, ResolutionSummary)> {
        let evicted = records
            .iter()
            .filter(|record| cache.evict_unresolved(&normalize(record).precise))
            .count();
        info!(evicted, "cleared unresolved markers before re-resolution");
        self.resolve_batch(cache, records).await
    }

    fn persist(&self, cache: &ResolutionCache) -> AppResult<()> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match cache.persist(&self.cache_path) {
                Ok(()) => return Ok(()),
                Err(err) if attempt < self.persist_attempts => {
                    warn!(
                        ?err,
                        attempt,
                        path = %self.cache_path.display(),
                        "cache persist failed; retrying"
                    );
                }
                Err(source) => {
                    return Err(AppError::PersistFailure {
                        path: self.cache_path.clone(),
                        attempts: attempt,
                        source,
                    })
                }
            }
        }
    }
}
