use std::collections::HashSet;

use serde::Serialize;
use tracing::{debug, trace};

use crate::address::{normalize, KeyVariant, SiteRecord};
use crate::cache::{ResolutionCache, ResolvedCoordinate};
use crate::resolver::RateLimitedResolver;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionSource {
    /// Answered from the cache without any external call.
    Cache,
    Precise,
    Degraded,
    Unresolved,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Resolution {
    pub coordinate: ResolvedCoordinate,
    pub source: ResolutionSource,
    /// Key tier that produced the coordinate, if any.
    pub precision: Option<KeyVariant>,
    pub external_calls: u32,
}

impl Resolution {
    fn new(
        coordinate: ResolvedCoordinate,
        precision: Option<KeyVariant>,
        external_calls: u32,
    ) -> Self {
        let source = match (coordinate.is_resolved(), precision) {
            (false, _) | (true, None) => ResolutionSource::Unresolved,
            (true, Some(_)) if external_calls == 0 => ResolutionSource::Cache,
            (true, Some(KeyVariant::Precise)) => ResolutionSource::Precise,
            (true, Some(KeyVariant::Degraded)) => ResolutionSource::Degraded,
        };
        Self {
            coordinate,
            source,
            precision: if coordinate.is_resolved() { precision } else { None },
            external_calls,
        }
    }
}

/// Precise key first, city+country key second, `Unresolved` marker last.
pub struct FallbackResolutionStrategy {
    resolver: RateLimitedResolver,
    failed_precise: HashSet<String>,
}

impl FallbackResolutionStrategy {
    pub fn new(resolver: RateLimitedResolver) -> Self {
        Self {
            resolver,
            failed_precise: HashSet::new(),
        }
    }

    pub async fn resolve_with_fallback(
        &mut self,
        cache: &mut ResolutionCache,
        record: &SiteRecord,
    ) -> Resolution {
        let keys = normalize(record);
        let mut external_calls = 0;

        if let Some(hit) = cache.lookup(&keys.precise) {
            trace!(site_id = %record.site_id, key = %keys.precise, "precise cache hit");
            return Resolution::new(hit, Some(KeyVariant::Precise), 0);
        }

        // a precise key that already failed in this run is not sent again
        if !self.failed_precise.contains(keys.precise.as_str()) {
            external_calls += 1;
            match self.resolver.resolve(&keys.precise).await {
                Ok(coordinate) => {
                    cache.insert(&keys.precise, coordinate.into());
                    return Resolution::new(
                        coordinate.into(),
                        Some(KeyVariant::Precise),
                        external_calls,
                    );
                }
                Err(err) => {
                    debug!(
                        site_id = %record.site_id,
                        key = %keys.precise,
                        %err,
                        "precise lookup failed; degrading"
                    );
                    self.failed_precise.insert(keys.precise.as_str().to_string());
                }
            }
        }

        if let Some(hit) = cache.lookup(&keys.degraded) {
            trace!(site_id = %record.site_id, key = %keys.degraded, "degraded cache hit");
            return Resolution::new(hit, Some(KeyVariant::Degraded), external_calls);
        }

        external_calls += 1;
        match self.resolver.resolve(&keys.degraded).await {
            Ok(coordinate) => {
                cache.insert(&keys.degraded, coordinate.into());
                Resolution::new(coordinate.into(), Some(KeyVariant::Degraded), external_calls)
            }
            Err(err) => {
                debug!(
                    site_id = %record.site_id,
                    key = %keys.degraded,
                    %err,
                    "degraded lookup failed; marking unresolved"
                );
                cache.insert(&keys.precise, ResolvedCoordinate::Unresolved);
                Resolution::new(ResolvedCoordinate::Unresolved, None, external_calls)
            }
        }
    }
}
