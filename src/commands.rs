use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{info, warn};

use crate::batch::{BatchResolver, ResolutionSummary};
use crate::cache::ResolutionCache;
use crate::config::AppConfig;
use crate::errors::{AppError, AppResult};
use crate::fallback::FallbackResolutionStrategy;
use crate::geocoders::geocoder_from_config;
use crate::ingestion::{read_site_records, write_resolved_rows};
use crate::resolver::RateLimitedResolver;
use crate::spatial::{SpatialDerivation, SpatialWeightDeriver};
use crate::telemetry::RunLog;

#[derive(Debug, Clone, Default)]
pub struct ResolveOptions {
    pub input: PathBuf,
    pub output: PathBuf,
    pub footprints: Option<PathBuf>,
    pub cache: Option<PathBuf>,
    pub retry_unresolved: bool,
    pub fresh_cache: bool,
}

#[derive(Debug, Serialize)]
pub struct ResolveReport {
    pub summary: ResolutionSummary,
    pub footprints: usize,
    pub overlaps: usize,
    pub cache_entries: usize,
    pub quarantined_cache: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CacheStats {
    pub path: String,
    pub entries: usize,
    pub resolved: usize,
    pub unresolved: usize,
}

#[derive(Debug, Serialize)]
struct FootprintDocument {
    scale_factor_m: f64,
    footprints: Vec<FootprintFeature>,
    overlaps: Vec<OverlapFeature>,
    unresolved: Vec<String>,
}

#[derive(Debug, Serialize)]
struct FootprintFeature {
    site_id: String,
    tier: String,
    volume: f64,
    latitude: f64,
    longitude: f64,
    radius_m: f64,
    area_m2: f64,
    /// `[lon, lat]` pairs, closed.
    ring: Vec<[f64; 2]>,
}

#[derive(Debug, Serialize)]
struct OverlapFeature {
    first: String,
    second: String,
    distance_m: f64,
    penetration_m: f64,
}

pub async fn resolve_sites(config: &AppConfig, options: &ResolveOptions) -> AppResult<ResolveReport> {
    let cache_path = options
        .cache
        .clone()
        .unwrap_or_else(|| config.cache_path.clone());
    let (mut cache, quarantined) = open_cache(&cache_path, options.fresh_cache)?;

    let records = read_site_records(BufReader::new(File::open(&options.input)?))?;
    info!(
        input = %options.input.display(),
        records = records.len(),
        "loaded site records"
    );

    let geocoder = geocoder_from_config(config)?;
    let resolver = RateLimitedResolver::from_config(geocoder, config);
    let mut batch = BatchResolver::new(FallbackResolutionStrategy::new(resolver), &cache_path)
        .with_persist_attempts(config.cache_persist_attempts);
    let (dataset, summary) = if options.retry_unresolved {
        batch.re_resolve_unresolved(&mut cache, &records).await?
    } else {
        batch.resolve_batch(&mut cache, &records).await?
    };

    write_resolved_rows(BufWriter::new(File::create(&options.output)?), &dataset)?;

    let deriver = SpatialWeightDeriver::new(config.footprint_scale_meters);
    let derivation = deriver.derive(&dataset)?;
    if let Some(path) = &options.footprints {
        write_footprints(path, &deriver, &derivation)?;
    }

    if let Some(run_log) = RunLog::from_config(config)? {
        if let Err(err) = run_log.record_batch(&summary, cache.len()) {
            warn!(?err, "failed to append run log entry");
        }
    }

    Ok(ResolveReport {
        footprints: derivation.footprints.len(),
        overlaps: derivation.overlaps.len(),
        cache_entries: cache.len(),
        quarantined_cache: quarantined.map(|p| p.to_string_lossy().to_string()),
        summary,
    })
}

pub fn cache_stats(path: &Path) -> AppResult<CacheStats> {
    let cache = ResolutionCache::load(path)?;
    Ok(CacheStats {
        path: path.to_string_lossy().to_string(),
        entries: cache.len(),
        resolved: cache.resolved_count(),
        unresolved: cache.len() - cache.resolved_count(),
    })
}

pub fn list_unresolved(path: &Path) -> AppResult<Vec<String>> {
    let cache = ResolutionCache::load(path)?;
    Ok(cache
        .unresolved_keys()
        .into_iter()
        .map(str::to_string)
        .collect())
}

/// `fresh` only takes effect when the existing cache is unreadable.
fn open_cache(path: &Path, fresh: bool) -> AppResult<(ResolutionCache, Option<PathBuf>)> {
    match ResolutionCache::load(path) {
        Ok(cache) => Ok((cache, None)),
        Err(AppError::CacheCorrupt { .. }) if fresh => {
            let moved = ResolutionCache::quarantine(path)?;
            Ok((ResolutionCache::new(), moved))
        }
        Err(err) => Err(err),
    }
}

fn write_footprints(
    path: &Path,
    deriver: &SpatialWeightDeriver,
    derivation: &SpatialDerivation,
) -> AppResult<()> {
    let mut footprints = Vec::with_capacity(derivation.footprints.len());
    for footprint in &derivation.footprints {
        let ring = footprint
            .geographic_ring()?
            .into_iter()
            .map(|c| [c.lon, c.lat])
            .collect();
        footprints.push(FootprintFeature {
            site_id: footprint.site_id.clone(),
            tier: footprint.tier.label().to_string(),
            volume: footprint.volume,
            latitude: footprint.center.lat,
            longitude: footprint.center.lon,
            radius_m: footprint.radius_m,
            area_m2: footprint.area_m2(),
            ring,
        });
    }

    let document = FootprintDocument {
        scale_factor_m: deriver.scale_factor(),
        footprints,
        overlaps: derivation
            .overlaps
            .iter()
            .map(|pair| OverlapFeature {
                first: pair.first.clone(),
                second: pair.second.clone(),
                distance_m: pair.distance_m,
                penetration_m: pair.penetration_m,
            })
            .collect(),
        unresolved: derivation.unresolved.clone(),
    };
    serde_json::to_writer_pretty(BufWriter::new(File::create(path)?), &document)?;
    Ok(())
}
