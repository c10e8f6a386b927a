pub mod address;
pub mod batch;
pub mod cache;
pub mod cli;
mod commands;
pub mod config;
pub mod errors;
pub mod fallback;
pub mod geocoders;
pub mod ingestion;
pub mod resolver;
pub mod spatial;
pub mod telemetry;

use once_cell::sync::OnceCell;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub use address::{normalize, AddressKey, KeyVariant, NormalizedKeys, SiteRecord, SiteTier};
pub use batch::{BatchResolver, ResolutionSummary, ResolvedDataset, ResolvedSite};
pub use cache::{CacheEntry, Coordinate, ResolutionCache, ResolvedCoordinate};
pub use commands::{cache_stats, list_unresolved, resolve_sites, CacheStats, ResolveOptions, ResolveReport};
pub use config::{AppConfig, GeocoderBackend, PublicAppConfig};
pub use errors::{AppError, AppResult, ResolutionError};
pub use fallback::{FallbackResolutionStrategy, Resolution, ResolutionSource};
pub use geocoders::{geocoder_from_config, GoogleGeocodingClient, NominatimClient};
pub use resolver::{Clock, Geocoder, RateLimitedResolver, RateLimiter, RetryPolicy, TokioClock};
pub use spatial::{OverlapPair, Projection, SpatialDerivation, SpatialFootprint, SpatialWeightDeriver};
pub use telemetry::RunLog;

pub fn init_tracing() {
    static INIT: OnceCell<()> = OnceCell::new();
    let _ = INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("info,site_geocache=debug"));
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    });
}
