use std::path::PathBuf;
use std::time::Duration;
use std::{env, io};

use rand::Rng;
use secrecy::SecretString;
use serde::Serialize;
use tracing::debug;

const DEFAULT_RUN_LOG_MAX_BYTES: u64 = 5 * 1024 * 1024;
const DEFAULT_RUN_LOG_MAX_FILES: usize = 5;
const DEFAULT_NOMINATIM_ENDPOINT: &str = "https://nominatim.openstreetmap.org";
const DEFAULT_GOOGLE_ENDPOINT: &str = "https://maps.googleapis.com";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GeocoderBackend {
    Nominatim,
    Google,
}

impl GeocoderBackend {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "nominatim" | "osm" => Some(Self::Nominatim),
            "google" => Some(Self::Google),
            _ => None,
        }
    }

    fn default_endpoint(&self) -> &'static str {
        match self {
            Self::Nominatim => DEFAULT_NOMINATIM_ENDPOINT,
            Self::Google => DEFAULT_GOOGLE_ENDPOINT,
        }
    }
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub geocoder_backend: GeocoderBackend,
    pub geocoder_endpoint: String,
    pub google_geocoding_api_key: Option<SecretString>,
    pub geocoder_user_agent: String,
    pub geocoder_min_interval_ms: u64,
    pub geocoder_timeout_ms: u64,
    pub geocoder_max_attempts: u32,
    pub geocoder_backoff_base_ms: u64,
    pub geocoder_backoff_jitter_ms: u64,
    pub cache_path: PathBuf,
    pub cache_persist_attempts: u32,
    pub footprint_scale_meters: f64,
    pub run_log_path: Option<PathBuf>,
    pub run_log_max_bytes: u64,
    pub run_log_max_files: usize,
}

#[derive(Clone, Debug, Serialize)]
pub struct PublicAppConfig {
    pub geocoder_backend: GeocoderBackend,
    pub geocoder_endpoint: String,
    pub geocoder_user_agent: String,
    pub geocoder_min_interval_ms: u64,
    pub geocoder_timeout_ms: u64,
    pub geocoder_max_attempts: u32,
    pub geocoder_backoff_base_ms: u64,
    pub cache_path: String,
    pub footprint_scale_meters: f64,
    pub run_log_path: Option<String>,
    pub has_google_api_key: bool,
}

impl AppConfig {
    pub fn from_env() -> Self {
        load_dotenv_if_applicable();
        let geocoder_backend = env::var("GEOCODER_BACKEND")
            .ok()
            .and_then(|v| GeocoderBackend::parse(&v))
            .unwrap_or(GeocoderBackend::Nominatim);
        Self {
            geocoder_backend,
            geocoder_endpoint: env::var("GEOCODER_ENDPOINT")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| geocoder_backend.default_endpoint().to_string()),
            google_geocoding_api_key: env::var("GOOGLE_GEOCODING_API_KEY")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .map(SecretString::from),
            geocoder_user_agent: env::var("GEOCODER_USER_AGENT")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(generate_user_agent),
            geocoder_min_interval_ms: parse_u64("GEOCODER_MIN_INTERVAL_MS", 1_000),
            geocoder_timeout_ms: parse_u64("GEOCODER_TIMEOUT_MS", 30_000).max(1),
            geocoder_max_attempts: parse_u32("GEOCODER_MAX_ATTEMPTS", 3).max(1),
            geocoder_backoff_base_ms: parse_u64("GEOCODER_BACKOFF_BASE_MS", 2_000),
            geocoder_backoff_jitter_ms: parse_u64("GEOCODER_BACKOFF_JITTER_MS", 0),
            cache_path: env::var("GEOCACHE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("geocode-cache.json")),
            cache_persist_attempts: parse_u32("GEOCACHE_PERSIST_ATTEMPTS", 3).max(1),
            footprint_scale_meters: parse_f64("FOOTPRINT_SCALE_METERS", 100.0),
            run_log_path: env::var("RUN_LOG_PATH")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from),
            run_log_max_bytes: parse_u64("RUN_LOG_MAX_BYTES", DEFAULT_RUN_LOG_MAX_BYTES),
            run_log_max_files: parse_usize("RUN_LOG_MAX_FILES", DEFAULT_RUN_LOG_MAX_FILES).max(1),
        }
    }

    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.geocoder_min_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.geocoder_timeout_ms)
    }

    pub fn public_profile(&self) -> PublicAppConfig {
        PublicAppConfig {
            geocoder_backend: self.geocoder_backend,
            geocoder_endpoint: self.geocoder_endpoint.clone(),
            geocoder_user_agent: self.geocoder_user_agent.clone(),
            geocoder_min_interval_ms: self.geocoder_min_interval_ms,
            geocoder_timeout_ms: self.geocoder_timeout_ms,
            geocoder_max_attempts: self.geocoder_max_attempts,
            geocoder_backoff_base_ms: self.geocoder_backoff_base_ms,
            cache_path: self.cache_path.to_string_lossy().to_string(),
            footprint_scale_meters: self.footprint_scale_meters,
            run_log_path: self
                .run_log_path
                .as_ref()
                .map(|p| p.to_string_lossy().to_string()),
            has_google_api_key: self.google_geocoding_api_key.is_some(),
        }
    }
}

/// Nominatim rejects anonymous agents; a per-install suffix keeps runs distinguishable.
fn generate_user_agent() -> String {
    let suffix: u32 = rand::thread_rng().gen_range(100_000..1_000_000);
    format!("site_mapper_{suffix}")
}

fn load_dotenv_if_applicable() {
    if !should_load_dotenv() {
        debug!("skipping .env load outside dev mode");
        return;
    }

    if let Err(err) = dotenvy::dotenv() {
        match &err {
            dotenvy::Error::Io(io_err) if io_err.kind() == io::ErrorKind::NotFound => {}
            _ => debug!(?err, "unable to load .env file"),
        }
    }
}

fn should_load_dotenv() -> bool {
    cfg!(debug_assertions) || parse_bool("ALLOW_DOTENV", false)
}

fn parse_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .map(|v| matches!(v.trim(), "1" | "true" | "TRUE" | "True"))
        .unwrap_or(default)
}

fn parse_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

fn parse_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(default)
}

fn parse_u32(key: &str, default: u32) -> u32 {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<u32>().ok())
        .unwrap_or(default)
}

fn parse_f64(key: &str, default: f64) -> f64 {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite() && *v >= 0.0)
        .unwrap_or(default)
}
