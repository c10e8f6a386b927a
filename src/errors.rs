use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("geocode cache at {path} is unreadable; move it aside or start fresh explicitly: {source}")]
    CacheCorrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to persist geocode cache to {path} after {attempts} attempt(s): {source}")]
    PersistFailure {
        path: PathBuf,
        attempts: u32,
        #[source]
        source: io::Error,
    },
    #[error("projection failed: {0}")]
    Projection(String),
    #[error("{0}")]
    Config(String),
}

/// Outcome classes of a single geocoding lookup.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ResolutionError {
    #[error("geocoder request timed out")]
    Timeout,
    #[error("geocoder unavailable: {0}")]
    Unavailable(String),
    #[error("geocoder returned no match")]
    NoMatch,
    #[error("malformed geocoder exchange: {0}")]
    Malformed(String),
    #[error("gave up after {attempts} attempt(s); last failure: {last}")]
    Exhausted {
        attempts: u32,
        last: Box<ResolutionError>,
    },
}

impl ResolutionError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ResolutionError::Timeout | ResolutionError::Unavailable(_))
    }
}
