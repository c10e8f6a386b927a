use std::collections::HashMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::address::AddressKey;
use crate::errors::{AppError, AppResult};

const CACHE_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lat: f64,
    pub lon: f64,
}

impl Coordinate {
    /// Returns `None` for non-finite or out-of-range values.
    pub fn new(lat: f64, lon: f64) -> Option<Self> {
        let valid = lat.is_finite()
            && lon.is_finite()
            && (-90.0..=90.0).contains(&lat)
            && (-180.0..=180.0).contains(&lon);
        valid.then_some(Self { lat, lon })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ResolvedCoordinate {
    Resolved(Coordinate),
    Unresolved,
}

impl ResolvedCoordinate {
    pub fn coordinate(&self) -> Option<Coordinate> {
        match self {
            ResolvedCoordinate::Resolved(coordinate) => Some(*coordinate),
            ResolvedCoordinate::Unresolved => None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, ResolvedCoordinate::Resolved(_))
    }
}

impl From<Coordinate> for ResolvedCoordinate {
    fn from(value: Coordinate) -> Self {
        ResolvedCoordinate::Resolved(value)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    #[serde(flatten)]
    pub coordinate: ResolvedCoordinate,
    pub resolved_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
struct CacheFile {
    #[serde(default = "default_schema_version")]
    version: u32,
    #[serde(default)]
    entries: HashMap<String, CacheEntry>,
}

fn default_schema_version() -> u32 {
    CACHE_SCHEMA_VERSION
}

/// Durable mapping from canonical address key to its resolution.
///
/// Keys arrive already normalized; the cache compares them byte for byte.
#[derive(Debug, Default, Clone)]
pub struct ResolutionCache {
    entries: HashMap<String, CacheEntry>,
}

impl ResolutionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Missing file yields an empty cache; unreadable contents are an error.
    pub fn load(path: &Path) -> AppResult<Self> {
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                info!(
                    target: "geocache",
                    path = %path.display(),
                    "no cache file yet; starting empty"
                );
                return Ok(Self::new());
            }
            Err(err) => return Err(AppError::Io(err)),
        };

        let file: CacheFile =
            serde_json::from_str(&contents).map_err(|source| AppError::CacheCorrupt {
                path: path.to_path_buf(),
                source,
            })?;
        if file.version > CACHE_SCHEMA_VERSION {
            debug!(
                target: "geocache",
                version = file.version,
                "cache written by a newer schema; unknown fields ignored"
            );
        }
        info!(
            target: "geocache",
            path = %path.display(),
            entries = file.entries.len(),
            "geocode cache loaded"
        );
        Ok(Self {
            entries: file.entries,
        })
    }

    pub fn quarantine(path: &Path) -> AppResult<Option<PathBuf>> {
        if !path.exists() {
            return Ok(None);
        }
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| "geocode-cache.json".into());
        let target = path.with_file_name(format!(
            "{file_name}.corrupt-{}",
            Utc::now().format("%Y%m%d%H%M%S")
        ));
        fs::rename(path, &target)?;
        warn!(
            target: "geocache",
            from = %path.display(),
            to = %target.display(),
            "moved unreadable cache aside"
        );
        Ok(Some(target))
    }

    pub fn lookup(&self, key: &AddressKey) -> Option<ResolvedCoordinate> {
        self.entries.get(key.as_str()).map(|entry| entry.coordinate)
    }

    pub fn entry(&self, key: &AddressKey) -> Option<&CacheEntry> {
        self.entries.get(key.as_str())
    }

    /// First writer wins. Returns `false` when an entry already existed.
    pub fn insert(&mut self, key: &AddressKey, coordinate: ResolvedCoordinate) -> bool {
        if self.entries.contains_key(key.as_str()) {
            debug!(target: "geocache", key = %key, "entry already present; keeping original");
            return false;
        }
        self.entries.insert(
            key.as_str().to_string(),
            CacheEntry {
                coordinate,
                resolved_at: Utc::now(),
            },
        );
        true
    }

    pub fn evict_unresolved(&mut self, key: &AddressKey) -> bool {
        match self.entries.get(key.as_str()) {
            Some(entry) if !entry.coordinate.is_resolved() => {
                self.entries.remove(key.as_str());
                true
            }
            _ => false,
        }
    }

    pub fn unresolved_keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self
            .entries
            .iter()
            .filter(|(_, entry)| !entry.coordinate.is_resolved())
            .map(|(key, _)| key.as_str())
            .collect();
        keys.sort_unstable();
        keys
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn resolved_count(&self) -> usize {
        self.entries
            .values()
            .filter(|entry| entry.coordinate.is_resolved())
            .count()
    }

    /// Writes to a sibling temp file, syncs, then renames over `path`.
    pub fn persist(&self, path: &Path) -> io::Result<()> {
        let parent = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&parent)?;

        let file = CacheFile {
            version: CACHE_SCHEMA_VERSION,
            entries: self.entries.clone(),
        };
        let serialized = serde_json::to_vec_pretty(&file).map_err(io::Error::from)?;

        let mut staging = NamedTempFile::new_in(&parent)?;
        staging.write_all(&serialized)?;
        staging.as_file().sync_all()?;
        staging.persist(path).map_err(|err| err.error)?;

        info!(
            target: "geocache",
            path = %path.display(),
            entries = self.entries.len(),
            "geocode cache persisted"
        );
        Ok(())
    }
}
