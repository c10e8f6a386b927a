use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;

use crate::batch::ResolutionSummary;
use crate::config::AppConfig;
use crate::errors::AppResult;

/// Append-only JSONL log of batch runs, rotated by size.
#[derive(Debug, Clone)]
pub struct RunLog {
    path: PathBuf,
    max_file_bytes: u64,
    max_file_count: usize,
}

impl RunLog {
    pub fn new(path: impl Into<PathBuf>, max_file_bytes: u64, max_file_count: usize) -> AppResult<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            max_file_bytes,
            max_file_count: max_file_count.max(1),
        })
    }

    pub fn from_config(config: &AppConfig) -> AppResult<Option<Self>> {
        config
            .run_log_path
            .as_ref()
            .map(|path| Self::new(path, config.run_log_max_bytes, config.run_log_max_files))
            .transpose()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record_batch(&self, summary: &ResolutionSummary, cache_entries: usize) -> AppResult<()> {
        self.record(
            "batch_completed",
            json!({
                "summary": summary,
                "cache_entries": cache_entries,
            }),
        )
    }

    pub fn record(&self, name: impl Into<String>, payload: serde_json::Value) -> AppResult<()> {
        let mut line = serde_json::to_vec(&RunEvent::new(name.into(), payload))?;
        line.push(b'\n');
        self.rotate_if_needed(line.len() as u64)?;

        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        file.write_all(&line)?;
        file.flush()?;
        Ok(())
    }

    fn rotate_if_needed(&self, incoming_bytes: u64) -> AppResult<()> {
        let current_size = fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0);
        if current_size == 0 || current_size + incoming_bytes <= self.max_file_bytes {
            return Ok(());
        }

        if self.max_file_count <= 1 {
            OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&self.path)?;
            return Ok(());
        }

        let rotated_name = format!(
            "{}-{}.jsonl",
            self.stem(),
            Utc::now().format("%Y%m%d%H%M%S%3f")
        );
        let rotated_path = self.parent().join(rotated_name);
        fs::rename(&self.path, &rotated_path)?;
        self.prune_rotations()?;
        OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.path)?;
        Ok(())
    }

    fn prune_rotations(&self) -> AppResult<()> {
        let prefix = format!("{}-", self.stem());
        let mut rotations = fs::read_dir(self.parent())?
            .filter_map(|entry| {
                let entry = entry.ok()?;
                let name = entry.file_name().to_string_lossy().to_string();
                (name.starts_with(&prefix) && name.ends_with(".jsonl")).then_some(name)
            })
            .collect::<Vec<_>>();

        // timestamped names sort chronologically
        rotations.sort();
        let allowed = self.max_file_count.saturating_sub(1);
        if rotations.len() > allowed {
            let excess = rotations.len() - allowed;
            for name in rotations.into_iter().take(excess) {
                let _ = fs::remove_file(self.parent().join(name));
            }
        }
        Ok(())
    }

    fn parent(&self) -> &Path {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        }
    }

    fn stem(&self) -> String {
        self.path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "run-log".into())
    }
}

#[derive(Debug, Serialize)]
pub struct RunEvent {
    pub name: String,
    pub timestamp: DateTime<Utc>,
    pub payload: serde_json::Value,
}

impl RunEvent {
    fn new(name: String, payload: serde_json::Value) -> Self {
        Self {
            name,
            timestamp: Utc::now(),
            payload,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn appends_batch_summaries_across_instances() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("runs.jsonl");
        let summary = ResolutionSummary {
            total: 4,
            precise: 2,
            degraded: 1,
            cache_hit: 0,
            unresolved: 1,
            external_calls: 5,
        };
        RunLog::new(&path, 1024 * 1024, 3)
            .unwrap()
            .record_batch(&summary, 3)
            .unwrap();
        RunLog::new(&path, 1024 * 1024, 3)
            .unwrap()
            .record_batch(&summary, 4)
            .unwrap();

        let contents = fs::read_to_string(&path).unwrap();
        let lines: Vec<serde_json::Value> = contents
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["name"], "batch_completed");
        assert_eq!(lines[0]["payload"]["summary"]["unresolved"], 1);
        assert_eq!(lines[1]["payload"]["cache_entries"], 4);
    }

    #[test]
    fn rotates_and_prunes_when_exceeding_capacity() {
        let dir = tempdir().unwrap();
        let log = RunLog::new(dir.path().join("runs.jsonl"), 64, 2).unwrap();
        for idx in 0..5 {
            log.record(
                "big",
                json!({ "payload": "0123456789abcdef0123456789abcdef", "idx": idx }),
            )
            .unwrap();
            std::thread::sleep(std::time::Duration::from_millis(2));
        }

        let rotated = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_name().to_string_lossy().starts_with("runs-"))
            .count();
        assert_eq!(rotated, 1);
        let live = fs::read_to_string(log.path()).unwrap();
        assert!(live.contains("\"idx\":4"));
    }

    #[test]
    fn disabled_without_configured_path() {
        let mut config = AppConfig::from_env();
        config.run_log_path = None;
        assert!(RunLog::from_config(&config).unwrap().is_none());
    }
}
