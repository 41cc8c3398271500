//! Session metadata bookkeeping.
//!
//! Two responsibilities: the in-memory start-time index used to compute
//! durations (file timestamps are useless once rotation has happened), and
//! the persisted per-recording metadata record that external collaborators
//! amend later (title edits, note attachments). Persisted updates are
//! read-modify-write merges so those foreign fields survive.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, warn};

/// Persisted record, one per recording, co-located with the audio file.
///
/// Unknown fields round-trip through `extra` so a merge never clobbers what
/// another writer added.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub duration_secs: f64,
    pub start_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    pub last_modified: DateTime<Utc>,
    pub is_active: bool,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Start-time index plus persisted-record maintenance.
///
/// Owned by a controller instance, not process-global, so independent
/// sessions and tests can coexist in one process.
#[derive(Debug, Default)]
pub struct MetadataTracker {
    start_times: Mutex<HashMap<PathBuf, DateTime<Utc>>>,
}

impl MetadataTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Note the start instant for `path` and persist an active record.
    /// Idempotent: a second call for the same path keeps the first instant.
    pub fn record_start(&self, path: &Path) -> Result<DateTime<Utc>> {
        self.record_start_at(path, Utc::now())
    }

    /// Same as [`record_start`](Self::record_start) with an explicit instant.
    pub fn record_start_at(&self, path: &Path, at: DateTime<Utc>) -> Result<DateTime<Utc>> {
        let started_at = {
            let mut index = self.start_times.lock().expect("start-time index poisoned");
            *index.entry(path.to_path_buf()).or_insert(at)
        };

        self.merge_record(path, |record| {
            record.start_time = started_at;
            record.duration_secs = 0.0;
            record.is_active = true;
            record.end_time = None;
        })?;

        Ok(started_at)
    }

    /// Compute the elapsed duration for `path` and finalize its record.
    ///
    /// The start entry is consulted, not removed, so a late query still
    /// resolves. If no start was recorded the duration falls back to zero
    /// rather than going negative or undefined.
    pub fn record_stop(&self, path: &Path) -> Result<Duration> {
        let now = Utc::now();
        let started_at = {
            let index = self.start_times.lock().expect("start-time index poisoned");
            index.get(path).copied()
        };

        let started_at = started_at.unwrap_or_else(|| {
            warn!(path = %path.display(), "no start instant recorded, assuming now");
            now
        });

        let elapsed = (now - started_at).to_std().unwrap_or(Duration::ZERO);

        self.merge_record(path, |record| {
            record.duration_secs = elapsed.as_secs_f64();
            record.end_time = Some(now);
            record.is_active = false;
        })?;

        Ok(elapsed)
    }

    /// Forget the start instant for `path`. The only way entries leave the
    /// index.
    pub fn drop_path(&self, path: &Path) {
        let mut index = self.start_times.lock().expect("start-time index poisoned");
        index.remove(path);
    }

    /// Read-modify-write the persisted record next to the audio file.
    fn merge_record<F>(&self, audio_path: &Path, update: F) -> Result<()>
    where
        F: FnOnce(&mut SessionMetadata),
    {
        let meta_path = metadata_path(audio_path);
        let mut record = load_record(&meta_path)?.unwrap_or_else(|| SessionMetadata {
            title: None,
            duration_secs: 0.0,
            start_time: Utc::now(),
            end_time: None,
            last_modified: Utc::now(),
            is_active: false,
            extra: serde_json::Map::new(),
        });

        update(&mut record);
        record.last_modified = Utc::now();

        save_record(&meta_path, &record)?;
        debug!(path = %meta_path.display(), "metadata record updated");
        Ok(())
    }
}

/// `rec-x.m4a` -> `rec-x.meta.json`, next to the audio.
pub fn metadata_path(audio_path: &Path) -> PathBuf {
    let stem = audio_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "recording".to_string());
    audio_path.with_file_name(format!("{stem}.meta.json"))
}

fn load_record(meta_path: &Path) -> Result<Option<SessionMetadata>> {
    let contents = match fs::read_to_string(meta_path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(e).with_context(|| format!("reading {}", meta_path.display()));
        }
    };

    match serde_json::from_str(&contents) {
        Ok(record) => Ok(Some(record)),
        Err(e) => {
            // A corrupt record is replaced rather than blocking the session.
            warn!(path = %meta_path.display(), "unparseable metadata record, rewriting: {e}");
            Ok(None)
        }
    }
}

/// Atomic write: temp file in the same directory, then rename.
fn save_record(meta_path: &Path, record: &SessionMetadata) -> Result<()> {
    if let Some(parent) = meta_path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }

    let tmp_path = meta_path.with_extension("json.tmp");
    let encoded = serde_json::to_vec_pretty(record).context("serializing metadata record")?;
    fs::write(&tmp_path, encoded).with_context(|| format!("writing {}", tmp_path.display()))?;
    fs::rename(&tmp_path, meta_path)
        .with_context(|| format!("renaming into {}", meta_path.display()))?;
    Ok(())
}
