//! Durable, append-only learning records
//!
//! Layout under the data directory:
//! - `feedback.jsonl`: one `FeedbackData` per line, accepted and rejected
//! - `updates.jsonl`: one `ModelUpdate` per status change; the last line per id wins
//! - `stats.json`: lifetime counters, rewritten atomically
//!
//! Retention cleanup is the only operation that rewrites the line files.

use crate::error::LearningError;
use crate::types::{FeedbackData, ModelUpdate, UpdateId};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

const FEEDBACK_FILE: &str = "feedback.jsonl";
const UPDATES_FILE: &str = "updates.jsonl";
const STATS_FILE: &str = "stats.json";

/// Lifetime counters persisted next to the record files
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LearningCounters {
    /// Samples submitted
    pub total_collected: u64,
    /// Samples accepted into the buffer
    pub accepted: u64,
    /// Samples rejected by the validator
    pub rejected: u64,
    /// Records that could not be written
    pub persistence_failures: u64,
    /// Updates that completed
    pub updates_completed: u64,
    /// Updates that failed
    pub updates_failed: u64,
}

/// Rows removed by a retention pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupReport {
    /// Feedback rows deleted
    pub feedback_removed: usize,
    /// Update rows deleted
    pub updates_removed: usize,
}

/// JSON Lines store for feedback and update history
#[derive(Debug)]
pub struct LearningStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl LearningStore {
    /// Open (and create) the store directory
    ///
    /// # Errors
    /// Returns `LearningError::Io` if the directory cannot be created
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, LearningError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| LearningError::io(&dir, e))?;
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    /// Store directory
    #[inline]
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn feedback_path(&self) -> PathBuf {
        self.dir.join(FEEDBACK_FILE)
    }

    fn updates_path(&self) -> PathBuf {
        self.dir.join(UPDATES_FILE)
    }

    fn stats_path(&self) -> PathBuf {
        self.dir.join(STATS_FILE)
    }

    /// Append one feedback record
    ///
    /// # Errors
    /// Returns error if serialization or the write fails
    pub fn append_feedback(&self, sample: &FeedbackData) -> Result<(), LearningError> {
        self.append_line(&self.feedback_path(), sample)
    }

    /// Append one update record
    ///
    /// # Errors
    /// Returns error if serialization or the write fails
    pub fn append_update(&self, update: &ModelUpdate) -> Result<(), LearningError> {
        self.append_line(&self.updates_path(), update)
    }

    fn append_line<T: Serialize>(&self, path: &Path, record: &T) -> Result<(), LearningError> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        let _guard = self.write_lock.lock();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| LearningError::io(path, e))?;
        file.write_all(&line).map_err(|e| LearningError::io(path, e))
    }

    /// Load every feedback record in file order
    ///
    /// # Errors
    /// Returns error if the file exists but cannot be read
    pub fn load_feedback(&self) -> Result<Vec<FeedbackData>, LearningError> {
        read_lines(&self.feedback_path())
    }

    /// Load update history, one entry per id with its latest status, oldest first
    ///
    /// # Errors
    /// Returns error if the file exists but cannot be read
    pub fn load_updates(&self) -> Result<Vec<ModelUpdate>, LearningError> {
        let records: Vec<ModelUpdate> = read_lines(&self.updates_path())?;
        let mut latest: BTreeMap<UpdateId, ModelUpdate> = BTreeMap::new();
        for record in records {
            latest.insert(record.id, record);
        }
        Ok(latest.into_values().collect())
    }

    /// Load lifetime counters, defaulting when absent or unreadable
    #[must_use]
    pub fn load_counters(&self) -> Option<LearningCounters> {
        let path = self.stats_path();
        let bytes = fs::read(&path).ok()?;
        match serde_json::from_slice(&bytes) {
            Ok(counters) => Some(counters),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "ignoring unreadable stats file");
                None
            }
        }
    }

    /// Persist lifetime counters (write to temp file, then rename)
    ///
    /// # Errors
    /// Returns error if serialization or the write fails
    pub fn save_counters(&self, counters: &LearningCounters) -> Result<(), LearningError> {
        let path = self.stats_path();
        let json = serde_json::to_vec_pretty(counters)?;
        let _guard = self.write_lock.lock();
        write_atomically(&path, &json)
    }

    /// Delete feedback and update rows older than `cutoff`
    ///
    /// Rows newer than the cutoff are always kept.
    ///
    /// # Errors
    /// Returns error if the files cannot be read or rewritten
    pub fn retain_since(&self, cutoff: DateTime<Utc>) -> Result<CleanupReport, LearningError> {
        let _guard = self.write_lock.lock();

        let feedback: Vec<FeedbackData> = read_lines(&self.feedback_path())?;
        let before = feedback.len();
        let kept: Vec<_> = feedback.into_iter().filter(|f| f.timestamp >= cutoff).collect();
        let feedback_removed = before - kept.len();
        if feedback_removed > 0 {
            rewrite_lines(&self.feedback_path(), &kept)?;
        }

        let updates: Vec<ModelUpdate> = read_lines(&self.updates_path())?;
        let before = updates.len();
        let kept: Vec<_> = updates.into_iter().filter(|u| u.timestamp >= cutoff).collect();
        let updates_removed = before - kept.len();
        if updates_removed > 0 {
            rewrite_lines(&self.updates_path(), &kept)?;
        }

        Ok(CleanupReport {
            feedback_removed,
            updates_removed,
        })
    }
}

fn read_lines<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, LearningError> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(LearningError::io(path, e)),
    };

    let mut records = Vec::new();
    for (number, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|e| LearningError::io(path, e))?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str(&line) {
            Ok(record) => records.push(record),
            // A torn final line after a crash must not block start-up
            Err(e) => tracing::warn!(
                path = %path.display(),
                line = number + 1,
                error = %e,
                "skipping malformed record"
            ),
        }
    }
    Ok(records)
}

fn rewrite_lines<T: Serialize>(path: &Path, records: &[T]) -> Result<(), LearningError> {
    let mut buf = Vec::new();
    for record in records {
        serde_json::to_writer(&mut buf, record)?;
        buf.push(b'\n');
    }
    write_atomically(path, &buf)
}

fn write_atomically(path: &Path, bytes: &[u8]) -> Result<(), LearningError> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, bytes).map_err(|e| LearningError::io(&tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| LearningError::io(path, e))
}
