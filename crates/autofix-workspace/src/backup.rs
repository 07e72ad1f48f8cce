//! Content-addressed workspace backups
//!
//! Layout under the backup root:
//!
//! ```text
//! objects/<blake3 hex>                   file contents, stored once
//! backup_<timestamp>_<dirname>.json      manifest: relative path -> hash
//! ```
//!
//! A backup is complete once its manifest is renamed into place; blobs are
//! always written before the manifest that references them. Pruning removes
//! the oldest manifests by modification time and then collects blobs no
//! remaining manifest references.
//!
//! Every store opened on the same root within a process shares one mutex;
//! create, rollback, prune, removal, listing and garbage collection hold it
//! for their whole duration, so a prune can never collect blobs of a backup
//! that is still being written.

use crate::error::WorkspaceError;
use crate::hash::ContentHash;
use crate::lock::LOCK_FILE;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::SystemTime;
use walkdir::WalkDir;

const OBJECTS_DIR: &str = "objects";
const MANIFEST_PREFIX: &str = "backup_";
const MANIFEST_EXT: &str = "json";

/// Directory names neither captured nor touched by rollback
pub const DEFAULT_IGNORED: &[&str] = &[".git", ".autofix"];

/// One captured file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Blob holding the contents
    pub hash: ContentHash,
    /// Size in bytes
    pub size: u64,
}

/// Snapshot description persisted next to the blobs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupManifest {
    /// Backup name (`backup_<timestamp>_<dirname>`)
    pub name: String,
    /// Directory the snapshot was taken from
    pub source: PathBuf,
    /// Snapshot time
    pub created_at: DateTime<Utc>,
    /// Files keyed by `/`-separated relative path
    pub files: BTreeMap<String, ManifestEntry>,
}

/// Summary of a stored backup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupInfo {
    /// Backup name
    pub name: String,
    /// Directory the snapshot was taken from
    pub source: PathBuf,
    /// Snapshot time
    pub created_at: DateTime<Utc>,
    /// Files captured
    pub file_count: usize,
    /// Bytes captured
    pub total_bytes: u64,
}

impl From<&BackupManifest> for BackupInfo {
    fn from(m: &BackupManifest) -> Self {
        Self {
            name: m.name.clone(),
            source: m.source.clone(),
            created_at: m.created_at,
            file_count: m.files.len(),
            total_bytes: m.files.values().map(|e| e.size).sum(),
        }
    }
}

/// What `create_backup` did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupReport {
    /// The new backup
    pub info: BackupInfo,
    /// Blobs written by this backup (the rest were already stored)
    pub new_blobs: usize,
    /// Backups removed by retention
    pub pruned: Vec<String>,
}

/// What `rollback` changed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackReport {
    /// Files rewritten from the backup
    pub restored: usize,
    /// Files deleted because the backup did not contain them
    pub removed: usize,
    /// Files already identical
    pub unchanged: usize,
}

/// Result of blob garbage collection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GcReport {
    /// Blobs deleted
    pub blobs_removed: usize,
    /// Bytes freed
    pub bytes_freed: u64,
}

/// Blob store plus manifests
#[derive(Debug, Clone)]
pub struct BackupStore {
    root: PathBuf,
    max_backups: usize,
    ignored: Vec<String>,
    guard: Arc<Mutex<()>>,
}

/// Mutex shared by every store opened on `root`
fn root_guard(root: &Path) -> Arc<Mutex<()>> {
    static GUARDS: OnceLock<Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>> = OnceLock::new();
    let key = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());
    Arc::clone(GUARDS.get_or_init(Mutex::default).lock().entry(key).or_default())
}

impl BackupStore {
    /// Open (and create) a store keeping at most `max_backups` snapshots
    ///
    /// `max_backups == 0` disables retention.
    ///
    /// # Errors
    /// Returns error if the directories cannot be created
    pub fn open(root: impl Into<PathBuf>, max_backups: usize) -> Result<Self, WorkspaceError> {
        let root = root.into();
        let objects = root.join(OBJECTS_DIR);
        fs::create_dir_all(&objects).map_err(|e| WorkspaceError::io(&objects, e))?;
        let guard = root_guard(&root);
        Ok(Self {
            root,
            max_backups,
            ignored: DEFAULT_IGNORED.iter().map(ToString::to_string).collect(),
            guard,
        })
    }

    /// Replace the ignored directory names
    #[must_use]
    pub fn with_ignored(mut self, names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.ignored = names.into_iter().map(Into::into).collect();
        self
    }

    /// Store root
    #[inline]
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Snapshot `dir`
    ///
    /// # Errors
    /// Returns error if `dir` is unreadable or the store cannot be written
    pub fn create_backup(&self, dir: &Path) -> Result<BackupReport, WorkspaceError> {
        if !dir.is_dir() {
            return Err(WorkspaceError::NotADirectory(dir.to_path_buf()));
        }
        let _guard = self.guard.lock();

        let created_at = Utc::now();
        let name = self.unique_name(dir, created_at);
        let mut files = BTreeMap::new();
        let mut new_blobs = 0;

        for (relative, path) in self.workspace_files(dir)? {
            let bytes = fs::read(&path).map_err(|e| WorkspaceError::io(&path, e))?;
            let hash = ContentHash::compute(&bytes);
            if self.put_blob(hash, &bytes)? {
                new_blobs += 1;
            }
            files.insert(
                relative,
                ManifestEntry {
                    hash,
                    size: bytes.len() as u64,
                },
            );
        }

        let manifest = BackupManifest {
            name: name.clone(),
            source: dir.to_path_buf(),
            created_at,
            files,
        };
        let path = self.manifest_path(&name);
        write_atomically(&path, &serde_json::to_vec_pretty(&manifest)?)?;

        let info = BackupInfo::from(&manifest);
        tracing::info!(
            backup = %name,
            files = info.file_count,
            bytes = info.total_bytes,
            new_blobs,
            "backup created"
        );

        let pruned = if self.max_backups > 0 {
            self.prune_unlocked(self.max_backups)?
        } else {
            Vec::new()
        };

        Ok(BackupReport {
            info,
            new_blobs,
            pruned,
        })
    }

    /// Restore `dir` to the state captured in `name`
    ///
    /// With `only == None` the workspace is fully replaced: captured files are
    /// rewritten and files absent from the backup are deleted. With a list of
    /// relative paths only those paths are restored (or deleted when the
    /// backup did not contain them).
    ///
    /// # Errors
    /// Returns error if the backup is missing or corrupt, or the workspace
    /// cannot be written. Corruption is detected before anything is touched.
    pub fn rollback(
        &self,
        name: &str,
        dir: &Path,
        only: Option<&[PathBuf]>,
    ) -> Result<RollbackReport, WorkspaceError> {
        let _guard = self.guard.lock();
        let manifest = self.load_manifest(name)?;

        let wanted: Option<BTreeSet<String>> =
            only.map(|paths| paths.iter().map(|p| normalize(p)).collect());
        let in_scope = |rel: &str| wanted.as_ref().map_or(true, |w| w.contains(rel));

        for (rel, entry) in manifest.files.iter().filter(|(rel, _)| in_scope(rel)) {
            if !self.blob_path(entry.hash).is_file() {
                return Err(WorkspaceError::CorruptBackup {
                    name: name.to_string(),
                    reason: format!("missing blob {} for {rel}", entry.hash.short()),
                });
            }
        }

        fs::create_dir_all(dir).map_err(|e| WorkspaceError::io(dir, e))?;
        let mut report = RollbackReport::default();

        let current: Vec<(String, PathBuf)> = match &wanted {
            None => self.workspace_files(dir)?,
            Some(w) => w.iter().map(|rel| (rel.clone(), dir.join(rel))).collect(),
        };
        for (rel, path) in current {
            if !manifest.files.contains_key(&rel) && path.is_file() {
                fs::remove_file(&path).map_err(|e| WorkspaceError::io(&path, e))?;
                report.removed += 1;
            }
        }

        for (rel, entry) in manifest.files.iter().filter(|(rel, _)| in_scope(rel)) {
            let target = dir.join(rel);
            if ContentHash::compute_file(&target).is_ok_and(|h| h == entry.hash) {
                report.unchanged += 1;
                continue;
            }
            let blob = self.blob_path(entry.hash);
            let bytes = fs::read(&blob).map_err(|e| WorkspaceError::io(&blob, e))?;
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).map_err(|e| WorkspaceError::io(parent, e))?;
            }
            write_atomically(&target, &bytes)?;
            report.restored += 1;
        }

        tracing::info!(
            backup = %name,
            workspace = %dir.display(),
            restored = report.restored,
            removed = report.removed,
            "rollback completed"
        );
        Ok(report)
    }

    /// Every backup, newest first
    ///
    /// # Errors
    /// Returns error if the store cannot be listed
    pub fn list_backups(&self) -> Result<Vec<BackupInfo>, WorkspaceError> {
        let _guard = self.guard.lock();
        let mut infos = Vec::new();
        for (name, _) in self.manifest_files()? {
            match self.load_manifest(&name) {
                Ok(manifest) => infos.push(BackupInfo::from(&manifest)),
                Err(e) => tracing::warn!(backup = %name, error = %e, "skipping unreadable manifest"),
            }
        }
        infos.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.name.cmp(&a.name)));
        Ok(infos)
    }

    /// Most recent backup, if any
    ///
    /// # Errors
    /// Returns error if the store cannot be listed
    pub fn latest(&self) -> Result<Option<BackupInfo>, WorkspaceError> {
        Ok(self.list_backups()?.into_iter().next())
    }

    /// Load a manifest by name
    ///
    /// # Errors
    /// Returns `BackupNotFound` or `CorruptBackup`
    pub fn load_manifest(&self, name: &str) -> Result<BackupManifest, WorkspaceError> {
        let path = self.manifest_path(name);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(WorkspaceError::BackupNotFound(name.to_string()))
            }
            Err(e) => return Err(WorkspaceError::io(&path, e)),
        };
        serde_json::from_slice(&bytes).map_err(|e| WorkspaceError::CorruptBackup {
            name: name.to_string(),
            reason: e.to_string(),
        })
    }

    /// Delete one backup and collect its unreferenced blobs
    ///
    /// # Errors
    /// Returns `BackupNotFound` or an I/O error
    pub fn remove_backup(&self, name: &str) -> Result<GcReport, WorkspaceError> {
        let _guard = self.guard.lock();
        let path = self.manifest_path(name);
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(WorkspaceError::BackupNotFound(name.to_string()))
            }
            Err(e) => return Err(WorkspaceError::io(&path, e)),
        }
        self.collect_garbage_unlocked()
    }

    /// Keep the `keep` newest backups by modification time
    ///
    /// # Errors
    /// Returns error if manifests or blobs cannot be removed
    pub fn prune(&self, keep: usize) -> Result<Vec<String>, WorkspaceError> {
        let _guard = self.guard.lock();
        self.prune_unlocked(keep)
    }

    fn prune_unlocked(&self, keep: usize) -> Result<Vec<String>, WorkspaceError> {
        let mut manifests = self.manifest_files()?;
        if manifests.len() <= keep {
            return Ok(Vec::new());
        }
        manifests.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        let excess = manifests.len() - keep;

        let mut removed = Vec::with_capacity(excess);
        for (name, _) in manifests.into_iter().take(excess) {
            let path = self.manifest_path(&name);
            fs::remove_file(&path).map_err(|e| WorkspaceError::io(&path, e))?;
            tracing::debug!(backup = %name, "pruned backup");
            removed.push(name);
        }
        self.collect_garbage_unlocked()?;
        Ok(removed)
    }

    /// Delete blobs no manifest references
    ///
    /// # Errors
    /// Returns error if the store cannot be read or a blob cannot be removed
    pub fn collect_garbage(&self) -> Result<GcReport, WorkspaceError> {
        let _guard = self.guard.lock();
        self.collect_garbage_unlocked()
    }

    fn collect_garbage_unlocked(&self) -> Result<GcReport, WorkspaceError> {
        let mut referenced = BTreeSet::new();
        for (name, _) in self.manifest_files()? {
            // An unreadable manifest keeps everything alive
            let manifest = self.load_manifest(&name)?;
            referenced.extend(manifest.files.values().map(|e| e.hash));
        }

        let objects = self.root.join(OBJECTS_DIR);
        let mut report = GcReport::default();
        let entries = fs::read_dir(&objects).map_err(|e| WorkspaceError::io(&objects, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| WorkspaceError::io(&objects, e))?;
            let keep = entry
                .file_name()
                .to_str()
                .and_then(|n| n.parse::<ContentHash>().ok())
                .map_or(true, |h| referenced.contains(&h));
            if keep {
                continue;
            }
            let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
            let path = entry.path();
            fs::remove_file(&path).map_err(|e| WorkspaceError::io(&path, e))?;
            report.blobs_removed += 1;
            report.bytes_freed += size;
        }
        if report.blobs_removed > 0 {
            tracing::debug!(
                blobs = report.blobs_removed,
                bytes = report.bytes_freed,
                "collected orphan blobs"
            );
        }
        Ok(report)
    }

    /// Files under `dir` eligible for capture, keyed by relative path
    fn workspace_files(&self, dir: &Path) -> Result<Vec<(String, PathBuf)>, WorkspaceError> {
        let store_root = self.root.canonicalize().ok();
        let mut files = Vec::new();
        let walker = WalkDir::new(dir).follow_links(false).into_iter().filter_entry(|e| {
            if e.depth() == 0 {
                return true;
            }
            let name = e.file_name().to_string_lossy();
            if e.file_type().is_dir() {
                if self.ignored.iter().any(|i| *i == name) {
                    return false;
                }
                let inside_store = store_root
                    .as_ref()
                    .zip(e.path().canonicalize().ok())
                    .is_some_and(|(store, p)| p.starts_with(store));
                return !inside_store;
            }
            !(e.depth() == 1 && name == LOCK_FILE)
        });

        for entry in walker {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry.path().strip_prefix(dir).unwrap_or(entry.path());
            files.push((normalize(relative), entry.into_path()));
        }
        Ok(files)
    }

    fn manifest_files(&self) -> Result<Vec<(String, SystemTime)>, WorkspaceError> {
        let entries = fs::read_dir(&self.root).map_err(|e| WorkspaceError::io(&self.root, e))?;
        let mut manifests = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| WorkspaceError::io(&self.root, e))?;
            let path = entry.path();
            if path.extension().and_then(|x| x.to_str()) != Some(MANIFEST_EXT) {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if !name.starts_with(MANIFEST_PREFIX) {
                continue;
            }
            let modified = entry
                .metadata()
                .and_then(|m| m.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            manifests.push((name.to_string(), modified));
        }
        Ok(manifests)
    }

    fn unique_name(&self, dir: &Path, at: DateTime<Utc>) -> String {
        let dirname = dir
            .file_name()
            .map_or_else(|| "root".to_string(), |n| n.to_string_lossy().into_owned());
        let base = format!("{MANIFEST_PREFIX}{}_{dirname}", at.format("%Y%m%d_%H%M%S_%3f"));
        let mut name = base.clone();
        let mut n = 1;
        while self.manifest_path(&name).exists() {
            name = format!("{base}-{n}");
            n += 1;
        }
        name
    }

    fn manifest_path(&self, name: &str) -> PathBuf {
        self.root.join(format!("{name}.{MANIFEST_EXT}"))
    }

    fn blob_path(&self, hash: ContentHash) -> PathBuf {
        self.root.join(OBJECTS_DIR).join(hash.to_string())
    }

    /// Store a blob; returns whether it was new
    fn put_blob(&self, hash: ContentHash, bytes: &[u8]) -> Result<bool, WorkspaceError> {
        let path = self.blob_path(hash);
        if path.is_file() {
            return Ok(false);
        }
        write_atomically(&path, bytes)?;
        Ok(true)
    }
}

fn normalize(relative: &Path) -> String {
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn write_atomically(path: &Path, bytes: &[u8]) -> Result<(), WorkspaceError> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".autofix-tmp");
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, bytes).map_err(|e| WorkspaceError::io(&tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| WorkspaceError::io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn names_follow_convention() {
        let store_dir = tempfile::tempdir().unwrap();
        let ws = tempfile::tempdir().unwrap();
        write(ws.path(), "a.py", "a");

        let store = BackupStore::open(store_dir.path(), 0).unwrap();
        let report = store.create_backup(ws.path()).unwrap();
        let dirname = ws.path().file_name().unwrap().to_string_lossy().into_owned();

        assert!(report.info.name.starts_with("backup_"));
        assert!(report.info.name.ends_with(&format!("_{dirname}")));
    }

    #[test]
    fn identical_content_is_stored_once() {
        let store_dir = tempfile::tempdir().unwrap();
        let ws = tempfile::tempdir().unwrap();
        write(ws.path(), "a.py", "same");
        write(ws.path(), "b/c.py", "same");

        let store = BackupStore::open(store_dir.path(), 0).unwrap();
        let first = store.create_backup(ws.path()).unwrap();
        assert_eq!(first.info.file_count, 2);
        assert_eq!(first.new_blobs, 1);

        let second = store.create_backup(ws.path()).unwrap();
        assert_eq!(second.new_blobs, 0);
        assert_ne!(first.info.name, second.info.name);
    }

    #[test]
    fn lock_file_and_ignored_dirs_are_not_captured() {
        let store_dir = tempfile::tempdir().unwrap();
        let ws = tempfile::tempdir().unwrap();
        write(ws.path(), "a.py", "a");
        write(ws.path(), LOCK_FILE, "{}");
        write(ws.path(), ".git/HEAD", "ref");

        let store = BackupStore::open(store_dir.path(), 0).unwrap();
        let report = store.create_backup(ws.path()).unwrap();
        let manifest = store.load_manifest(&report.info.name).unwrap();
        assert_eq!(manifest.files.keys().collect::<Vec<_>>(), vec!["a.py"]);
    }

    #[test]
    fn store_inside_workspace_is_skipped() {
        let ws = tempfile::tempdir().unwrap();
        write(ws.path(), "src/a.py", "a");
        let store = BackupStore::open(ws.path().join("backups"), 0).unwrap();

        store.create_backup(ws.path()).unwrap();
        let second = store.create_backup(ws.path()).unwrap();
        assert_eq!(second.info.file_count, 1);
    }

    #[test]
    fn partial_rollback_touches_only_listed_paths() {
        let store_dir = tempfile::tempdir().unwrap();
        let ws = tempfile::tempdir().unwrap();
        write(ws.path(), "a.py", "a0");
        write(ws.path(), "b.py", "b0");

        let store = BackupStore::open(store_dir.path(), 0).unwrap();
        let name = store.create_backup(ws.path()).unwrap().info.name;

        write(ws.path(), "a.py", "a1");
        write(ws.path(), "b.py", "b1");
        write(ws.path(), "new.py", "n");

        let report = store
            .rollback(
                &name,
                ws.path(),
                Some(&[PathBuf::from("a.py"), PathBuf::from("new.py")]),
            )
            .unwrap();
        assert_eq!(report.restored, 1);
        assert_eq!(report.removed, 1);
        assert_eq!(fs::read_to_string(ws.path().join("a.py")).unwrap(), "a0");
        assert_eq!(fs::read_to_string(ws.path().join("b.py")).unwrap(), "b1");
        assert!(!ws.path().join("new.py").exists());
    }

    #[test]
    fn missing_blob_is_detected_before_writing() {
        let store_dir = tempfile::tempdir().unwrap();
        let ws = tempfile::tempdir().unwrap();
        write(ws.path(), "a.py", "a0");
        let store = BackupStore::open(store_dir.path(), 0).unwrap();
        let name = store.create_backup(ws.path()).unwrap().info.name;

        fs::remove_dir_all(store_dir.path().join(OBJECTS_DIR)).unwrap();
        fs::create_dir_all(store_dir.path().join(OBJECTS_DIR)).unwrap();
        write(ws.path(), "a.py", "a1");

        let err = store.rollback(&name, ws.path(), None).unwrap_err();
        assert!(matches!(err, WorkspaceError::CorruptBackup { .. }));
        assert_eq!(fs::read_to_string(ws.path().join("a.py")).unwrap(), "a1");
    }

    #[test]
    fn unknown_backup_is_not_found() {
        let store_dir = tempfile::tempdir().unwrap();
        let store = BackupStore::open(store_dir.path(), 0).unwrap();
        let err = store
            .rollback("backup_nope", store_dir.path(), None)
            .unwrap_err();
        assert!(matches!(err, WorkspaceError::BackupNotFound(n) if n == "backup_nope"));
    }
}
