//! Source file discovery
//!
//! Walks a project tree and keeps files whose path (relative to the root)
//! matches an include pattern, matches no exclude pattern and is no larger
//! than `max_file_size`. Excluded directories are pruned, not descended.

use crate::error::WorkspaceError;
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Include/exclude rules for discovery
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Globs a file must match
    pub include_patterns: Vec<String>,
    /// Globs that remove a file or directory
    pub exclude_patterns: Vec<String>,
    /// Largest file considered, in bytes
    pub max_file_size: u64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            include_patterns: ["py", "rs", "js", "ts", "go"]
                .iter()
                .map(|ext| format!("**/*.{ext}"))
                .collect(),
            exclude_patterns: [
                ".git",
                "target",
                "node_modules",
                "__pycache__",
                ".venv",
                "venv",
                "dist",
                "build",
                ".autofix",
            ]
            .iter()
            .map(|dir| format!("**/{dir}/**"))
            .collect(),
            max_file_size: 1024 * 1024,
        }
    }
}

/// Compiled discovery rules
#[derive(Debug, Clone)]
pub struct FileFilter {
    include: GlobSet,
    exclude: GlobSet,
    max_file_size: u64,
}

impl FileFilter {
    /// Compile the patterns of a config
    ///
    /// # Errors
    /// Returns `WorkspaceError::InvalidPattern` for the first bad glob
    pub fn new(config: &DiscoveryConfig) -> Result<Self, WorkspaceError> {
        Ok(Self {
            include: build_set(&config.include_patterns)?,
            exclude: build_set(&config.exclude_patterns)?,
            max_file_size: config.max_file_size,
        })
    }

    /// Whether a relative file path passes the pattern rules
    #[must_use]
    pub fn matches(&self, relative: &Path) -> bool {
        self.include.is_match(relative) && !self.exclude.is_match(relative)
    }

    /// Whether a relative directory path is excluded
    #[must_use]
    pub fn prunes(&self, relative: &Path) -> bool {
        // `**/dir/**` only matches paths below the directory
        self.exclude.is_match(relative) || self.exclude.is_match(relative.join("_"))
    }

    /// Walk `root` and return matching files, sorted
    ///
    /// # Errors
    /// Returns error if `root` is not a directory or cannot be walked
    pub fn discover(&self, root: &Path) -> Result<Vec<PathBuf>, WorkspaceError> {
        if !root.is_dir() {
            return Err(WorkspaceError::NotADirectory(root.to_path_buf()));
        }

        let mut files = Vec::new();
        let walker = WalkDir::new(root)
            .follow_links(false)
            .into_iter()
            .filter_entry(|entry| {
                entry.depth() == 0
                    || !entry.file_type().is_dir()
                    || !self.prunes(entry.path().strip_prefix(root).unwrap_or(entry.path()))
            });

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) if e.depth() > 0 => {
                    tracing::warn!(error = %e, "skipping unreadable entry");
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry.path().strip_prefix(root).unwrap_or(entry.path());
            if !self.matches(relative) {
                continue;
            }
            match entry.metadata() {
                Ok(meta) if meta.len() <= self.max_file_size => files.push(entry.into_path()),
                Ok(meta) => tracing::debug!(
                    path = %entry.path().display(),
                    size = meta.len(),
                    "skipping oversized file"
                ),
                Err(e) => tracing::warn!(path = %entry.path().display(), error = %e, "skipping file"),
            }
        }

        files.sort();
        Ok(files)
    }
}

fn build_set(patterns: &[String]) -> Result<GlobSet, WorkspaceError> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).map_err(|source| WorkspaceError::InvalidPattern {
            pattern: pattern.clone(),
            source,
        })?;
        builder.add(glob);
    }
    builder.build().map_err(|source| WorkspaceError::InvalidPattern {
        pattern: patterns.join(", "),
        source,
    })
}

/// Discover files under `root` using `config`
///
/// # Errors
/// Returns error on bad patterns or an unreadable root
pub fn discover_files(root: &Path, config: &DiscoveryConfig) -> Result<Vec<PathBuf>, WorkspaceError> {
    FileFilter::new(config)?.discover(root)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs;

    fn touch(root: &Path, rel: &str, bytes: usize) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, vec![b'x'; bytes]).unwrap();
    }

    #[test]
    fn filters_by_pattern_and_size() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        touch(root, "app/main.py", 10);
        touch(root, "app/big.py", 5_000);
        touch(root, "app/README.md", 10);
        touch(root, "node_modules/pkg/index.js", 10);
        touch(root, ".git/hooks/pre-commit.py", 10);
        touch(root, "lib.rs", 10);

        let config = DiscoveryConfig {
            max_file_size: 1_000,
            ..DiscoveryConfig::default()
        };
        let files: Vec<_> = discover_files(root, &config)
            .unwrap()
            .into_iter()
            .map(|p| p.strip_prefix(root).unwrap().to_path_buf())
            .collect();

        assert_eq!(files, vec![PathBuf::from("app/main.py"), PathBuf::from("lib.rs")]);
    }

    #[test]
    fn excluded_directories_are_pruned() {
        let filter = FileFilter::new(&DiscoveryConfig::default()).unwrap();
        assert!(filter.prunes(Path::new("target")));
        assert!(filter.prunes(Path::new("web/node_modules")));
        assert!(!filter.prunes(Path::new("src")));
    }

    #[test]
    fn bad_pattern_is_reported() {
        let config = DiscoveryConfig {
            include_patterns: vec!["src/[".into()],
            ..DiscoveryConfig::default()
        };
        let err = FileFilter::new(&config).unwrap_err();
        assert!(matches!(err, WorkspaceError::InvalidPattern { pattern, .. } if pattern == "src/["));
    }

    #[test]
    fn file_root_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "a.py", 1);
        let err = discover_files(&dir.path().join("a.py"), &DiscoveryConfig::default()).unwrap_err();
        assert!(matches!(err, WorkspaceError::NotADirectory(_)));
    }
}
