//! Autofix Workspace
//!
//! Filesystem services the orchestrator relies on before it changes code:
//! - **Backups**: content-addressed snapshots with full or partial rollback
//! - **Locking**: one mutating cycle per workspace via `.autofix.lock`
//! - **Discovery**: include/exclude glob walk with a size cap

pub mod backup;
pub mod discovery;
pub mod error;
pub mod hash;
pub mod lock;

pub use backup::{
    BackupInfo, BackupManifest, BackupReport, BackupStore, GcReport, ManifestEntry,
    RollbackReport,
};
pub use discovery::{discover_files, DiscoveryConfig, FileFilter};
pub use error::WorkspaceError;
pub use hash::{ContentHash, HashError};
pub use lock::{lock_path, LockInfo, WorkspaceLock, LOCK_FILE};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
