//! ext_updater - UI document update store for Ren3D.
//!
//! The application bundle ships a read-only `index.html`. Updates never touch
//! it: a replacement document is written to a per-user override directory,
//! and the override wins whenever it exists and is readable. One generation of
//! history is kept next to the override as `index.html.bak`.
//!
//! Error codes: 5000-5099

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, error, info, warn};

// ============================================================================
// Error Types (Error codes: 5000-5099)
// ============================================================================

/// Error codes for the update store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdaterErrorCode {
    /// Generic updater error (5000)
    Generic = 5000,
    /// Override directory could not be created or is unusable (5001)
    StorageUnavailable = 5001,
    /// Writing the new document failed (5002)
    WriteFailed = 5002,
    /// Downloading an update payload failed (5003)
    DownloadFailed = 5003,
    /// Removing the override failed (5004)
    RevertFailed = 5004,
}

/// Update store error type.
#[derive(Debug, Error)]
pub enum UpdaterError {
    #[error("[{code:?}] {message}")]
    Generic {
        code: UpdaterErrorCode,
        message: String,
    },

    #[error("[{code:?}] {message}")]
    StorageUnavailable {
        code: UpdaterErrorCode,
        message: String,
    },

    #[error("[{code:?}] {message}")]
    WriteFailed {
        code: UpdaterErrorCode,
        message: String,
    },

    #[error("[{code:?}] {message}")]
    DownloadFailed {
        code: UpdaterErrorCode,
        message: String,
    },

    #[error("[{code:?}] {message}")]
    RevertFailed {
        code: UpdaterErrorCode,
        message: String,
    },
}

impl UpdaterError {
    pub fn generic(message: impl Into<String>) -> Self {
        Self::Generic {
            code: UpdaterErrorCode::Generic,
            message: message.into(),
        }
    }

    pub fn storage_unavailable(message: impl Into<String>) -> Self {
        Self::StorageUnavailable {
            code: UpdaterErrorCode::StorageUnavailable,
            message: message.into(),
        }
    }

    pub fn write_failed(message: impl Into<String>) -> Self {
        Self::WriteFailed {
            code: UpdaterErrorCode::WriteFailed,
            message: message.into(),
        }
    }

    pub fn download_failed(message: impl Into<String>) -> Self {
        Self::DownloadFailed {
            code: UpdaterErrorCode::DownloadFailed,
            message: message.into(),
        }
    }

    pub fn revert_failed(message: impl Into<String>) -> Self {
        Self::RevertFailed {
            code: UpdaterErrorCode::RevertFailed,
            message: message.into(),
        }
    }

    pub fn code(&self) -> UpdaterErrorCode {
        match self {
            Self::Generic { code, .. }
            | Self::StorageUnavailable { code, .. }
            | Self::WriteFailed { code, .. }
            | Self::DownloadFailed { code, .. }
            | Self::RevertFailed { code, .. } => *code,
        }
    }

    /// Human-readable message without the code prefix.
    pub fn message(&self) -> &str {
        match self {
            Self::Generic { message, .. }
            | Self::StorageUnavailable { message, .. }
            | Self::WriteFailed { message, .. }
            | Self::DownloadFailed { message, .. }
            | Self::RevertFailed { message, .. } => message,
        }
    }
}

// ============================================================================
// Types
// ============================================================================

/// File name of the served UI document.
pub const DOCUMENT_FILE: &str = "index.html";

/// Suffix appended to the override's name to form the backup slot.
pub const BACKUP_SUFFIX: &str = ".bak";

/// Which copy of the UI document is being served.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentLocation {
    /// Read-only document shipped with the application.
    Bundled(PathBuf),
    /// Writable per-user replacement.
    Overridden(PathBuf),
}

impl DocumentLocation {
    pub fn path(&self) -> &Path {
        match self {
            DocumentLocation::Bundled(p) | DocumentLocation::Overridden(p) => p,
        }
    }

    pub fn is_overridden(&self) -> bool {
        matches!(self, DocumentLocation::Overridden(_))
    }
}

/// Where an update payload came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Provenance {
    /// Content handed over directly by the rendering context.
    Direct,
    /// Content downloaded from a URL.
    Url(String),
}

/// A complete replacement UI document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdatePayload {
    pub content: String,
    pub provenance: Provenance,
}

impl UpdatePayload {
    pub fn direct(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            provenance: Provenance::Direct,
        }
    }

    pub fn from_url(url: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            provenance: Provenance::Url(url.into()),
        }
    }
}

/// Secondary failures of an update cycle. They never fail the cycle itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateWarning {
    /// The current override could not be copied to the backup slot.
    BackupFailed { path: PathBuf, message: String },
    /// The override could not be put back after a failed write.
    RestoreFailed { path: PathBuf, message: String },
}

impl std::fmt::Display for UpdateWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UpdateWarning::BackupFailed { path, message } => {
                write!(f, "backup of {} failed: {}", path.display(), message)
            }
            UpdateWarning::RestoreFailed { path, message } => {
                write!(f, "restore of {} failed: {}", path.display(), message)
            }
        }
    }
}

// ============================================================================
// Storage
// ============================================================================

/// Filesystem operations used by the store.
pub trait DocumentStorage: Send + Sync {
    fn create_dir_all(&self, dir: &Path) -> io::Result<()>;
    fn is_readable(&self, path: &Path) -> bool;
    fn copy(&self, from: &Path, to: &Path) -> io::Result<()>;
    fn write(&self, path: &Path, content: &[u8]) -> io::Result<()>;
    fn remove(&self, path: &Path) -> io::Result<()>;
}

/// Plain `std::fs` storage.
pub struct DiskStorage;

impl DocumentStorage for DiskStorage {
    fn create_dir_all(&self, dir: &Path) -> io::Result<()> {
        std::fs::create_dir_all(dir)
    }

    fn is_readable(&self, path: &Path) -> bool {
        std::fs::File::open(path)
            .and_then(|f| f.metadata())
            .map(|m| m.is_file())
            .unwrap_or(false)
    }

    fn copy(&self, from: &Path, to: &Path) -> io::Result<()> {
        std::fs::copy(from, to).map(|_| ())
    }

    fn write(&self, path: &Path, content: &[u8]) -> io::Result<()> {
        std::fs::write(path, content)
    }

    fn remove(&self, path: &Path) -> io::Result<()> {
        std::fs::remove_file(path)
    }
}

// ============================================================================
// Update Store
// ============================================================================

pub struct UpdateStore {
    bundled: PathBuf,
    override_dir: PathBuf,
    storage: Arc<dyn DocumentStorage>,
    cycle: Mutex<()>,
    warnings: broadcast::Sender<UpdateWarning>,
}

impl UpdateStore {
    /// `bundled` is the shipped document, `override_dir` the writable
    /// directory that receives replacements.
    pub fn new(bundled: impl Into<PathBuf>, override_dir: impl Into<PathBuf>) -> Self {
        let (warnings, _) = broadcast::channel(16);
        Self {
            bundled: bundled.into(),
            override_dir: override_dir.into(),
            storage: Arc::new(DiskStorage),
            cycle: Mutex::new(()),
            warnings,
        }
    }

    pub fn with_storage(mut self, storage: Arc<dyn DocumentStorage>) -> Self {
        self.storage = storage;
        self
    }

    pub fn bundled_path(&self) -> &Path {
        &self.bundled
    }

    pub fn override_path(&self) -> PathBuf {
        self.override_dir.join(DOCUMENT_FILE)
    }

    pub fn backup_path(&self) -> PathBuf {
        self.override_dir
            .join(format!("{}{}", DOCUMENT_FILE, BACKUP_SUFFIX))
    }

    pub fn subscribe_warnings(&self) -> broadcast::Receiver<UpdateWarning> {
        self.warnings.subscribe()
    }

    /// The document to serve: the override if present and readable, else the
    /// bundled one.
    pub fn resolve_active(&self) -> DocumentLocation {
        let override_path = self.override_path();
        if self.storage.is_readable(&override_path) {
            DocumentLocation::Overridden(override_path)
        } else {
            DocumentLocation::Bundled(self.bundled.clone())
        }
    }

    /// Replace the override with `payload`, keeping the previous override as
    /// backup. Cycles on the same store never interleave.
    pub async fn apply_update(&self, payload: UpdatePayload) -> Result<(), UpdaterError> {
        let _cycle = self.cycle.lock().await;

        let override_path = self.override_path();
        let backup_path = self.backup_path();

        if override_path == self.bundled {
            return Err(UpdaterError::storage_unavailable(
                "override location coincides with the bundled document",
            ));
        }

        debug!(
            path = %override_path.display(),
            len = payload.content.len(),
            provenance = ?payload.provenance,
            "updater.apply"
        );

        self.storage
            .create_dir_all(&self.override_dir)
            .map_err(|e| UpdaterError::storage_unavailable(e.to_string()))?;

        let had_override = self.storage.is_readable(&override_path);
        let mut backed_up = false;
        if had_override {
            match self.storage.copy(&override_path, &backup_path) {
                Ok(()) => backed_up = true,
                Err(e) => self.warn(UpdateWarning::BackupFailed {
                    path: backup_path.clone(),
                    message: e.to_string(),
                }),
            }
        }

        if let Err(e) = self
            .storage
            .write(&override_path, payload.content.as_bytes())
        {
            error!(path = %override_path.display(), error = %e, "Failed to write UI document");

            let restored = if backed_up {
                self.storage.copy(&backup_path, &override_path)
            } else if !had_override {
                // Drop any partial write so the bundled document stays active.
                match self.storage.remove(&override_path) {
                    Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
                    other => other,
                }
            } else {
                Ok(())
            };

            if let Err(restore_err) = restored {
                self.warn(UpdateWarning::RestoreFailed {
                    path: override_path.clone(),
                    message: restore_err.to_string(),
                });
            }

            return Err(UpdaterError::write_failed(e.to_string()));
        }

        info!(path = %override_path.display(), "UI document updated");
        Ok(())
    }

    /// Drop the override and its backup so the bundled document is served
    /// again.
    pub async fn revert(&self) -> Result<(), UpdaterError> {
        let _cycle = self.cycle.lock().await;

        for path in [self.override_path(), self.backup_path()] {
            match self.storage.remove(&path) {
                Ok(()) => debug!(path = %path.display(), "removed"),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(UpdaterError::revert_failed(format!(
                        "{}: {}",
                        path.display(),
                        e
                    )))
                }
            }
        }

        info!("UI document reverted to bundled version");
        Ok(())
    }

    fn warn(&self, warning: UpdateWarning) {
        match &warning {
            UpdateWarning::BackupFailed { path, message } => {
                warn!(path = %path.display(), "Backup of UI document failed: {}", message)
            }
            UpdateWarning::RestoreFailed { path, message } => {
                warn!(path = %path.display(), "Restore of UI document failed: {}", message)
            }
        }
        // No subscribers is fine.
        let _ = self.warnings.send(warning);
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Disk storage with switchable faults.
    #[derive(Default)]
    struct FaultyStorage {
        fail_write: AtomicBool,
        partial_write: AtomicBool,
        fail_copy_to_backup: AtomicBool,
        fail_restore: AtomicBool,
        writes: AtomicUsize,
    }

    impl DocumentStorage for FaultyStorage {
        fn create_dir_all(&self, dir: &Path) -> io::Result<()> {
            DiskStorage.create_dir_all(dir)
        }

        fn is_readable(&self, path: &Path) -> bool {
            DiskStorage.is_readable(path)
        }

        fn copy(&self, from: &Path, to: &Path) -> io::Result<()> {
            let to_backup = to.to_string_lossy().ends_with(BACKUP_SUFFIX);
            if to_backup && self.fail_copy_to_backup.load(Ordering::SeqCst) {
                return Err(io::Error::new(io::ErrorKind::Other, "backup disk full"));
            }
            if !to_backup && self.fail_restore.load(Ordering::SeqCst) {
                return Err(io::Error::new(io::ErrorKind::Other, "restore refused"));
            }
            DiskStorage.copy(from, to)
        }

        fn write(&self, path: &Path, content: &[u8]) -> io::Result<()> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            if self.fail_write.load(Ordering::SeqCst) {
                if self.partial_write.load(Ordering::SeqCst) {
                    DiskStorage.write(path, &content[..content.len() / 2])?;
                }
                return Err(io::Error::new(io::ErrorKind::Other, "no space left on device"));
            }
            DiskStorage.write(path, content)
        }

        fn remove(&self, path: &Path) -> io::Result<()> {
            DiskStorage.remove(path)
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        store: UpdateStore,
        storage: Arc<FaultyStorage>,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let bundle = dir.path().join("bundle");
        std::fs::create_dir_all(&bundle).unwrap();
        let bundled = bundle.join(DOCUMENT_FILE);
        std::fs::write(&bundled, "<html>bundled</html>").unwrap();

        let storage = Arc::new(FaultyStorage::default());
        let store = UpdateStore::new(&bundled, dir.path().join("data").join("ui"))
            .with_storage(storage.clone());

        Fixture {
            _dir: dir,
            store,
            storage,
        }
    }

    fn active_content(store: &UpdateStore) -> String {
        std::fs::read_to_string(store.resolve_active().path()).unwrap()
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(UpdaterErrorCode::StorageUnavailable as u32, 5001);
        assert_eq!(UpdaterErrorCode::WriteFailed as u32, 5002);
        let err = UpdaterError::write_failed("disk full");
        assert_eq!(err.code(), UpdaterErrorCode::WriteFailed);
        assert_eq!(err.message(), "disk full");
    }

    #[test]
    fn test_resolve_prefers_bundled_without_override() {
        let f = fixture();
        let first = f.store.resolve_active();
        assert_eq!(first, DocumentLocation::Bundled(f.store.bundled_path().to_path_buf()));
        assert_eq!(f.store.resolve_active(), first);
        assert!(!f.store.override_path().parent().unwrap().exists());
    }

    #[tokio::test]
    async fn test_override_wins_once_written() {
        let f = fixture();
        f.store
            .apply_update(UpdatePayload::direct("<html>A</html>"))
            .await
            .unwrap();

        let active = f.store.resolve_active();
        assert!(active.is_overridden());
        assert_eq!(active_content(&f.store), "<html>A</html>");
        assert_eq!(
            std::fs::read_to_string(f.store.bundled_path()).unwrap(),
            "<html>bundled</html>"
        );
    }

    #[tokio::test]
    async fn test_backup_exists_only_after_second_write() {
        let f = fixture();
        f.store
            .apply_update(UpdatePayload::direct("A"))
            .await
            .unwrap();
        assert!(!f.store.backup_path().exists());

        f.store
            .apply_update(UpdatePayload::direct("B"))
            .await
            .unwrap();
        assert_eq!(std::fs::read_to_string(f.store.backup_path()).unwrap(), "A");
        assert_eq!(active_content(&f.store), "B");
    }

    #[tokio::test]
    async fn test_failed_write_restores_previous_override() {
        let f = fixture();
        f.store.apply_update(UpdatePayload::direct("A")).await.unwrap();
        f.store.apply_update(UpdatePayload::direct("B")).await.unwrap();

        f.storage.fail_write.store(true, Ordering::SeqCst);
        f.storage.partial_write.store(true, Ordering::SeqCst);

        let err = f
            .store
            .apply_update(UpdatePayload::direct("CCCCCCCC"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), UpdaterErrorCode::WriteFailed);
        assert_eq!(err.message(), "no space left on device");
        assert_eq!(active_content(&f.store), "B");
        assert_eq!(f.storage.writes.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_failed_first_write_keeps_bundled_active() {
        let f = fixture();
        f.storage.fail_write.store(true, Ordering::SeqCst);
        f.storage.partial_write.store(true, Ordering::SeqCst);

        assert!(f
            .store
            .apply_update(UpdatePayload::direct("<html>new</html>"))
            .await
            .is_err());
        assert!(!f.store.resolve_active().is_overridden());
        assert_eq!(active_content(&f.store), "<html>bundled</html>");
    }

    #[tokio::test]
    async fn test_backup_failure_is_a_warning() {
        let f = fixture();
        let mut warnings = f.store.subscribe_warnings();

        f.store.apply_update(UpdatePayload::direct("A")).await.unwrap();
        f.storage.fail_copy_to_backup.store(true, Ordering::SeqCst);
        f.store.apply_update(UpdatePayload::direct("B")).await.unwrap();

        assert_eq!(active_content(&f.store), "B");
        match warnings.try_recv().unwrap() {
            UpdateWarning::BackupFailed { message, .. } => assert_eq!(message, "backup disk full"),
            other => panic!("unexpected warning: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_restore_failure_surfaces_original_error() {
        let f = fixture();
        let mut warnings = f.store.subscribe_warnings();

        f.store.apply_update(UpdatePayload::direct("A")).await.unwrap();
        f.store.apply_update(UpdatePayload::direct("B")).await.unwrap();

        f.storage.fail_write.store(true, Ordering::SeqCst);
        f.storage.fail_restore.store(true, Ordering::SeqCst);

        let err = f
            .store
            .apply_update(UpdatePayload::direct("C"))
            .await
            .unwrap_err();
        assert_eq!(err.message(), "no space left on device");
        assert!(matches!(
            warnings.try_recv().unwrap(),
            UpdateWarning::RestoreFailed { .. }
        ));
    }

    #[tokio::test]
    async fn test_revert_returns_to_bundled() {
        let f = fixture();
        f.store.apply_update(UpdatePayload::direct("A")).await.unwrap();
        f.store.apply_update(UpdatePayload::direct("B")).await.unwrap();

        f.store.revert().await.unwrap();
        assert!(!f.store.override_path().exists());
        assert!(!f.store.backup_path().exists());
        assert_eq!(active_content(&f.store), "<html>bundled</html>");

        // Nothing left to remove.
        f.store.revert().await.unwrap();
    }

    #[tokio::test]
    async fn test_override_dir_must_differ_from_bundle() {
        let dir = tempfile::tempdir().unwrap();
        let bundled = dir.path().join(DOCUMENT_FILE);
        std::fs::write(&bundled, "orig").unwrap();

        let store = UpdateStore::new(&bundled, dir.path());
        let err = store
            .apply_update(UpdatePayload::direct("new"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), UpdaterErrorCode::StorageUnavailable);
        assert_eq!(std::fs::read_to_string(&bundled).unwrap(), "orig");
    }
}
