//! ext_fs - File arbiter for Ren3D
//!
//! Native open/save dialogs and the raw file I/O behind the `open-file` and
//! `save-file` bridge operations. File contents are opaque: the arbiter reads
//! bytes and writes text without looking at either.

use ext_bridge::{FileFilter, OpenedFile, SaveFileArgs, SaveFileResult};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, warn};

// ============================================================================
// Error Types with Structured Codes
// ============================================================================

/// Error codes for filesystem operations (for machine-readable errors)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum FsErrorCode {
    /// Generic IO error
    Io = 3000,
    /// Permission denied by capability system
    PermissionDenied = 3001,
    /// File or directory not found
    NotFound = 3002,
    /// File already exists
    AlreadyExists = 3003,
    /// Path is a directory, expected file
    IsDirectory = 3004,
}

/// Custom error type for FS operations
#[derive(Debug, thiserror::Error)]
pub enum FsError {
    #[error("[{code}] IO error: {message}")]
    Io { code: u32, message: String },

    #[error("[{code}] Permission denied: {message}")]
    PermissionDenied { code: u32, message: String },

    #[error("[{code}] Not found: {message}")]
    NotFound { code: u32, message: String },

    #[error("[{code}] Already exists: {message}")]
    AlreadyExists { code: u32, message: String },

    #[error("[{code}] Is directory: {message}")]
    IsDirectory { code: u32, message: String },
}

impl FsError {
    pub fn io(message: impl Into<String>) -> Self {
        Self::Io {
            code: FsErrorCode::Io as u32,
            message: message.into(),
        }
    }

    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::PermissionDenied {
            code: FsErrorCode::PermissionDenied as u32,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            code: FsErrorCode::NotFound as u32,
            message: message.into(),
        }
    }

    pub fn already_exists(message: impl Into<String>) -> Self {
        Self::AlreadyExists {
            code: FsErrorCode::AlreadyExists as u32,
            message: message.into(),
        }
    }

    pub fn is_directory(message: impl Into<String>) -> Self {
        Self::IsDirectory {
            code: FsErrorCode::IsDirectory as u32,
            message: message.into(),
        }
    }

    /// The underlying message, without the code prefix.
    pub fn message(&self) -> &str {
        match self {
            Self::Io { message, .. }
            | Self::PermissionDenied { message, .. }
            | Self::NotFound { message, .. }
            | Self::AlreadyExists { message, .. }
            | Self::IsDirectory { message, .. } => message,
        }
    }
}

impl From<std::io::Error> for FsError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::NotFound => Self::not_found(e.to_string()),
            std::io::ErrorKind::AlreadyExists => Self::already_exists(e.to_string()),
            std::io::ErrorKind::PermissionDenied => Self::permission_denied(e.to_string()),
            std::io::ErrorKind::IsADirectory => Self::is_directory(e.to_string()),
            _ => Self::io(e.to_string()),
        }
    }
}

// ============================================================================
// Filters
// ============================================================================

/// Extension of Ren3D project files.
pub const PROJECT_EXTENSION: &str = "r3d";

/// Filters offered by the open dialog.
pub fn open_filters() -> Vec<FileFilter> {
    vec![
        FileFilter::new("3D Models", &["stl", "obj"]),
        FileFilter::new("Ren3D Project", &[PROJECT_EXTENSION]),
        FileFilter::new("All Files", &["*"]),
    ]
}

/// Default save filters derived from the suggested file name.
///
/// Unknown extensions get no filter at all.
pub fn default_filters(suggested_name: &str) -> Vec<FileFilter> {
    let ext = Path::new(suggested_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    let primary = match ext.as_deref() {
        Some("stl") => FileFilter::new("STL Files", &["stl"]),
        Some("obj") => FileFilter::new("OBJ Files", &["obj"]),
        Some(PROJECT_EXTENSION) => FileFilter::new("Ren3D Project", &[PROJECT_EXTENSION]),
        _ => return Vec::new(),
    };

    vec![primary, FileFilter::new("All Files", &["*"])]
}

// ============================================================================
// Dialogs
// ============================================================================

/// Options for the open dialog
#[derive(Debug, Clone, Default)]
pub struct OpenDialogOpts {
    pub title: Option<String>,
    pub directory: Option<PathBuf>,
    pub filters: Vec<FileFilter>,
}

/// Options for the save dialog
#[derive(Debug, Clone, Default)]
pub struct SaveDialogOpts {
    pub title: Option<String>,
    pub directory: Option<PathBuf>,
    pub file_name: String,
    pub filters: Vec<FileFilter>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MessageLevel {
    #[default]
    Info,
    Warning,
    Error,
}

/// Options for a message box
#[derive(Debug, Clone, Default)]
pub struct MessageOpts {
    pub title: String,
    pub message: String,
    pub detail: Option<String>,
    pub level: MessageLevel,
}

/// Native dialog surface. Dialogs block until dismissed; `None` means the user
/// cancelled.
pub trait DialogProvider: Send + Sync {
    fn pick_file(&self, opts: &OpenDialogOpts) -> Option<PathBuf>;
    fn save_file(&self, opts: &SaveDialogOpts) -> Option<PathBuf>;
    fn message(&self, opts: &MessageOpts);
}

/// Dialogs backed by the platform's native file chooser.
///
/// Must be called from the thread that runs the event loop on macOS.
pub struct NativeDialogs;

fn apply_filters(mut dialog: rfd::FileDialog, filters: &[FileFilter]) -> rfd::FileDialog {
    for filter in filters {
        let exts: Vec<&str> = filter.extensions.iter().map(|s| s.as_str()).collect();
        dialog = dialog.add_filter(&filter.name, &exts);
    }
    dialog
}

impl DialogProvider for NativeDialogs {
    fn pick_file(&self, opts: &OpenDialogOpts) -> Option<PathBuf> {
        let mut dialog = rfd::FileDialog::new();

        if let Some(ref title) = opts.title {
            dialog = dialog.set_title(title);
        }
        if let Some(ref directory) = opts.directory {
            dialog = dialog.set_directory(directory);
        }

        apply_filters(dialog, &opts.filters).pick_file()
    }

    fn save_file(&self, opts: &SaveDialogOpts) -> Option<PathBuf> {
        let mut dialog = rfd::FileDialog::new().set_file_name(&opts.file_name);

        if let Some(ref title) = opts.title {
            dialog = dialog.set_title(title);
        }
        if let Some(ref directory) = opts.directory {
            dialog = dialog.set_directory(directory);
        }

        apply_filters(dialog, &opts.filters).save_file()
    }

    fn message(&self, opts: &MessageOpts) {
        let level = match opts.level {
            MessageLevel::Info => rfd::MessageLevel::Info,
            MessageLevel::Warning => rfd::MessageLevel::Warning,
            MessageLevel::Error => rfd::MessageLevel::Error,
        };

        let description = match opts.detail {
            Some(ref detail) => format!("{}\n\n{}", opts.message, detail),
            None => opts.message.clone(),
        };

        rfd::MessageDialog::new()
            .set_level(level)
            .set_title(&opts.title)
            .set_description(&description)
            .set_buttons(rfd::MessageButtons::Ok)
            .show();
    }
}

// ============================================================================
// Capability Checker
// ============================================================================

/// Capability checker trait - allows the host to fence off paths
pub trait FsCapabilityChecker: Send + Sync {
    fn check_read(&self, path: &str) -> Result<(), String>;
    fn check_write(&self, path: &str) -> Result<(), String>;
}

/// Default permissive checker (for dev mode or when no checker is provided)
pub struct PermissiveChecker;

impl FsCapabilityChecker for PermissiveChecker {
    fn check_read(&self, _path: &str) -> Result<(), String> {
        Ok(())
    }
    fn check_write(&self, _path: &str) -> Result<(), String> {
        Ok(())
    }
}

// ============================================================================
// Arbiter
// ============================================================================

/// A pending save request, consumed by [`FileArbiter::save`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveTarget {
    pub suggested_name: String,
    pub content: String,
    pub explicit_dialog: bool,
    pub existing_path: Option<PathBuf>,
    pub filters: Option<Vec<FileFilter>>,
}

impl From<SaveFileArgs> for SaveTarget {
    fn from(args: SaveFileArgs) -> Self {
        Self {
            suggested_name: args.default_name,
            content: args.content,
            explicit_dialog: args.save_as,
            existing_path: args
                .existing_path
                .filter(|p| !p.trim().is_empty())
                .map(PathBuf::from),
            filters: args.filters,
        }
    }
}

#[derive(Debug)]
pub enum SaveOutcome {
    Saved(PathBuf),
    Cancelled,
    Failed(FsError),
}

impl SaveOutcome {
    pub fn into_result(self) -> SaveFileResult {
        match self {
            SaveOutcome::Saved(path) => SaveFileResult::saved(path.to_string_lossy()),
            SaveOutcome::Cancelled => SaveFileResult::cancelled(),
            SaveOutcome::Failed(e) => SaveFileResult::failed(e.message()),
        }
    }
}

#[derive(Debug)]
pub enum OpenOutcome {
    Opened(OpenedFile),
    Cancelled,
    ReadFailed { path: PathBuf, error: FsError },
}

impl OpenOutcome {
    /// Wire form: read failures look like a cancelled dialog.
    pub fn into_wire(self) -> Option<OpenedFile> {
        match self {
            OpenOutcome::Opened(file) => Some(file),
            OpenOutcome::Cancelled | OpenOutcome::ReadFailed { .. } => None,
        }
    }
}

pub struct FileArbiter {
    dialogs: Arc<dyn DialogProvider>,
    checker: Arc<dyn FsCapabilityChecker>,
}

impl FileArbiter {
    pub fn new(dialogs: Arc<dyn DialogProvider>) -> Self {
        Self {
            dialogs,
            checker: Arc::new(PermissiveChecker),
        }
    }

    pub fn with_checker(mut self, checker: Arc<dyn FsCapabilityChecker>) -> Self {
        self.checker = checker;
        self
    }

    pub fn dialogs(&self) -> &Arc<dyn DialogProvider> {
        &self.dialogs
    }

    /// Let the user pick a model or project file and read it whole.
    pub fn open(&self) -> OpenOutcome {
        let opts = OpenDialogOpts {
            title: None,
            directory: None,
            filters: open_filters(),
        };

        let Some(path) = self.dialogs.pick_file(&opts) else {
            debug!("open dialog cancelled");
            return OpenOutcome::Cancelled;
        };

        let path_str = path.to_string_lossy().to_string();
        let read = self
            .checker
            .check_read(&path_str)
            .map_err(FsError::permission_denied)
            .and_then(|_| std::fs::read(&path).map_err(FsError::from));

        match read {
            Ok(bytes) => {
                debug!(path = %path_str, len = bytes.len(), "file opened");
                let name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_else(|| path_str.clone());
                OpenOutcome::Opened(OpenedFile {
                    name,
                    path: path_str,
                    bytes,
                })
            }
            Err(e) => {
                warn!(path = %path_str, error = %e, "failed to read picked file");
                OpenOutcome::ReadFailed { path, error: e }
            }
        }
    }

    /// Persist `target.content`, asking for a path first when needed.
    pub fn save(&self, target: SaveTarget) -> SaveOutcome {
        let path = match target.existing_path {
            Some(ref existing) if !target.explicit_dialog => existing.clone(),
            _ => {
                let opts = SaveDialogOpts {
                    title: None,
                    directory: target
                        .existing_path
                        .as_deref()
                        .and_then(Path::parent)
                        .filter(|dir| !dir.as_os_str().is_empty())
                        .map(Path::to_path_buf),
                    file_name: target.suggested_name.clone(),
                    filters: target
                        .filters
                        .clone()
                        .unwrap_or_else(|| default_filters(&target.suggested_name)),
                };

                match self.dialogs.save_file(&opts) {
                    Some(path) => path,
                    None => {
                        debug!(name = %target.suggested_name, "save dialog cancelled");
                        return SaveOutcome::Cancelled;
                    }
                }
            }
        };

        let path_str = path.to_string_lossy().to_string();
        if let Err(reason) = self.checker.check_write(&path_str) {
            warn!(path = %path_str, "write denied: {}", reason);
            return SaveOutcome::Failed(FsError::permission_denied(reason));
        }

        match std::fs::write(&path, target.content.as_bytes()) {
            Ok(()) => {
                debug!(path = %path_str, len = target.content.len(), "file saved");
                SaveOutcome::Saved(path)
            }
            Err(e) => {
                error!(path = %path_str, error = %e, "failed to save file");
                SaveOutcome::Failed(FsError::from(e))
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
