//! Application lifecycle for Ren3D
//!
//! Provides:
//! - Per-user application paths
//! - Single instance locking with second-instance focus requests
//! - The session state machine driving window lifecycle
//! - Menu model and key forwarding
//! - The bridge handler composing file, update and fetch services

use std::path::{Path, PathBuf};

pub mod keys;
pub mod lock;
pub mod menu;
pub mod services;
pub mod session;

pub use keys::Accelerator;
pub use lock::{is_process_alive, request_focus, InstanceLock, LockOutcome};
pub use menu::{MenuAction, MenuEntry, MenuItemSpec, MenuModel, Submenu};
pub use services::{HostServices, SessionCommand};
pub use session::{document_url, Session, SessionAction, SessionState};

// ============================================================================
// Error Types
// ============================================================================

/// Error codes for app operations (8300-8319)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppErrorCode {
    /// Failed to get path (8304)
    PathFailed = 8304,
    /// Single instance lock failed (8305)
    LockFailed = 8305,
    /// Failed to focus application (8306)
    FocusFailed = 8306,
    /// Accelerator string could not be parsed (8315)
    InvalidAccelerator = 8315,
    /// Fetching or applying a UI update failed (8316)
    UpdateFailed = 8316,
}

impl std::fmt::Display for AppErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", *self as i32)
    }
}

/// Errors that can occur during app operations
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("[{code}] Failed to get path: {message}")]
    PathFailed { code: AppErrorCode, message: String },

    #[error("[{code}] Single instance lock failed: {message}")]
    LockFailed { code: AppErrorCode, message: String },

    #[error("[{code}] Failed to focus application: {message}")]
    FocusFailed { code: AppErrorCode, message: String },

    #[error("[{code}] Invalid accelerator: {message}")]
    InvalidAccelerator { code: AppErrorCode, message: String },

    #[error("[{code}] Update failed: {message}")]
    UpdateFailed { code: AppErrorCode, message: String },
}

impl AppError {
    pub fn path_failed(message: impl Into<String>) -> Self {
        Self::PathFailed {
            code: AppErrorCode::PathFailed,
            message: message.into(),
        }
    }

    pub fn lock_failed(message: impl Into<String>) -> Self {
        Self::LockFailed {
            code: AppErrorCode::LockFailed,
            message: message.into(),
        }
    }

    pub fn focus_failed(message: impl Into<String>) -> Self {
        Self::FocusFailed {
            code: AppErrorCode::FocusFailed,
            message: message.into(),
        }
    }

    pub fn invalid_accelerator(message: impl Into<String>) -> Self {
        Self::InvalidAccelerator {
            code: AppErrorCode::InvalidAccelerator,
            message: message.into(),
        }
    }

    pub fn update_failed(message: impl Into<String>) -> Self {
        Self::UpdateFailed {
            code: AppErrorCode::UpdateFailed,
            message: message.into(),
        }
    }
}

// ============================================================================
// Paths
// ============================================================================

/// Per-user directories of the application. Nothing here is ever inside the
/// application bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppPaths {
    root: PathBuf,
}

impl AppPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// `<data dir>/<dir_name>` for the current user.
    pub fn for_user(dir_name: &str) -> Result<Self, AppError> {
        dirs::data_dir()
            .map(|dir| Self::new(dir.join(dir_name)))
            .ok_or_else(|| AppError::path_failed("no user data directory on this system"))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Receives UI document overrides.
    pub fn ui_dir(&self) -> PathBuf {
        self.root.join("ui")
    }

    pub fn crash_dir(&self) -> PathBuf {
        self.root.join("crashes")
    }

    pub fn lock_path(&self, identifier: &str) -> PathBuf {
        self.root.join(format!("{}.lock", identifier))
    }

    pub fn focus_marker_path(&self, identifier: &str) -> PathBuf {
        self.root.join(format!("{}.focus", identifier))
    }
}

// ============================================================================
// Tests
// ============================================================================
