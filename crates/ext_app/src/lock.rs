//! Single instance lock.
//!
//! The lock is a file created with `create_new` that holds the owner's PID.
//! A lock whose owner is no longer running is stale and gets reclaimed.
//! Losing instances leave a focus marker that the owner polls for.

use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};
use tracing::{debug, error, warn};

use crate::{AppError, AppPaths};

/// Result of trying to become the running instance.
#[derive(Debug)]
pub enum LockOutcome {
    Acquired(InstanceLock),
    /// Another live process owns the lock.
    Held { pid: Option<u32> },
}

/// Guard for the single instance lock. The lock file is removed on drop.
#[derive(Debug)]
pub struct InstanceLock {
    lock_path: PathBuf,
    focus_path: PathBuf,
}

impl InstanceLock {
    pub fn acquire(paths: &AppPaths, identifier: &str) -> Result<LockOutcome, AppError> {
        Self::acquire_with(paths, identifier, is_process_alive)
    }

    /// Like [`InstanceLock::acquire`] with a custom liveness check.
    pub fn acquire_with(
        paths: &AppPaths,
        identifier: &str,
        is_alive: impl Fn(u32) -> bool,
    ) -> Result<LockOutcome, AppError> {
        std::fs::create_dir_all(paths.root()).map_err(|e| AppError::lock_failed(e.to_string()))?;

        let lock_path = paths.lock_path(identifier);

        // Second pass only after removing a stale lock.
        for _ in 0..2 {
            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&lock_path)
            {
                Ok(mut file) => {
                    write!(file, "{}", std::process::id())
                        .map_err(|e| AppError::lock_failed(e.to_string()))?;
                    debug!("Single instance lock acquired: {:?}", lock_path);
                    return Ok(LockOutcome::Acquired(InstanceLock {
                        lock_path,
                        focus_path: paths.focus_marker_path(identifier),
                    }));
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => match read_owner(&lock_path) {
                    Some(pid) if is_alive(pid) => {
                        debug!(pid = pid, "Single instance lock already held by another instance");
                        return Ok(LockOutcome::Held { pid: Some(pid) });
                    }
                    owner => {
                        warn!(owner = ?owner, "Reclaiming stale instance lock {:?}", lock_path);
                        match std::fs::remove_file(&lock_path) {
                            Ok(()) => {}
                            Err(e) if e.kind() == ErrorKind::NotFound => {}
                            Err(e) => return Err(AppError::lock_failed(e.to_string())),
                        }
                    }
                },
                Err(e) => {
                    error!("Failed to create lock file: {}", e);
                    return Err(AppError::lock_failed(e.to_string()));
                }
            }
        }

        // Someone else won the race for the reclaimed lock.
        Ok(LockOutcome::Held { pid: None })
    }

    pub fn path(&self) -> &Path {
        &self.lock_path
    }

    /// Consume a pending focus request from a second instance.
    pub fn take_focus_request(&self) -> bool {
        match std::fs::remove_file(&self.focus_path) {
            Ok(()) => {
                debug!("Focus requested by second instance");
                true
            }
            Err(_) => false,
        }
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.lock_path) {
            if e.kind() != ErrorKind::NotFound {
                error!("Failed to remove lock file: {}", e);
            }
        } else {
            debug!("Single instance lock released");
        }
        let _ = std::fs::remove_file(&self.focus_path);
    }
}

/// Ask the running instance to bring its window to the front.
pub fn request_focus(paths: &AppPaths, identifier: &str) -> Result<(), AppError> {
    std::fs::write(
        paths.focus_marker_path(identifier),
        std::process::id().to_string(),
    )
    .map_err(|e| AppError::focus_failed(e.to_string()))
}

pub fn is_process_alive(pid: u32) -> bool {
    let pid = Pid::from_u32(pid);
    let mut system = System::new();
    system.refresh_processes_specifics(
        ProcessesToUpdate::Some(&[pid]),
        false,
        ProcessRefreshKind::new(),
    );
    system.process(pid).is_some()
}

fn read_owner(path: &Path) -> Option<u32> {
    std::fs::read_to_string(path)
        .ok()
        .and_then(|s| s.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paths() -> (tempfile::TempDir, AppPaths) {
        let dir = tempfile::tempdir().unwrap();
        let paths = AppPaths::new(dir.path().join("ren3d"));
        (dir, paths)
    }

    #[test]
    fn test_acquire_writes_pid_and_releases_on_drop() {
        let (_dir, paths) = paths();
        let lock = match InstanceLock::acquire_with(&paths, "test.app", |_| true).unwrap() {
            LockOutcome::Acquired(lock) => lock,
            other => panic!("expected lock, got {:?}", other),
        };

        let owner = std::fs::read_to_string(lock.path()).unwrap();
        assert_eq!(owner, std::process::id().to_string());

        let path = lock.path().to_path_buf();
        drop(lock);
        assert!(!path.exists());
    }

    #[test]
    fn test_second_acquire_is_held() {
        let (_dir, paths) = paths();
        let _first = InstanceLock::acquire_with(&paths, "test.app", |_| true).unwrap();

        match InstanceLock::acquire_with(&paths, "test.app", |_| true).unwrap() {
            LockOutcome::Held { pid } => assert_eq!(pid, Some(std::process::id())),
            other => panic!("expected held lock, got {:?}", other),
        }
    }

    #[test]
    fn test_stale_lock_is_reclaimed() {
        let (_dir, paths) = paths();
        std::fs::create_dir_all(paths.root()).unwrap();
        std::fs::write(paths.lock_path("test.app"), "999999").unwrap();

        let outcome = InstanceLock::acquire_with(&paths, "test.app", |pid| pid != 999999).unwrap();
        assert!(matches!(outcome, LockOutcome::Acquired(_)));
        assert_eq!(
            std::fs::read_to_string(paths.lock_path("test.app")).unwrap(),
            std::process::id().to_string()
        );
    }

    #[test]
    fn test_garbage_lock_is_reclaimed() {
        let (_dir, paths) = paths();
        std::fs::create_dir_all(paths.root()).unwrap();
        std::fs::write(paths.lock_path("test.app"), "not a pid").unwrap();

        let outcome = InstanceLock::acquire_with(&paths, "test.app", |_| true).unwrap();
        assert!(matches!(outcome, LockOutcome::Acquired(_)));
    }

    #[test]
    fn test_focus_request_round_trip() {
        let (_dir, paths) = paths();
        let lock = match InstanceLock::acquire_with(&paths, "test.app", |_| true).unwrap() {
            LockOutcome::Acquired(lock) => lock,
            other => panic!("expected lock, got {:?}", other),
        };

        assert!(!lock.take_focus_request());
        request_focus(&paths, "test.app").unwrap();
        assert!(lock.take_focus_request());
        assert!(!lock.take_focus_request());
    }

    #[test]
    fn test_current_process_is_alive() {
        assert!(is_process_alive(std::process::id()));
    }
}
