// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2024-2026 the mighty-variable-fan-rs contributors

//! PID lock file lifecycle (spec §7 "Lock conflict"), grounded in the
//! original's `create_lock_file`/`clean_exit`/`terminated` trio: refuse to
//! start a second instance against the same lock file unless the process
//! that created it is no longer running, and always clean up on exit
//! (normal return, `SIGINT`, or `SIGTERM`).

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use log::{info, warn};

use crate::error::DetectorError;

/// An acquired, exclusively-held PID lock file. Removed on [`Drop`], so a
/// panic or an early `return` still releases it.
#[derive(Debug)]
pub struct LockFile {
    path: PathBuf,
    held: bool,
}

impl LockFile {
    /// Acquire the lock at `path`, taking over a stale lock (one whose owning
    /// pid is no longer alive) but refusing a live one (spec §7: "Lock
    /// conflict: exit immediately with a clear error, do not wait or retry").
    pub fn acquire(path: impl Into<PathBuf>) -> Result<Self, DetectorError> {
        let path = path.into();
        match Self::try_create(&path) {
            Ok(()) => return Ok(LockFile { path, held: true }),
            Err(DetectorError::LockIo { source, .. })
                if source.kind() == std::io::ErrorKind::AlreadyExists => {}
            Err(other) => return Err(other),
        }

        let existing_pid = Self::read_pid(&path)?;
        if Self::process_alive(existing_pid) {
            return Err(DetectorError::LockHeld {
                path: path.display().to_string(),
                pid: existing_pid,
            });
        }
        warn!(
            "lock file {} was left behind by pid {existing_pid}, which is no longer running; taking it over",
            path.display()
        );
        fs::remove_file(&path).map_err(|source| DetectorError::LockIo {
            path: path.display().to_string(),
            source,
        })?;
        Self::try_create(&path)?;
        Ok(LockFile { path, held: true })
    }

    fn try_create(path: &Path) -> Result<(), DetectorError> {
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(|source| DetectorError::LockIo {
                path: path.display().to_string(),
                source,
            })?;
        write!(file, "{}", std::process::id()).map_err(|source| DetectorError::LockIo {
            path: path.display().to_string(),
            source,
        })?;
        Ok(())
    }

    fn read_pid(path: &Path) -> Result<u32, DetectorError> {
        let mut text = String::new();
        File::open(path)
            .and_then(|mut f| f.read_to_string(&mut text))
            .map_err(|source| DetectorError::LockIo {
                path: path.display().to_string(),
                source,
            })?;
        text.trim().parse().map_err(|_| DetectorError::LockIo {
            path: path.display().to_string(),
            source: std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "lock file does not contain a process id",
            ),
        })
    }

    /// Whether `pid` still refers to a live process, per `kill(pid, 0)`
    /// semantics: success or "operation not permitted" both mean the process
    /// exists; "no such process" means the lock is stale.
    fn process_alive(pid: u32) -> bool {
        let result = unsafe { libc::kill(pid as libc::pid_t, 0) };
        if result == 0 {
            return true;
        }
        std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
    }

    /// Release the lock early. Safe to call more than once; [`Drop`] also
    /// calls this, so explicit cleanup is optional but makes the intent at a
    /// shutdown site explicit.
    pub fn release(&mut self) {
        if self.held {
            if let Err(err) = fs::remove_file(&self.path) {
                warn!("failed to remove lock file {}: {err}", self.path.display());
            } else {
                info!("released lock file {}", self.path.display());
            }
            self.held = false;
        }
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquiring_a_fresh_path_succeeds_and_writes_our_pid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("detector.lock");
        let lock = LockFile::acquire(&path).unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.trim().parse::<u32>().unwrap(), std::process::id());
        drop(lock);
        assert!(!path.exists(), "lock file should be removed on drop");
    }

    #[test]
    fn a_lock_held_by_our_own_live_pid_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("detector.lock");
        std::fs::write(&path, std::process::id().to_string()).unwrap();
        let err = LockFile::acquire(&path).unwrap_err();
        match err {
            DetectorError::LockHeld { pid, .. } => assert_eq!(pid, std::process::id()),
            other => panic!("expected LockHeld, got {other:?}"),
        }
    }

    #[test]
    fn a_stale_lock_from_a_dead_pid_is_taken_over() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("detector.lock");
        // PID 1 belongs to init and is never the pid of this test process,
        // but a genuinely unused, very large pid is a safer stand-in for
        // "no such process" across sandboxes.
        std::fs::write(&path, "2147483000").unwrap();
        let lock = LockFile::acquire(&path);
        assert!(lock.is_ok(), "{lock:?}");
    }
}
