//! Single-instance guard: an exclusively-locked pidfile held for the life of
//! the process (spec §4.11). Unlike a bare existence check, `flock` releases
//! automatically if the previous holder died without cleaning up, so a stale
//! pidfile from a crashed run never blocks a fresh start.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::os::fd::AsRawFd;
use std::path::Path;

use crate::error::EnvironmentError;

/// Holds the pidfile's file descriptor for the guard's lifetime; dropping it
/// releases the `flock` and, best-effort, removes the file.
pub struct PidFile {
    file: File,
    path: std::path::PathBuf,
}

impl PidFile {
    pub fn acquire(path: &Path) -> Result<Self, EnvironmentError> {
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(path)
            .map_err(|source| EnvironmentError::PidfileUnavailable {
                path: path.to_path_buf(),
                source,
            })?;

        let ret = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
        if ret != 0 {
            return Err(EnvironmentError::PidfileUnavailable {
                path: path.to_path_buf(),
                source: std::io::Error::last_os_error(),
            });
        }

        file.set_len(0).ok();
        writeln!(file, "{}", std::process::id()).map_err(|source| EnvironmentError::PidfileUnavailable {
            path: path.to_path_buf(),
            source,
        })?;

        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        let _ = unsafe { libc::flock(self.file.as_raw_fd(), libc::LOCK_UN) };
        let _ = std::fs::remove_file(&self.path);
    }
}
