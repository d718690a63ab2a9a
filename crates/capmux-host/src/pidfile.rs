use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::{HostError, Result};

/// Guards against a second live instance on the same base path.
///
/// The file is removed by [`PidFile::release`] or, failing that, on drop.
#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
    released: bool,
}

impl PidFile {
    /// Writes the current pid to `path`, unless it names a process that is
    /// still alive. Stale or unreadable files are overwritten.
    pub fn acquire(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let own = std::process::id();

        if let Some(pid) = read_pid(&path) {
            if pid != own && is_alive(pid) {
                return Err(HostError::AlreadyRunning { pid, path });
            }
            debug!(pid = pid, path = %path.display(), "replacing stale pid file");
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, own.to_string())?;
        info!(pid = own, path = %path.display(), "pid file written");

        Ok(Self {
            path,
            released: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        match fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "pid file removed"),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {}
            Err(error) => {
                warn!(path = %self.path.display(), error = %error, "failed to remove pid file")
            }
        }
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        self.release();
    }
}

fn read_pid(path: &Path) -> Option<u32> {
    fs::read_to_string(path).ok()?.trim().parse().ok()
}

#[cfg(unix)]
fn is_alive(pid: u32) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    if pid <= 0 {
        return false;
    }
    // Signal 0 only checks that the process exists and may be signalled.
    let rc = unsafe { libc::kill(pid, 0) };
    rc == 0 || std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(not(unix))]
fn is_alive(_pid: u32) -> bool {
    false
}
