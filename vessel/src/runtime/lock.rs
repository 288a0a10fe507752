//! Single-instance lock on the data directory.
//!
//! flock-based; released automatically when the guard drops or the process
//! exits, including crashes.

use std::fs::{File, OpenOptions};
use std::path::Path;

use vessel_shared::constants::filenames;
use vessel_shared::{VesselError, VesselResult};

/// Exclusive lock guard over a data directory.
#[derive(Debug)]
pub struct RuntimeLock {
    #[allow(dead_code)] // held for its lifetime
    file: File,
}

impl RuntimeLock {
    /// Acquire the lock, failing fast if another runtime owns the
    /// directory.
    pub fn acquire(data_dir: &Path) -> VesselResult<Self> {
        std::fs::create_dir_all(data_dir)?;
        let lock_path = data_dir.join(filenames::LOCK);

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(|e| VesselError::Internal(format!("opening lock file: {}", e)))?;

        #[cfg(unix)]
        {
            use std::os::unix::io::AsRawFd;

            // SAFETY: flock on a file we own.
            let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
            if rc != 0 {
                let err = std::io::Error::last_os_error();
                if err.kind() == std::io::ErrorKind::WouldBlock {
                    return Err(VesselError::InUse(format!(
                        "another runtime is already using {}",
                        data_dir.display()
                    )));
                }
                return Err(VesselError::Internal(format!(
                    "acquiring runtime lock: {}",
                    err
                )));
            }
        }

        Ok(Self { file })
    }
}
