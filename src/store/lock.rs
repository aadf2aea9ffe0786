use std::{
    fs::{File, OpenOptions},
    io,
    os::unix::{fs::OpenOptionsExt, io::AsRawFd},
    path::PathBuf,
};

use tracing::{debug, instrument};

/// Exclusive `flock` on an interface's lock file, released on drop.
#[derive(Debug)]
pub struct InterfaceLock {
    file: File,
    path: PathBuf,
}

impl InterfaceLock {
    #[instrument(skip_all, fields(path = %path.display()))]
    pub async fn acquire(path: PathBuf) -> io::Result<Self> {
        tokio::task::spawn_blocking(move || Self::acquire_blocking(path))
            .await
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?
    }

    fn acquire_blocking(path: PathBuf) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .mode(0o600)
            .open(&path)?;

        loop {
            // SAFETY: the descriptor belongs to `file`, which outlives the call.
            if unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX) } == 0 {
                break;
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(err);
            }
        }
        debug!("lock acquired");

        Ok(Self { file, path })
    }
}

impl Drop for InterfaceLock {
    fn drop(&mut self) {
        // SAFETY: see `acquire_blocking`.
        unsafe { libc::flock(self.file.as_raw_fd(), libc::LOCK_UN) };
        debug!(path = %self.path.display(), "lock released");
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tempfile::TempDir;

    use super::*;

    #[tokio::test]
    async fn second_lock_waits_for_first() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(".wg0.lock");

        let first = InterfaceLock::acquire(path.clone()).await.unwrap();
        let waiter = tokio::spawn(InterfaceLock::acquire(path.clone()));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!waiter.is_finished());

        drop(first);
        tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }
}
