//! Single instance lock using Unix socket.
//!
//! Two bridges on one coordinator would fight over the radio and register
//! the same endpoints twice. The lock is a Unix socket, which the OS cleans
//! up when the process dies, so there are no stale lock files.

use std::io;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use thiserror::Error;

const SOCKET_NAME: &str = "zigbee-matter-bridge.sock";

#[derive(Debug, Error)]
pub enum InstanceLockError {
    #[error("another bridge instance is already running")]
    AlreadyRunning,

    #[error("failed to acquire instance lock: {0}")]
    Io(#[from] io::Error),
}

/// Held for the lifetime of the process. Dropping it removes the socket.
pub struct InstanceLock {
    _listener: UnixListener,
    path: PathBuf,
}

impl InstanceLock {
    /// Acquire the lock in `$XDG_RUNTIME_DIR`, or `/tmp` without it.
    pub fn acquire() -> Result<Self, InstanceLockError> {
        let runtime_dir = std::env::var_os("XDG_RUNTIME_DIR").map(PathBuf::from);
        Self::acquire_at(socket_path(runtime_dir.as_deref()))
    }

    pub fn acquire_at(path: PathBuf) -> Result<Self, InstanceLockError> {
        if path.exists() {
            // a socket nobody answers on was left by a killed process
            if UnixStream::connect(&path).is_ok() {
                return Err(InstanceLockError::AlreadyRunning);
            }
            let _ = std::fs::remove_file(&path);
        }

        match UnixListener::bind(&path) {
            Ok(listener) => Ok(Self {
                _listener: listener,
                path,
            }),
            Err(e) if e.kind() == io::ErrorKind::AddrInUse => Err(InstanceLockError::AlreadyRunning),
            Err(e) => Err(InstanceLockError::Io(e)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Lock socket location for a given runtime directory.
pub fn socket_path(runtime_dir: Option<&Path>) -> PathBuf {
    runtime_dir
        .unwrap_or_else(|| Path::new("/tmp"))
        .join(SOCKET_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("zmb-lock-{}-{}", name, std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_socket_path_uses_runtime_dir() {
        assert_eq!(
            socket_path(Some(Path::new("/run/user/1000"))),
            PathBuf::from("/run/user/1000/zigbee-matter-bridge.sock")
        );
    }

    #[test]
    fn test_socket_path_fallback_to_tmp() {
        assert_eq!(socket_path(None), PathBuf::from("/tmp/zigbee-matter-bridge.sock"));
    }

    #[test]
    fn test_second_instance_is_refused() {
        let path = socket_path(Some(&scratch_dir("second")));
        let lock = InstanceLock::acquire_at(path.clone()).unwrap();
        assert!(matches!(
            InstanceLock::acquire_at(path.clone()),
            Err(InstanceLockError::AlreadyRunning)
        ));
        drop(lock);
        assert!(!path.exists());
        InstanceLock::acquire_at(path).unwrap();
    }

    #[test]
    fn test_stale_socket_is_replaced() {
        let path = socket_path(Some(&scratch_dir("stale")));
        // bound then dropped without cleanup leaves a dead socket file
        drop(UnixListener::bind(&path).unwrap());
        assert!(path.exists());
        let lock = InstanceLock::acquire_at(path.clone()).unwrap();
        assert_eq!(lock.path(), path.as_path());
    }
}
