use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::errors::StateError;

/// How long a process waits for another process to release the state lock.
pub const DEFAULT_LOCK_WAIT: Duration = Duration::from_secs(10);
const LOCK_POLL: Duration = Duration::from_millis(25);

/// Exclusive advisory lock over the state file; released on drop.
///
/// The lock file itself is never removed: unlinking it while another process
/// waits on the old inode would let two holders in at once.
#[derive(Debug)]
pub struct StateLock {
    file: File,
    path: PathBuf,
}

impl StateLock {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StateLock {
    fn drop(&mut self) {
        // Best-effort unlock; closing the handle releases it anyway
        let _ = self.file.unlock();
    }
}

fn open_lock_file(p: &Path) -> io::Result<File> {
    if let Some(parent) = p.parent() {
        fs::create_dir_all(parent)?;
    }
    OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .truncate(false)
        .open(p)
}

/// Acquire the lock at `p`, polling until `wait` elapses.
pub fn acquire_lock_at(p: &Path, wait: Duration) -> Result<StateLock, StateError> {
    let file = open_lock_file(p)?;
    let deadline = Instant::now() + wait;
    loop {
        match file.try_lock_exclusive() {
            Ok(()) => {
                return Ok(StateLock {
                    file,
                    path: p.to_path_buf(),
                })
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock || is_contended(&e) => {
                if Instant::now() >= deadline {
                    tracing::warn!(path = %p.display(), "state lock wait exceeded");
                    return Err(StateError::LockTimeout(p.to_path_buf()));
                }
                std::thread::sleep(LOCK_POLL);
            }
            Err(e) => return Err(StateError::Io(e)),
        }
    }
}

/// Try once without waiting; `Ok(None)` when another holder has it.
pub fn try_acquire_lock_at(p: &Path) -> Result<Option<StateLock>, StateError> {
    let file = open_lock_file(p)?;
    match file.try_lock_exclusive() {
        Ok(()) => Ok(Some(StateLock {
            file,
            path: p.to_path_buf(),
        })),
        Err(e) if e.kind() == io::ErrorKind::WouldBlock || is_contended(&e) => Ok(None),
        Err(e) => Err(StateError::Io(e)),
    }
}

fn is_contended(e: &io::Error) -> bool {
    e.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

/// Simple stable 64-bit FNV-1a hash for strings; returns 16-hex lowercase id.
pub fn hash_key_hex(s: &str) -> String {
    const FNV_OFFSET: u64 = 0xcbf29ce484222325;
    const FNV_PRIME: u64 = 1099511628211;
    let mut h: u64 = FNV_OFFSET;
    for b in s.as_bytes() {
        h ^= *b as u64;
        h = h.wrapping_mul(FNV_PRIME);
    }
    format!("{:016x}", h)
}

/// Normalize a directory path string for hashing to a stable key.
pub fn normalized_dir_key(p: &Path) -> String {
    let abs = fs::canonicalize(p).unwrap_or_else(|_| p.to_path_buf());
    abs.to_string_lossy().to_string()
}

/// Stable session token for a directory (hash of its canonical path).
pub fn directory_token(p: &Path) -> String {
    hash_key_hex(&normalized_dir_key(p))
}
