//! Durable state store with cross-process read-modify-write.
//!
//! - `transact` holds the exclusive lock across load -> mutate -> save.
//! - Saves go through a temp file in the same directory and a rename, so readers
//!   never observe a half-written file.
//! - Unreadable or invalid state resets to empty (fail-open) with a warning.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::errors::StateError;
use crate::lock::{acquire_lock_at, StateLock, DEFAULT_LOCK_WAIT};
use crate::state::State;

#[derive(Debug, Clone)]
pub struct StateStore {
    dir: PathBuf,
    lock_wait: Duration,
}

impl StateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        StateStore {
            dir: dir.into(),
            lock_wait: DEFAULT_LOCK_WAIT,
        }
    }

    /// Store rooted at the default XDG state directory.
    pub fn default_location() -> Self {
        StateStore::new(crate::paths::state_dir())
    }

    pub fn with_lock_wait(mut self, wait: Duration) -> Self {
        self.lock_wait = wait;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn state_file(&self) -> PathBuf {
        self.dir.join(crate::paths::STATE_FILE_NAME)
    }

    pub fn lock_file(&self) -> PathBuf {
        self.dir.join(crate::paths::LOCK_FILE_NAME)
    }

    pub fn lock(&self) -> Result<StateLock, StateError> {
        acquire_lock_at(&self.lock_file(), self.lock_wait)
    }

    /// Read the current state without locking (for display only).
    pub fn load(&self) -> State {
        match self.try_load() {
            Ok(st) => st,
            Err(e) => {
                tracing::warn!(error = %e, path = %self.state_file().display(), "resetting unreadable state");
                State::default()
            }
        }
    }

    /// Strict read: missing file is an empty state, anything unparsable is `Corrupt`.
    pub fn try_load(&self) -> Result<State, StateError> {
        let path = self.state_file();
        let text = match fs::read_to_string(&path) {
            Ok(t) => t,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(State::default()),
            Err(e) => return Err(StateError::Io(e)),
        };
        if text.trim().is_empty() {
            return Ok(State::default());
        }
        serde_json::from_str(&text).map_err(|e| StateError::Corrupt(e.to_string()))
    }

    /// Write the full state atomically. Callers mutating state should hold the lock.
    pub fn save(&self, state: &State) -> Result<(), StateError> {
        fs::create_dir_all(&self.dir)?;
        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(state.to_json_pretty().as_bytes())?;
        tmp.write_all(b"\n")?;
        tmp.as_file().sync_all()?;
        tmp.persist(self.state_file()).map_err(|e| StateError::Io(e.error))?;
        Ok(())
    }

    /// Locked read-modify-write. The closure's result is returned after the save.
    pub fn transact<T, F>(&self, f: F) -> Result<T, StateError>
    where
        F: FnOnce(&mut State) -> T,
    {
        let _guard = self.lock()?;
        let mut state = self.load();
        let out = f(&mut state);
        self.save(&state)?;
        Ok(out)
    }

    /// Like `transact`, but skips the write when the closure reports no change.
    pub fn transact_if<T, F>(&self, f: F) -> Result<T, StateError>
    where
        F: FnOnce(&mut State) -> (T, bool),
    {
        let _guard = self.lock()?;
        let mut state = self.load();
        let (out, changed) = f(&mut state);
        if changed {
            self.save(&state)?;
        }
        Ok(out)
    }
}
