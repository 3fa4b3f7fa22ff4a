//! Error mapping guide:
//! - ProfileNotFound surfaces to the caller and maps to exit code 1.
//! - Registry errors are reported on stderr; they never fail enter/leave bookkeeping.
//! - Corrupt state is recovered by the store (fail-open) and never reaches the CLI.
//! - Map io::ErrorKind::NotFound to exit code 127 when spawning commands; all others to 1.
use std::fmt;
use std::io;

/// Map an io::Error to a process exit code:
/// - 127 for NotFound (command not found)
/// - 1 for all other errors
pub fn exit_code_for_io_error(e: &io::Error) -> u8 {
    if e.kind() == io::ErrorKind::NotFound {
        127
    } else {
        1
    }
}

/// Errors raised by the persisted state store.
#[derive(Debug)]
pub enum StateError {
    Io(io::Error),
    /// The state file exists but could not be parsed.
    Corrupt(String),
    /// Another process held the state lock for longer than the wait budget.
    LockTimeout(std::path::PathBuf),
}

/// Errors raised while talking to the proxy's model management API.
#[derive(Debug)]
pub enum RegistryError {
    /// Transport failure or unhealthy proxy.
    Unavailable(String),
    /// The proxy answered with an unexpected status.
    Http { status: u16, body: String },
    /// A delete call for the given model did not succeed.
    DeletionFailed { model: String, reason: String },
}

/// Errors raised by session enter/leave.
#[derive(Debug)]
pub enum SessionError {
    ProfileNotFound(String),
    State(StateError),
}

impl fmt::Display for StateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateError::Io(e) => write!(f, "state I/O error: {e}"),
            StateError::Corrupt(msg) => write!(f, "state file is corrupt: {msg}"),
            StateError::LockTimeout(p) => write!(
                f,
                "timed out waiting for state lock {} (held by another run-claude process)",
                p.display()
            ),
        }
    }
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::Unavailable(msg) => write!(f, "proxy unavailable: {msg}"),
            RegistryError::Http { status, body } => {
                write!(f, "proxy returned HTTP {status}: {body}")
            }
            RegistryError::DeletionFailed { model, reason } => {
                write!(f, "failed to delete model '{model}': {reason}")
            }
        }
    }
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::ProfileNotFound(name) => write!(f, "Profile not found: {name}"),
            SessionError::State(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for StateError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StateError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl std::error::Error for RegistryError {}

impl std::error::Error for SessionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SessionError::State(e) => Some(e),
            SessionError::ProfileNotFound(_) => None,
        }
    }
}

impl From<io::Error> for StateError {
    fn from(e: io::Error) -> Self {
        StateError::Io(e)
    }
}

impl From<StateError> for SessionError {
    fn from(e: StateError) -> Self {
        SessionError::State(e)
    }
}

impl From<reqwest::Error> for RegistryError {
    fn from(e: reqwest::Error) -> Self {
        RegistryError::Unavailable(e.to_string())
    }
}

/// Convert SessionError to exit code.
pub fn exit_code_for_session_error(e: &SessionError) -> u8 {
    match e {
        SessionError::ProfileNotFound(_) => 1,
        SessionError::State(StateError::Io(ioe)) => exit_code_for_io_error(ioe),
        SessionError::State(_) => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_code_for_io_error_not_found_is_127() {
        let e = io::Error::new(io::ErrorKind::NotFound, "missing");
        assert_eq!(exit_code_for_io_error(&e), 127);
        let e = io::Error::other("boom");
        assert_eq!(exit_code_for_io_error(&e), 1);
    }

    #[test]
    fn test_profile_not_found_message_and_code() {
        let e = SessionError::ProfileNotFound("cerebras".to_string());
        assert_eq!(e.to_string(), "Profile not found: cerebras");
        assert_eq!(exit_code_for_session_error(&e), 1);
    }
}
