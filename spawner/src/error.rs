//! Error taxonomy for launching and stream I/O.
//!
//! OS-call failures carry the failing primitive's name and status; everything
//! else is either an illegal-state error (operating on a closed endpoint), a
//! contract violation caught before any OS call, or an internal invariant
//! violation that is never retried.

#[cfg(windows)]
pub mod windows;

use thiserror::Error;

#[cfg(windows)]
pub use windows::Win32Error;

pub type Result<T, E = SpawnError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum SpawnError {
    /// A Win32 primitive failed; carries the API name, status code, formatted
    /// system message and call context.
    #[cfg(windows)]
    #[error("{0}")]
    Win32(#[from] Win32Error),

    /// An OS call surfaced through the standard library failed.
    #[error("os call failed: {0}")]
    Io(#[from] std::io::Error),

    /// The spec's command line was empty.
    #[error("command line must contain at least one argument")]
    EmptyCommandLine,

    /// An operation was attempted on an already-closed stream endpoint.
    #[error("{0} is already closed")]
    StreamClosed(&'static str),

    /// A finite wait timeout must be positive.
    #[error("wait timeout must be positive")]
    InvalidTimeout,

    /// The requested disposition cannot be expressed on this platform.
    #[error("{disposition} is not supported for {stream} on this platform")]
    UnsupportedDisposition {
        stream: &'static str,
        disposition: &'static str,
    },

    /// The OS accepted fewer bytes than requested on a primitive that is
    /// expected to take the whole buffer in one call. Unrecoverable.
    #[error("short write: {written} of {requested} bytes accepted")]
    ShortWrite { requested: usize, written: usize },

    /// An internal invariant was violated.
    #[error("internal invariant violated: {0}")]
    Internal(&'static str),

    /// Launching failed and one or more rollback steps failed too; the
    /// rollback failures are attached as suppressed secondaries.
    #[error("launch failed: {source}")]
    LaunchFailed {
        #[source]
        source: Box<SpawnError>,
        suppressed: Vec<SpawnError>,
    },
}

impl SpawnError {
    /// Secondary failures swallowed while unwinding a failed launch; empty
    /// for every other error.
    pub fn suppressed(&self) -> &[SpawnError] {
        match self {
            SpawnError::LaunchFailed { suppressed, .. } => suppressed,
            _ => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suppressed_is_empty_outside_rollback() {
        assert!(SpawnError::EmptyCommandLine.suppressed().is_empty());
    }

    #[test]
    fn launch_failure_keeps_primary_and_secondaries() {
        let error = SpawnError::LaunchFailed {
            source: Box::new(SpawnError::EmptyCommandLine),
            suppressed: vec![SpawnError::StreamClosed("pipe read end")],
        };
        assert_eq!(error.suppressed().len(), 1);
        assert!(error.to_string().contains("command line"));
    }
}
