//! Cross-platform child-process launching with explicit stream routing.
//!
//! A caller describes the child declaratively with a [`ProcessSpec`] (command
//! line, environment override, working directory, one [`StreamDisposition`]
//! per standard stream, stderr merge flag) and gets back a [`Process`]: pid,
//! forced termination, bounded waiting, and pipe endpoints for whichever
//! streams were routed through pipes.
//!
//! On Windows the launcher drives the Win32 primitives directly — anonymous
//! pipes, an explicit handle-inheritance list so the child receives only the
//! handles meant for it, and rollback of every acquired resource when any step
//! of the launch fails. On POSIX targets the same contract is satisfied by
//! delegating to [`std::process`].
//!
//! All I/O is synchronous and blocking; waits are decomposed into bounded
//! polling segments internally. There is no event loop and no cancellation
//! beyond timeout expiry.

pub mod error;
pub mod io;
pub mod process;
pub mod spec;
pub(crate) mod wait;

pub use error::{Result, SpawnError};
pub use io::{Readable, Writable};
#[cfg(unix)]
pub use process::unix::{PipeReader, PipeWriter, Process};
#[cfg(windows)]
pub use process::windows::{live_handle_count, PipeReader, PipeWriter, Process};
pub use spec::{ProcessSpec, StreamDisposition};

/// Launches the child process described by `spec`.
///
/// Either returns a fully usable [`Process`] or fails atomically: every
/// resource acquired along the way is released before the error is returned.
pub fn launch(spec: ProcessSpec) -> Result<Process> {
    Process::launch(spec)
}
