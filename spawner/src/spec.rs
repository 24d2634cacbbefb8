//! Declarative description of a child process to launch.

use std::{collections::HashMap, path::PathBuf};

/// Routing for one standard stream of the child.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum StreamDisposition {
    /// Route the stream to the discard device (`NUL` on Windows, `/dev/null`
    /// on POSIX). The default for every stream.
    #[default]
    Null,
    /// Create a fresh pipe; the parent-side end is exposed on the returned
    /// [`Process`](crate::Process).
    Pipe,
    /// Reuse the launching process's own stream for that slot.
    Inherit,
    /// Redirect to the file at this path, opened read+write with sharing and
    /// created if missing.
    File(PathBuf),
}

/// Everything the launcher needs to know about the child. Immutable once
/// passed to [`launch`](crate::launch).
#[derive(Clone, Debug, Default)]
pub struct ProcessSpec {
    /// Program followed by its arguments. Must contain at least one element.
    pub cmdline: Vec<String>,
    /// Full environment for the child. `None` inherits the parent's
    /// environment; `Some(map)` hands the child exactly the entries of `map`.
    /// An empty map behaves like `None`.
    pub env: Option<HashMap<String, String>>,
    /// Working directory for the child; `None` inherits the parent's.
    pub working_dir: Option<PathBuf>,
    pub stdin: StreamDisposition,
    pub stdout: StreamDisposition,
    pub stderr: StreamDisposition,
    /// Route stderr into whatever stdout resolved to. When set, the `stderr`
    /// disposition is ignored and no stderr endpoint is exposed.
    pub merge_stderr: bool,
}

impl ProcessSpec {
    /// A spec running `cmdline` with all defaults: streams discarded,
    /// environment and working directory inherited, no merge.
    pub fn new<I, S>(cmdline: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            cmdline: cmdline.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }
}
