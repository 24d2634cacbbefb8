//! POSIX implementation of the launch contract, delegating to
//! [`std::process`].
//!
//! `Command::spawn` is already atomic (nothing leaks when it fails), so this
//! side needs no rollback ledger; the extra descriptors the stderr merge
//! creates are RAII-owned and close on the error path by themselves.

use std::{
    fs::{File, OpenOptions},
    io::{Read, Write},
    os::fd::{FromRawFd, OwnedFd},
    os::unix::process::ExitStatusExt,
    path::Path,
    process::{Child, ChildStderr, ChildStdin, ChildStdout, Command, ExitStatus, Stdio},
    sync::{Arc, Mutex, PoisonError},
    thread,
    time::{Duration, Instant},
};

use crate::{
    error::{Result, SpawnError},
    io::{Readable, Writable},
    spec::{ProcessSpec, StreamDisposition},
    wait::wait_in_steps,
};

/// How often a wait segment re-checks the child between sleeps.
const TRY_WAIT_INTERVAL: Duration = Duration::from_millis(10);

/// A running child process and the parent-side endpoints of its piped
/// streams.
///
/// An endpoint accessor returns `Some` only for a stream that was routed as
/// [`StreamDisposition::Pipe`] (stderr additionally requires `merge_stderr`
/// to be unset). Dropping the process does not terminate or wait for the
/// child.
#[derive(Debug)]
pub struct Process {
    pid: u32,
    child: Mutex<Child>,
    stdin: Option<PipeWriter>,
    stdout: Option<PipeReader>,
    stderr: Option<PipeReader>,
}

impl Process {
    pub fn launch(spec: ProcessSpec) -> Result<Self> {
        if spec.cmdline.is_empty() {
            return Err(SpawnError::EmptyCommandLine);
        }

        let mut command = Command::new(&spec.cmdline[0]);
        command.args(&spec.cmdline[1..]);
        // An override replaces the whole environment; it is never merged
        // into the parent's.
        if let Some(env) = spec.env.as_ref().filter(|env| !env.is_empty()) {
            command.env_clear();
            command.envs(env);
        }
        if let Some(dir) = &spec.working_dir {
            command.current_dir(dir);
        }

        command.stdin(stream_target(&spec.stdin)?);
        let merged_stdout = if spec.merge_stderr {
            configure_merged_output(&mut command, &spec.stdout)?
        } else {
            command.stdout(stream_target(&spec.stdout)?);
            command.stderr(stream_target(&spec.stderr)?);
            None
        };

        let mut child = command.spawn()?;
        let pid = child.id();
        tracing::debug!(pid, program = %spec.cmdline[0], "child process launched");

        let stdin = child.stdin.take().map(PipeWriter::new);
        let stdout = match merged_stdout {
            Some(file) => Some(PipeReader::new(ReadSource::File(file))),
            None => child
                .stdout
                .take()
                .map(|stream| PipeReader::new(ReadSource::Stdout(stream))),
        };
        let stderr = child
            .stderr
            .take()
            .map(|stream| PipeReader::new(ReadSource::Stderr(stream)));

        Ok(Self {
            pid,
            child: Mutex::new(child),
            stdin,
            stdout,
            stderr,
        })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Write end of the child's stdin pipe, when stdin was routed as `Pipe`.
    pub fn stdin(&self) -> Option<PipeWriter> {
        self.stdin.clone()
    }

    /// Read end of the child's stdout pipe, when stdout was routed as `Pipe`.
    pub fn stdout(&self) -> Option<PipeReader> {
        self.stdout.clone()
    }

    /// Read end of the child's stderr pipe, when stderr was routed as `Pipe`
    /// and `merge_stderr` was unset.
    pub fn stderr(&self) -> Option<PipeReader> {
        self.stderr.clone()
    }

    /// Sends SIGKILL to the child. Does not wait for it to exit.
    pub fn kill(&self) -> Result<()> {
        tracing::debug!(pid = self.pid, "terminating child process");
        self.child
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .kill()?;
        Ok(())
    }

    /// Waits for the child to exit, up to `timeout` (`None` waits
    /// indefinitely). Returns `Ok(Some(exit_code))` once it exits, `Ok(None)`
    /// if the timeout elapses first. A zero timeout is rejected before any
    /// OS call.
    pub fn wait_for_exit(&self, timeout: Option<Duration>) -> Result<Option<i32>> {
        wait_in_steps(timeout, |segment| {
            let begin = Instant::now();
            loop {
                let status = self
                    .child
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .try_wait()?;
                if let Some(status) = status {
                    return Ok(Some(exit_code(status)));
                }
                if begin.elapsed() >= segment {
                    return Ok(None);
                }
                thread::sleep(TRY_WAIT_INTERVAL.min(segment));
            }
        })
    }
}

/// Raw OS exit code; a signal death is reported as `128 + signal`, the shell
/// convention.
fn exit_code(status: ExitStatus) -> i32 {
    status
        .code()
        .or_else(|| status.signal().map(|signal| 128 + signal))
        .unwrap_or(-1)
}

fn stream_target(disposition: &StreamDisposition) -> Result<Stdio> {
    Ok(match disposition {
        StreamDisposition::Null => Stdio::null(),
        StreamDisposition::Pipe => Stdio::piped(),
        StreamDisposition::Inherit => Stdio::inherit(),
        StreamDisposition::File(path) => Stdio::from(open_redirect_file(path)?),
    })
}

/// Routes stderr into whatever stdout resolves to. Returns the parent-side
/// read end when that target is a pipe; `Stdio::piped` cannot express two
/// slots sharing one channel, so the pipe is created raw and its write end
/// duplicated into both.
fn configure_merged_output(
    command: &mut Command,
    stdout: &StreamDisposition,
) -> Result<Option<File>> {
    match stdout {
        StreamDisposition::Null => {
            command.stdout(Stdio::null());
            command.stderr(Stdio::null());
            Ok(None)
        }
        StreamDisposition::Inherit => {
            command.stdout(Stdio::inherit());
            command.stderr(Stdio::inherit());
            Ok(None)
        }
        StreamDisposition::File(path) => {
            let file = open_redirect_file(path)?;
            command.stderr(Stdio::from(file.try_clone()?));
            command.stdout(Stdio::from(file));
            Ok(None)
        }
        StreamDisposition::Pipe => {
            let (read, write) = raw_pipe()?;
            command.stderr(Stdio::from(write.try_clone()?));
            command.stdout(Stdio::from(write));
            Ok(Some(File::from(read)))
        }
    }
}

fn raw_pipe() -> Result<(OwnedFd, OwnedFd)> {
    let mut fds = [0; 2];
    if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
        return Err(std::io::Error::last_os_error().into());
    }
    // Safety: pipe(2) succeeded, so both descriptors are fresh and ours.
    let ends = unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) };
    // The read end stays on our side of exec.
    if unsafe { libc::fcntl(fds[0], libc::F_SETFD, libc::FD_CLOEXEC) } != 0 {
        return Err(std::io::Error::last_os_error().into());
    }
    Ok(ends)
}

fn open_redirect_file(path: &Path) -> Result<File> {
    Ok(OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .open(path)?)
}

#[derive(Debug)]
enum ReadSource {
    Stdout(ChildStdout),
    Stderr(ChildStderr),
    File(File),
}

/// Read endpoint of a child stream, exposed to callers on the [`Process`]
/// facade. Cloning shares the underlying descriptor.
#[derive(Clone, Debug)]
pub struct PipeReader {
    source: Arc<Mutex<Option<ReadSource>>>,
}

impl PipeReader {
    fn new(source: ReadSource) -> Self {
        Self {
            source: Arc::new(Mutex::new(Some(source))),
        }
    }
}

impl Readable for PipeReader {
    fn read(&self, buf: &mut [u8]) -> Result<usize> {
        let mut source = self
            .source
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let Some(source) = source.as_mut() else {
            return Err(SpawnError::StreamClosed("pipe read end"));
        };
        let n = match source {
            ReadSource::Stdout(stream) => stream.read(buf)?,
            ReadSource::Stderr(stream) => stream.read(buf)?,
            ReadSource::File(file) => file.read(buf)?,
        };
        Ok(n)
    }

    fn close(&self) -> Result<()> {
        self.source
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        Ok(())
    }
}

/// Write endpoint of the child's stdin, exposed to callers on the
/// [`Process`] facade. Cloning shares the underlying descriptor.
#[derive(Clone, Debug)]
pub struct PipeWriter {
    sink: Arc<Mutex<Option<ChildStdin>>>,
}

impl PipeWriter {
    fn new(sink: ChildStdin) -> Self {
        Self {
            sink: Arc::new(Mutex::new(Some(sink))),
        }
    }
}

impl Writable for PipeWriter {
    fn write(&self, buf: &[u8]) -> Result<usize> {
        let mut sink = self.sink.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(sink) = sink.as_mut() else {
            return Err(SpawnError::StreamClosed("pipe write end"));
        };
        sink.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&self) -> Result<()> {
        let mut sink = self.sink.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(sink) = sink.as_mut() {
            sink.flush()?;
        }
        Ok(())
    }

    fn close(&self) -> Result<()> {
        self.sink
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_code_passes_through_normal_exits() {
        assert_eq!(exit_code(ExitStatus::from_raw(42 << 8)), 42);
        assert_eq!(exit_code(ExitStatus::from_raw(0)), 0);
    }

    #[test]
    fn exit_code_reports_signal_deaths_as_128_plus_signal() {
        assert_eq!(exit_code(ExitStatus::from_raw(libc::SIGKILL)), 137);
        assert_eq!(exit_code(ExitStatus::from_raw(libc::SIGTERM)), 143);
    }

    #[test]
    fn closed_endpoints_reject_further_io() {
        let (read, _write) = raw_pipe().unwrap();
        let reader = PipeReader::new(ReadSource::File(File::from(read)));
        reader.close().unwrap();
        reader.close().unwrap();

        let mut buf = [0u8; 4];
        assert!(matches!(
            reader.read(&mut buf),
            Err(SpawnError::StreamClosed(_))
        ));
    }
}
