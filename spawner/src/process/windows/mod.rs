//! Win32 launcher: stream resolution, restricted handle inheritance,
//! `CreateProcessW`, and rollback of every acquired resource on failure.

mod attr;
pub mod handle;
pub mod pipe;

use std::{
    mem,
    path::Path,
    ptr,
    sync::{Arc, OnceLock},
    time::Duration,
};

use winapi::{
    shared::{
        minwindef::{DWORD, FALSE, LPVOID, TRUE},
        ntdef::HANDLE,
        winerror::WAIT_TIMEOUT,
    },
    um::{
        fileapi::{CreateFileW, OPEN_ALWAYS, OPEN_EXISTING},
        handleapi::{CloseHandle, GetHandleInformation, SetHandleInformation, INVALID_HANDLE_VALUE},
        processenv::GetStdHandle,
        processthreadsapi::{
            CreateProcessW, GetExitCodeProcess, TerminateProcess, PROCESS_INFORMATION,
        },
        synchapi::WaitForSingleObject,
        winbase::{
            CREATE_UNICODE_ENVIRONMENT, EXTENDED_STARTUPINFO_PRESENT, HANDLE_FLAG_INHERIT,
            STARTF_USESTDHANDLES, STARTUPINFOEXW, STD_ERROR_HANDLE, STD_INPUT_HANDLE,
            STD_OUTPUT_HANDLE, WAIT_OBJECT_0,
        },
        winnt::{
            FILE_ATTRIBUTE_NORMAL, FILE_SHARE_DELETE, FILE_SHARE_READ, FILE_SHARE_WRITE,
            GENERIC_READ, GENERIC_WRITE,
        },
    },
};

use self::{attr::ProcThreadAttributeList, handle::Handle, pipe::Pipe};
use crate::{
    error::{Result, SpawnError},
    error::windows::Win32Error,
    spec::{ProcessSpec, StreamDisposition},
    wait::wait_in_steps,
};

pub use handle::live_handle_count;
pub use pipe::{PipeReader, PipeWriter};

/// Deferred release of one acquired resource. Recorded during resolution,
/// executed in reverse order on failure (rollback) or in order on success
/// (commit, closing the child-side copies the parent no longer needs).
type Cleanup = Box<dyn FnOnce() -> Result<()>>;

/// A running child process and the parent-side endpoints of its piped
/// streams.
///
/// An endpoint accessor returns `Some` only for a stream that was routed as
/// [`StreamDisposition::Pipe`] (stderr additionally requires `merge_stderr`
/// to be unset). Dropping the process releases the process handle but does
/// not terminate or wait for the child.
#[derive(Debug)]
pub struct Process {
    pid: u32,
    thread_id: u32,
    process: Handle,
    stdin: Option<PipeWriter>,
    stdout: Option<PipeReader>,
    stderr: Option<PipeReader>,
}

impl Process {
    /// Resolves the requested stream routing, restricts inheritance to exactly
    /// the child-bound handles, and creates the child.
    ///
    /// Atomic: on any failure every handle acquired so far is released in
    /// reverse acquisition order before the error is returned. Failures of
    /// the release steps themselves are attached to the primary error as
    /// suppressed secondaries.
    pub fn launch(spec: ProcessSpec) -> Result<Self> {
        let mut rollback: Vec<Cleanup> = Vec::new();
        let mut commit: Vec<Cleanup> = Vec::new();

        match Self::launch_inner(&spec, &mut rollback, &mut commit) {
            Ok(process) => {
                for action in commit {
                    // The child already runs; failing to close our copy of a
                    // child-side handle leaks it but does not undo the launch.
                    if let Err(error) = action() {
                        tracing::warn!(%error, pid = process.pid, "commit cleanup failed");
                    }
                }
                tracing::debug!(
                    pid = process.pid,
                    thread_id = process.thread_id,
                    "child process launched"
                );
                Ok(process)
            }
            Err(primary) => {
                tracing::debug!(error = %primary, "launch failed, rolling back");
                let mut suppressed = Vec::new();
                for action in rollback.into_iter().rev() {
                    if let Err(error) = action() {
                        tracing::warn!(%error, "rollback step failed");
                        suppressed.push(error);
                    }
                }
                if suppressed.is_empty() {
                    Err(primary)
                } else {
                    Err(SpawnError::LaunchFailed {
                        source: Box::new(primary),
                        suppressed,
                    })
                }
            }
        }
    }

    fn launch_inner(
        spec: &ProcessSpec,
        rollback: &mut Vec<Cleanup>,
        commit: &mut Vec<Cleanup>,
    ) -> Result<Self> {
        if spec.cmdline.is_empty() {
            return Err(SpawnError::EmptyCommandLine);
        }

        let (stdin_child, stdin) = resolve_stdin(&spec.stdin, rollback, commit)?;
        let (stdout_child, stdout) = resolve_output("stdout", &spec.stdout, rollback, commit)?;
        let (stderr_child, stderr) = if spec.merge_stderr {
            // Whatever stdout resolved to receives stderr as well; the
            // stderr disposition is ignored and no stderr endpoint exists.
            (stdout_child, None)
        } else {
            resolve_output("stderr", &spec.stderr, rollback, commit)?
        };

        // The inheritance attribute only whitelists handles that are already
        // inheritable; marking them is a separate, mandatory step.
        let mut inherited: Vec<HANDLE> = Vec::with_capacity(3);
        for handle in [stdin_child, stdout_child, stderr_child] {
            ensure_inheritable(handle)?;
            if !inherited.contains(&handle) {
                inherited.push(handle);
            }
        }

        let mut attributes = ProcThreadAttributeList::new(1)?;
        attributes.set_inherited_handles(&inherited)?;

        // CreateProcessW may rewrite the command-line buffer in place.
        let mut cmdline = winstr::to_wide(winstr::quote_args(&spec.cmdline));
        let mut env_block = spec
            .env
            .as_ref()
            .filter(|env| !env.is_empty())
            .map(winstr::environment_block);
        let working_dir = spec.working_dir.as_ref().map(winstr::to_wide);

        let mut startup: STARTUPINFOEXW = unsafe { mem::zeroed() };
        startup.StartupInfo.cb = mem::size_of::<STARTUPINFOEXW>() as DWORD;
        startup.StartupInfo.dwFlags = STARTF_USESTDHANDLES;
        startup.StartupInfo.hStdInput = stdin_child;
        startup.StartupInfo.hStdOutput = stdout_child;
        startup.StartupInfo.hStdError = stderr_child;
        startup.lpAttributeList = attributes.as_ptr();

        let mut info: PROCESS_INFORMATION = unsafe { mem::zeroed() };
        let created = unsafe {
            CreateProcessW(
                ptr::null(),
                cmdline.as_mut_ptr(),
                ptr::null_mut(),
                ptr::null_mut(),
                TRUE,
                CREATE_UNICODE_ENVIRONMENT | EXTENDED_STARTUPINFO_PRESENT,
                env_block
                    .as_mut()
                    .map_or(ptr::null_mut(), |block| block.as_mut_ptr() as LPVOID),
                working_dir
                    .as_ref()
                    .map_or(ptr::null(), |dir| dir.as_ptr()),
                &mut startup.StartupInfo,
                &mut info,
            )
        };
        attributes.release();
        if created == FALSE {
            return Err(Win32Error::last_error("CreateProcessW")
                .with_context("program", spec.cmdline[0].clone())
                .into());
        }

        // Safety: CreateProcessW succeeded, so both handles are ours to own.
        let process = unsafe { Handle::from_raw(info.hProcess) };
        let thread = unsafe { Handle::from_raw(info.hThread) };
        // The primary-thread handle is never used past creation.
        commit.push(Box::new(move || thread.close().map_err(Into::into)));

        Ok(Self {
            pid: info.dwProcessId,
            thread_id: info.dwThreadId,
            process,
            stdin,
            stdout,
            stderr,
        })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn thread_id(&self) -> u32 {
        self.thread_id
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

    /// Forcibly terminates the child. Does not wait for it to exit and does
    /// not release anything.
    pub fn kill(&self) -> Result<()> {
        tracing::debug!(pid = self.pid, "terminating child process");
        if unsafe { TerminateProcess(self.process.as_raw(), 1) } == FALSE {
            return Err(Win32Error::last_error("TerminateProcess")
                .with_context("pid", self.pid.to_string())
                .into());
        }
        Ok(())
    }

    /// Waits for the child to exit, up to `timeout` (`None` waits
    /// indefinitely). Returns `Ok(Some(exit_code))` once it exits, `Ok(None)`
    /// if the timeout elapses first. A zero timeout is rejected before any
    /// OS call.
    pub fn wait_for_exit(&self, timeout: Option<Duration>) -> Result<Option<i32>> {
        wait_in_steps(timeout, |segment| {
            let millis = segment.as_millis().clamp(1, DWORD::MAX as u128 - 1) as DWORD;
            match unsafe { WaitForSingleObject(self.process.as_raw(), millis) } {
                WAIT_OBJECT_0 => {
                    let mut code: DWORD = 0;
                    let got = unsafe { GetExitCodeProcess(self.process.as_raw(), &mut code) };
                    if got == FALSE {
                        return Err(Win32Error::last_error("GetExitCodeProcess")
                            .with_context("pid", self.pid.to_string())
                            .into());
                    }
                    Ok(Some(code as i32))
                }
                WAIT_TIMEOUT => Ok(None),
                _ => Err(Win32Error::last_error("WaitForSingleObject")
                    .with_context("pid", self.pid.to_string())
                    .into()),
            }
        })
    }
}

fn resolve_stdin(
    disposition: &StreamDisposition,
    rollback: &mut Vec<Cleanup>,
    commit: &mut Vec<Cleanup>,
) -> Result<(HANDLE, Option<PipeWriter>)> {
    match disposition {
        // The discard device gives the child immediate end of stream; no
        // parent-side endpoint exists.
        StreamDisposition::Null => Ok((nul_device()?, None)),
        StreamDisposition::Inherit => Ok((std_handle(STD_INPUT_HANDLE, "stdin")?, None)),
        StreamDisposition::Pipe => {
            let pipe = Pipe::create()?;
            let child = pipe.read_raw();
            let writer = pipe.writer();
            rollback.push({
                let pipe = pipe.clone();
                Box::new(move || pipe.close())
            });
            // Once the child holds its own copy of the read end, ours only
            // keeps the pipe from reporting end of stream.
            commit.push(Box::new(move || pipe.close_read()));
            Ok((child, Some(writer)))
        }
        StreamDisposition::File(path) => {
            Ok((open_redirect_handle(path, rollback, commit)?, None))
        }
    }
}

fn resolve_output(
    stream: &'static str,
    disposition: &StreamDisposition,
    rollback: &mut Vec<Cleanup>,
    commit: &mut Vec<Cleanup>,
) -> Result<(HANDLE, Option<PipeReader>)> {
    match disposition {
        StreamDisposition::Null => Ok((nul_device()?, None)),
        StreamDisposition::Inherit => {
            let which = if stream == "stdout" {
                STD_OUTPUT_HANDLE
            } else {
                STD_ERROR_HANDLE
            };
            Ok((std_handle(which, stream)?, None))
        }
        StreamDisposition::Pipe => {
            let pipe = Pipe::create()?;
            let child = pipe.write_raw();
            let reader = pipe.reader();
            rollback.push({
                let pipe = pipe.clone();
                Box::new(move || pipe.close())
            });
            // Our copy of the write end must go, or the reader never sees
            // end of stream after the child exits.
            commit.push(Box::new(move || pipe.close_write()));
            Ok((child, Some(reader)))
        }
        StreamDisposition::File(path) => {
            Ok((open_redirect_handle(path, rollback, commit)?, None))
        }
    }
}

/// Opens (creating if missing) a shared read+write redirect target and
/// registers its release on both outcomes: the parent's copy is closed
/// whether the launch commits or rolls back.
fn open_redirect_handle(
    path: &Path,
    rollback: &mut Vec<Cleanup>,
    commit: &mut Vec<Cleanup>,
) -> Result<HANDLE> {
    let wide = winstr::to_wide(path);
    let raw = unsafe {
        CreateFileW(
            wide.as_ptr(),
            GENERIC_READ | GENERIC_WRITE,
            FILE_SHARE_READ | FILE_SHARE_WRITE | FILE_SHARE_DELETE,
            ptr::null_mut(),
            OPEN_ALWAYS,
            FILE_ATTRIBUTE_NORMAL,
            ptr::null_mut(),
        )
    };
    if raw == INVALID_HANDLE_VALUE {
        return Err(Win32Error::last_error("CreateFileW")
            .with_context("path", path.display().to_string())
            .into());
    }
    // Safety: CreateFileW succeeded, so the handle is ours to own.
    let handle = Arc::new(unsafe { Handle::from_raw(raw) });
    let child = handle.as_raw();
    rollback.push({
        let handle = handle.clone();
        Box::new(move || handle.close().map_err(Into::into))
    });
    commit.push(Box::new(move || handle.close().map_err(Into::into)));
    Ok(child)
}

/// Process-wide handle on the `NUL` device, opened on first use. Only a
/// successful open is published; a failed one surfaces to that caller and
/// the next call opens anew. Excluded from the live-handle counter and never
/// closed.
fn nul_device() -> Result<HANDLE> {
    static NUL: OnceLock<usize> = OnceLock::new();
    if let Some(raw) = NUL.get() {
        return Ok(*raw as HANDLE);
    }

    let path = winstr::to_wide("NUL");
    let raw = unsafe {
        CreateFileW(
            path.as_ptr(),
            GENERIC_READ | GENERIC_WRITE,
            FILE_SHARE_READ | FILE_SHARE_WRITE,
            ptr::null_mut(),
            OPEN_EXISTING,
            0,
            ptr::null_mut(),
        )
    };
    if raw == INVALID_HANDLE_VALUE {
        return Err(Win32Error::last_error("CreateFileW")
            .with_context("path", "NUL")
            .into());
    }
    match NUL.set(raw as usize) {
        Ok(()) => Ok(raw),
        // Lost the publication race; keep the winner's handle.
        Err(ours) => {
            unsafe { CloseHandle(ours as HANDLE) };
            match NUL.get() {
                Some(raw) => Ok(*raw as HANDLE),
                None => Err(SpawnError::Internal("published NUL handle vanished")),
            }
        }
    }
}

fn std_handle(which: DWORD, stream: &'static str) -> Result<HANDLE> {
    let handle = unsafe { GetStdHandle(which) };
    if handle == INVALID_HANDLE_VALUE {
        return Err(Win32Error::last_error("GetStdHandle")
            .with_context("stream", stream)
            .into());
    }
    // A detached process has no standard handles to pass down.
    if handle.is_null() {
        return Err(SpawnError::UnsupportedDisposition {
            stream,
            disposition: "Inherit",
        });
    }
    Ok(handle)
}

/// Marks `handle` inheritable unless it already is. Std handles and the NUL
/// device are shared with other users in this process, so the flag is only
/// ever added, never cleared.
fn ensure_inheritable(handle: HANDLE) -> Result<()> {
    let mut flags: DWORD = 0;
    if unsafe { GetHandleInformation(handle, &mut flags) } == FALSE {
        return Err(Win32Error::last_error("GetHandleInformation")
            .with_context("handle", format!("{:#x}", handle as usize))
            .into());
    }
    if flags & HANDLE_FLAG_INHERIT == 0
        && unsafe { SetHandleInformation(handle, HANDLE_FLAG_INHERIT, HANDLE_FLAG_INHERIT) } == FALSE
    {
        return Err(Win32Error::last_error("SetHandleInformation")
            .with_context("handle", format!("{:#x}", handle as usize))
            .into());
    }
    Ok(())
}
