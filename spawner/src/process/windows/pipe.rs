//! Anonymous pipes and their stream facades.

use std::{
    ptr,
    sync::{Arc, Mutex, PoisonError},
};

use winapi::{
    shared::{minwindef::DWORD, ntdef::HANDLE, winerror::ERROR_BROKEN_PIPE},
    um::{
        errhandlingapi::GetLastError,
        fileapi::{ReadFile, WriteFile},
        namedpipeapi::CreatePipe,
    },
};

use super::handle::Handle;
use crate::{
    error::{Result, SpawnError},
    error::windows::Win32Error,
    io::{Readable, Writable},
};

/// One end of an anonymous pipe. Cloning shares the same underlying handle;
/// the per-end lock serializes close against in-flight reads/writes on the
/// same end, so an operation either completes against a still-open handle or
/// observes the closed state and fails cleanly.
///
/// There is no way to cancel an OS-level blocking read or write from another
/// thread when the peer end closes concurrently; that is a limitation of the
/// synchronous pipe primitives, not of this wrapper.
#[derive(Clone, Debug)]
pub(crate) struct PipeEnd {
    inner: Arc<EndInner>,
}

#[derive(Debug)]
struct EndInner {
    handle: Handle,
    lock: Mutex<()>,
}

impl PipeEnd {
    fn new(handle: Handle) -> Self {
        Self {
            inner: Arc::new(EndInner {
                handle,
                lock: Mutex::new(()),
            }),
        }
    }

    pub(crate) fn as_raw(&self) -> HANDLE {
        self.inner.handle.as_raw()
    }

    /// Closes this end only. Idempotent; concurrent closers are serialized.
    pub(crate) fn close(&self) -> Result<()> {
        let _guard = self
            .inner
            .lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        self.inner.handle.close()?;
        Ok(())
    }
}

/// A connected unidirectional byte channel of two independently closable
/// [`Handle`]s.
#[derive(Clone, Debug)]
pub struct Pipe {
    read: PipeEnd,
    write: PipeEnd,
}

impl Pipe {
    /// Creates a connected read/write handle pair. Neither handle is
    /// inheritable; the launcher marks the child-bound end explicitly.
    pub fn create() -> Result<Self> {
        let mut read: HANDLE = ptr::null_mut();
        let mut write: HANDLE = ptr::null_mut();
        if unsafe { CreatePipe(&mut read, &mut write, ptr::null_mut(), 0) } == 0 {
            return Err(Win32Error::last_error("CreatePipe").into());
        }
        // Safety: CreatePipe succeeded, so both handles are ours to own.
        let (read, write) = unsafe { (Handle::from_raw(read), Handle::from_raw(write)) };
        Ok(Self {
            read: PipeEnd::new(read),
            write: PipeEnd::new(write),
        })
    }

    pub fn close_read(&self) -> Result<()> {
        self.read.close()
    }

    pub fn close_write(&self) -> Result<()> {
        self.write.close()
    }

    /// Closes both ends, write side first so a blocked reader observes end of
    /// stream rather than a vanished read handle.
    pub fn close(&self) -> Result<()> {
        self.close_write()?;
        self.close_read()
    }

    /// Stable facade over the read end.
    pub fn reader(&self) -> PipeReader {
        PipeReader {
            end: self.read.clone(),
        }
    }

    /// Stable facade over the write end.
    pub fn writer(&self) -> PipeWriter {
        PipeWriter {
            end: self.write.clone(),
        }
    }

    pub(crate) fn read_raw(&self) -> HANDLE {
        self.read.as_raw()
    }

    pub(crate) fn write_raw(&self) -> HANDLE {
        self.write.as_raw()
    }
}

/// Read endpoint of a pipe, exposed to callers on the [`Process`] facade.
///
/// [`Process`]: super::Process
#[derive(Clone, Debug)]
pub struct PipeReader {
    end: PipeEnd,
}

impl Readable for PipeReader {
    fn read(&self, buf: &mut [u8]) -> Result<usize> {
        let _guard = self
            .end
            .inner
            .lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if self.end.inner.handle.is_closed() {
            return Err(SpawnError::StreamClosed("pipe read end"));
        }

        let mut bytes_read: DWORD = 0;
        let ok = unsafe {
            ReadFile(
                self.end.as_raw(),
                buf.as_mut_ptr() as *mut _,
                buf.len() as DWORD,
                &mut bytes_read,
                ptr::null_mut(),
            )
        };
        if ok != 0 {
            return Ok(bytes_read as usize);
        }
        let code = unsafe { GetLastError() };
        if code == ERROR_BROKEN_PIPE {
            // The writer closed: end of stream, not an error.
            return Ok(0);
        }
        Err(Win32Error::new("ReadFile", code)
            .with_context("bytes_requested", buf.len().to_string())
            .into())
    }

    fn close(&self) -> Result<()> {
        self.end.close()
    }
}

/// Write endpoint of a pipe, exposed to callers on the [`Process`] facade.
///
/// [`Process`]: super::Process
#[derive(Clone, Debug)]
pub struct PipeWriter {
    end: PipeEnd,
}

impl Writable for PipeWriter {
    fn write(&self, buf: &[u8]) -> Result<usize> {
        let _guard = self
            .end
            .inner
            .lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if self.end.inner.handle.is_closed() {
            return Err(SpawnError::StreamClosed("pipe write end"));
        }

        let mut bytes_written: DWORD = 0;
        let ok = unsafe {
            WriteFile(
                self.end.as_raw(),
                buf.as_ptr() as *const _,
                buf.len() as DWORD,
                &mut bytes_written,
                ptr::null_mut(),
            )
        };
        if ok == 0 {
            return Err(Win32Error::last_error("WriteFile")
                .with_context("bytes_requested", buf.len().to_string())
                .into());
        }
        // WriteFile on an anonymous pipe accepts the whole buffer in one
        // call; anything less violates that contract and is not retryable.
        if bytes_written as usize != buf.len() {
            return Err(SpawnError::ShortWrite {
                requested: buf.len(),
                written: bytes_written as usize,
            });
        }
        Ok(bytes_written as usize)
    }

    fn close(&self) -> Result<()> {
        self.end.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::windows::handle::{counter_lock, live_handle_count};

    #[test]
    fn roundtrip_and_end_of_stream() {
        let _serial = counter_lock();
        let pipe = Pipe::create().unwrap();
        let writer = pipe.writer();
        let reader = pipe.reader();

        assert_eq!(writer.write(b"Hello, Pipe!").unwrap(), 12);
        pipe.close_write().unwrap();

        let mut buf = [0u8; 64];
        let n = reader.read_fully(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"Hello, Pipe!");
        assert_eq!(reader.read(&mut buf).unwrap(), 0);

        pipe.close().unwrap();
    }

    #[test]
    fn read_after_close_is_illegal_state() {
        let _serial = counter_lock();
        let pipe = Pipe::create().unwrap();
        let reader = pipe.reader();
        pipe.close().unwrap();

        let mut buf = [0u8; 8];
        assert!(matches!(
            reader.read(&mut buf),
            Err(SpawnError::StreamClosed(_))
        ));
    }

    #[test]
    fn write_after_close_is_illegal_state() {
        let _serial = counter_lock();
        let pipe = Pipe::create().unwrap();
        let writer = pipe.writer();
        pipe.close_write().unwrap();

        assert!(matches!(
            writer.write(b"x"),
            Err(SpawnError::StreamClosed(_))
        ));
        pipe.close_read().unwrap();
    }

    #[test]
    fn write_after_peer_close_is_a_broken_channel_error() {
        let _serial = counter_lock();
        let pipe = Pipe::create().unwrap();
        let writer = pipe.writer();
        pipe.close_read().unwrap();

        // Our own end is still open; the failure comes from the OS
        // (ERROR_NO_DATA), not from the closed-endpoint guard.
        assert!(matches!(writer.write(b"x"), Err(SpawnError::Win32(_))));
        pipe.close_write().unwrap();
    }

    #[test]
    fn closing_is_idempotent_and_leaks_nothing() {
        let _serial = counter_lock();
        let before = live_handle_count();
        let pipe = Pipe::create().unwrap();
        assert_eq!(live_handle_count(), before + 2);

        pipe.close().unwrap();
        pipe.close().unwrap();
        pipe.close_read().unwrap();
        assert_eq!(live_handle_count(), before);
    }
}
