//! Reference-counted ownership of raw Win32 handles.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use winapi::{shared::ntdef::HANDLE, um::handleapi::CloseHandle};

use crate::error::windows::Win32Error;

/// Process-wide count of currently open [`Handle`] wrappers. Incremented on
/// construction, decremented on the first close. Exists for leak detection.
static LIVE_HANDLES: AtomicUsize = AtomicUsize::new(0);

/// The number of [`Handle`]s that have been constructed but not yet closed.
pub fn live_handle_count() -> usize {
    LIVE_HANDLES.load(Ordering::SeqCst)
}

/// Owns one raw `HANDLE` and guarantees `CloseHandle` runs exactly once, no
/// matter how many owners race to close it.
///
/// The raw value is stored as `usize`: kernel handles are process-global
/// tokens, not pointers into this address space, so the wrapper is freely
/// `Send + Sync`.
#[derive(Debug)]
pub struct Handle {
    raw: usize,
    closed: AtomicBool,
}

impl Handle {
    /// Takes ownership of `raw` and registers it in the live-handle counter.
    ///
    /// # Safety
    ///
    /// `raw` must be a valid, open handle that no other owner will close.
    pub unsafe fn from_raw(raw: HANDLE) -> Self {
        LIVE_HANDLES.fetch_add(1, Ordering::SeqCst);
        Self {
            raw: raw as usize,
            closed: AtomicBool::new(false),
        }
    }

    pub fn as_raw(&self) -> HANDLE {
        self.raw as HANDLE
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Releases the underlying handle. The first call closes; every later or
    /// concurrent call is a no-op. The raw value is never reused by this
    /// wrapper once closed.
    pub fn close(&self) -> Result<(), Win32Error> {
        if self
            .closed
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            LIVE_HANDLES.fetch_sub(1, Ordering::SeqCst);
            if unsafe { CloseHandle(self.as_raw()) } == 0 {
                return Err(Win32Error::last_error("CloseHandle")
                    .with_context("handle", format!("{:#x}", self.raw)));
            }
        }
        Ok(())
    }
}

impl Drop for Handle {
    fn drop(&mut self) {
        // Safety net for owners that never closed explicitly.
        if let Err(error) = self.close() {
            tracing::warn!(%error, "failed to release handle on drop");
        }
    }
}

/// Serializes tests that assert on the process-wide counter; any test that
/// opens handles must hold it so exact-count checks stay deterministic.
#[cfg(test)]
pub(crate) fn counter_lock() -> std::sync::MutexGuard<'static, ()> {
    use std::sync::{Mutex, PoisonError};
    static LOCK: Mutex<()> = Mutex::new(());
    LOCK.lock().unwrap_or_else(PoisonError::into_inner)
}
