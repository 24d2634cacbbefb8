//! Extended startup attributes restricting which handles the child inherits.

use std::{mem, ptr};

use winapi::{
    shared::{
        basetsd::SIZE_T,
        minwindef::DWORD,
        ntdef::HANDLE,
        winerror::ERROR_INSUFFICIENT_BUFFER,
    },
    um::{
        errhandlingapi::GetLastError,
        processthreadsapi::{
            DeleteProcThreadAttributeList, InitializeProcThreadAttributeList,
            UpdateProcThreadAttribute, LPPROC_THREAD_ATTRIBUTE_LIST,
        },
    },
};

use crate::{
    error::{Result, SpawnError},
    error::windows::Win32Error,
};

/// `ProcThreadAttributeValue(2, FALSE, TRUE, FALSE)` from winbase.h; winapi
/// does not export the macro expansion.
const PROC_THREAD_ATTRIBUTE_HANDLE_LIST: SIZE_T = 0x0002_0002;

/// Opaque, size-negotiated attribute list naming exactly the handles the
/// child may inherit.
///
/// Construction follows the two-phase protocol: the sizing call with a null
/// list is *expected* to fail with `ERROR_INSUFFICIENT_BUFFER` — that failure
/// carries the required byte size — and only then is the backing buffer
/// allocated and initialized for real.
pub struct ProcThreadAttributeList {
    // Pointer-sized cells: the opaque list holds pointer-sized fields, and a
    // byte buffer would only be 1-aligned by accident of the allocator.
    buffer: Vec<usize>,
    released: bool,
}

impl ProcThreadAttributeList {
    pub fn new(attribute_count: DWORD) -> Result<Self> {
        let mut size: SIZE_T = 0;
        let sized =
            unsafe { InitializeProcThreadAttributeList(ptr::null_mut(), attribute_count, 0, &mut size) };
        if sized != 0 {
            return Err(SpawnError::Internal(
                "InitializeProcThreadAttributeList sizing call succeeded with a null list",
            ));
        }
        let code = unsafe { GetLastError() };
        if code != ERROR_INSUFFICIENT_BUFFER {
            return Err(Win32Error::new("InitializeProcThreadAttributeList", code)
                .with_context("stage", "measure")
                .into());
        }

        let mut buffer = vec![0usize; size.div_ceil(mem::size_of::<usize>())];
        let initialized = unsafe {
            InitializeProcThreadAttributeList(
                buffer.as_mut_ptr() as LPPROC_THREAD_ATTRIBUTE_LIST,
                attribute_count,
                0,
                &mut size,
            )
        };
        if initialized == 0 {
            return Err(Win32Error::last_error("InitializeProcThreadAttributeList")
                .with_context("stage", "initialize")
                .with_context("size", size.to_string())
                .into());
        }
        Ok(Self {
            buffer,
            released: false,
        })
    }

    pub fn as_ptr(&mut self) -> LPPROC_THREAD_ATTRIBUTE_LIST {
        self.buffer.as_mut_ptr() as LPPROC_THREAD_ATTRIBUTE_LIST
    }

    /// Registers the whole handle list in one bulk update.
    ///
    /// `handles` must stay alive (and the handles open) until the list is
    /// released: the attribute stores the slice pointer, not a copy.
    pub fn set_inherited_handles(&mut self, handles: &[HANDLE]) -> Result<()> {
        let updated = unsafe {
            UpdateProcThreadAttribute(
                self.as_ptr(),
                0,
                PROC_THREAD_ATTRIBUTE_HANDLE_LIST,
                handles.as_ptr() as *mut _,
                mem::size_of::<HANDLE>() * handles.len(),
                ptr::null_mut(),
                ptr::null_mut(),
            )
        };
        if updated == 0 {
            return Err(Win32Error::last_error("UpdateProcThreadAttribute")
                .with_context("handle_count", handles.len().to_string())
                .into());
        }
        Ok(())
    }

    /// Deletes the attribute list. Idempotent; the backing buffer is freed
    /// when the value drops.
    pub fn release(&mut self) {
        if !self.released {
            self.released = true;
            unsafe { DeleteProcThreadAttributeList(self.as_ptr()) };
        }
    }
}

impl Drop for ProcThreadAttributeList {
    fn drop(&mut self) {
        self.release();
    }
}
