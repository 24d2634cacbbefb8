//! Win32 error capture and message formatting.
#![cfg(windows)]

use std::fmt::{self, Debug, Display};

use winapi::{
    shared::ntdef::{MAKELANGID, SUBLANG_ENGLISH_US},
    um::{
        errhandlingapi::GetLastError,
        winbase::{FormatMessageW, FORMAT_MESSAGE_FROM_SYSTEM, FORMAT_MESSAGE_IGNORE_INSERTS},
        winnt::LANG_ENGLISH,
    },
};

/// A failed Win32 call: the API's name, the `GetLastError` status, and any
/// call-site context worth reporting (handle values, byte counts, paths).
#[derive(Clone)]
pub struct Win32Error {
    api: &'static str,
    code: u32,
    context: Vec<(&'static str, String)>,
}

impl Win32Error {
    pub fn new(api: &'static str, code: u32) -> Self {
        Self {
            api,
            code,
            context: Vec::new(),
        }
    }

    /// Captures [`GetLastError`] for a call that just failed.
    pub fn last_error(api: &'static str) -> Self {
        Self::new(api, unsafe { GetLastError() })
    }

    /// Attaches a named argument to the error report.
    pub fn with_context(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.context.push((name, value.into()));
        self
    }

    pub fn api(&self) -> &'static str {
        self.api
    }

    pub fn code(&self) -> u32 {
        self.code
    }

    /// Returns the en-US system message for a Windows status code, if the
    /// code is known to the message tables.
    pub fn format_code(code: u32) -> Option<String> {
        let mut buf = [0u16; 512];
        let english_us = MAKELANGID(LANG_ENGLISH, SUBLANG_ENGLISH_US);

        // FormatMessageW returns the number of TCHARs written, zero on
        // failure.
        let written = unsafe {
            FormatMessageW(
                FORMAT_MESSAGE_FROM_SYSTEM | FORMAT_MESSAGE_IGNORE_INSERTS,
                std::ptr::null(),
                code,
                english_us as _,
                buf.as_mut_ptr(),
                buf.len() as u32,
                std::ptr::null_mut(),
            )
        };
        if written == 0 {
            return None;
        }

        // trim_ascii drops the trailing carriage return and newline.
        Some(winstr::from_wide(&buf[..written as usize]).trim_ascii().to_string())
    }
}

impl Display for Win32Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let message = Self::format_code(self.code)
            .unwrap_or_else(|| "not a valid Windows error code".to_string());
        write!(f, "{} failed: {message}. error code: {}", self.api, self.code)?;
        if !self.context.is_empty() {
            write!(f, " [")?;
            for (i, (name, value)) in self.context.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{name}={value}")?;
            }
            write!(f, "]")?;
        }
        Ok(())
    }
}

impl Debug for Win32Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Display::fmt(self, f)
    }
}

impl std::error::Error for Win32Error {}
