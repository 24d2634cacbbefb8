//! Platform implementations of the launch contract.
//!
//! Exactly one implementation is compiled in; both expose the same surface
//! (`Process`, `PipeReader`, `PipeWriter`), so callers never dispatch at
//! runtime.

#[cfg(unix)]
pub mod unix;
#[cfg(windows)]
pub mod windows;
