//! String conventions of the Win32 process-creation APIs: NUL-terminated wide
//! strings, command-line quoting, and `CreateProcessW` environment blocks.
//!
//! Everything here is pure string manipulation, so the crate builds and is
//! tested on every platform even though the conventions are Windows-specific.

use std::{collections::HashMap, ffi::OsStr};

/// Encodes `string` as a NUL-terminated UTF-16 buffer suitable for `LPCWSTR`
/// parameters.
pub fn to_wide<S: AsRef<OsStr>>(string: S) -> Vec<u16> {
    #[cfg(windows)]
    {
        use std::os::windows::ffi::OsStrExt;
        string.as_ref().encode_wide().chain(Some(0)).collect()
    }
    #[cfg(not(windows))]
    {
        string
            .as_ref()
            .to_string_lossy()
            .encode_utf16()
            .chain(Some(0))
            .collect()
    }
}

/// Decodes a wide buffer up to its first NUL (or its full length when not
/// NUL-terminated), lossily.
pub fn from_wide<T: AsRef<[u16]>>(buffer: T) -> String {
    let buffer = buffer.as_ref();
    let len = buffer.iter().position(|&c| c == 0).unwrap_or(buffer.len());
    String::from_utf16_lossy(&buffer[..len])
}

/// Joins `args` into one command line following the `CreateProcessW`
/// convention: an empty argument becomes `""`; an argument free of spaces,
/// tabs and quotes is passed through; anything else is wrapped in quotes with
/// `\` and `"` escaped by a preceding backslash. Arguments are joined by
/// single spaces.
pub fn quote_args<S: AsRef<str>>(args: &[S]) -> String {
    args.iter()
        .map(|arg| quote_arg(arg.as_ref()))
        .collect::<Vec<_>>()
        .join(" ")
}

fn quote_arg(arg: &str) -> String {
    if arg.is_empty() {
        return "\"\"".to_string();
    }
    if !arg.contains([' ', '\t', '"']) {
        return arg.to_string();
    }
    let mut quoted = String::with_capacity(arg.len() + 2);
    quoted.push('"');
    for c in arg.chars() {
        if c == '\\' || c == '"' {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('"');
    quoted
}

/// Serializes an environment override as a `CreateProcessW` environment
/// block: `key=value` entries in sorted key order, each NUL-terminated, the
/// whole block terminated by an extra NUL. Sorting makes the block
/// deterministic for identical maps.
pub fn environment_block(env: &HashMap<String, String>) -> Vec<u16> {
    let mut entries: Vec<_> = env.iter().collect();
    entries.sort_by_key(|(key, _)| key.as_str());

    let mut block = Vec::new();
    for (key, value) in entries {
        block.extend(key.encode_utf16());
        block.push(u16::from(b'='));
        block.extend(value.encode_utf16());
        block.push(0);
    }
    block.push(0);
    block
}
