//! Normalized exit codes.
//!
//! Returns `(code, precise)`; `precise` is false when the platform cannot
//! report the real code and a generic failure code was substituted.

use std::process::ExitStatus;

/// Code reported when the platform gives no usable status.
pub const GENERIC_FAILURE: i32 = 1;

#[cfg(unix)]
pub fn exit_code(status: &ExitStatus) -> (i32, bool) {
    use std::os::unix::process::ExitStatusExt;

    if let Some(code) = status.code() {
        return (code, true);
    }
    // Killed by a signal: follow the shell convention.
    match status.signal() {
        Some(signal) => (128 + signal, true),
        None => (GENERIC_FAILURE, false),
    }
}

#[cfg(not(unix))]
pub fn exit_code(status: &ExitStatus) -> (i32, bool) {
    if status.success() {
        (0, true)
    } else {
        (GENERIC_FAILURE, false)
    }
}

/// Decode the status reported by a pseudo-terminal child.
///
/// portable-pty keeps only the signal's description for a signal death, so
/// the number is recovered from it; an unrecognised description falls back
/// to a generic, imprecise failure.
pub fn pty_exit_code(status: &portable_pty::ExitStatus) -> (i32, bool) {
    match status.signal() {
        None => (status.exit_code() as i32, cfg!(unix)),
        Some(description) => match signal_number(description) {
            Some(signal) => (128 + signal, true),
            None => (GENERIC_FAILURE, false),
        },
    }
}

#[cfg(unix)]
fn signal_number(description: &str) -> Option<i32> {
    use std::ffi::CStr;

    // Used when strsignal has no text for the signal
    if let Some(number) = description.strip_prefix("Signal ") {
        return number.trim().parse().ok();
    }
    (1..=64).find(|&signal| {
        // SAFETY: strsignal returns null or a NUL-terminated string that
        // stays valid until the next strsignal call on this thread; it is
        // copied out before the loop advances.
        let text = unsafe { libc::strsignal(signal) };
        !text.is_null() && unsafe { CStr::from_ptr(text) }.to_string_lossy() == description
    })
}

#[cfg(not(unix))]
fn signal_number(_description: &str) -> Option<i32> {
    None
}
