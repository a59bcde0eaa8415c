//! whoport-signal: Validated signal delivery.
//!
//! This crate provides:
//! - Signal dispatch by PID ([`kill`])
//! - Convenience wrappers ([`terminate`], [`force_kill`])
//! - A signal-0 liveness probe ([`process_exists`])
//!
//! Errors use the canonical [`whoport_core::WhoportError`] type.
//!
//! # Safety
//!
//! PIDs are validated before they reach the POSIX `kill` call:
//!
//! - **PID 0 rejected**: `kill(0, sig)` would signal the caller's own
//!   process group
//! - **PID > i32::MAX rejected**: larger u32 values wrap to negative
//!   `pid_t`, and `kill(-1, sig)` signals every process the caller can reach
//!
//! Signals are restricted to the 0..=31 range the platforms in scope define.

use whoport_core::{WhoportError, WhoportResult};

/// Maximum valid PID value.
///
/// PIDs above this value would overflow to negative when cast to `pid_t`
/// (i32), which has special POSIX semantics:
/// - `kill(-1, sig)` = signal ALL processes the caller can reach
/// - `kill(-pgid, sig)` = signal process group `pgid`
///
/// Both are rejected at the API boundary.
pub const MAX_SAFE_PID: u32 = i32::MAX as u32;

/// Validate that a PID is safe to hand to POSIX signal functions.
fn validate_pid(pid: u32) -> WhoportResult<()> {
    if pid == 0 {
        return Err(WhoportError::invalid_argument("pid must be > 0"));
    }
    if pid > MAX_SAFE_PID {
        return Err(WhoportError::invalid_argument(format!(
            "pid {} exceeds maximum safe value {}; larger values wrap to \
             negative PIDs with group or broadcast semantics",
            pid, MAX_SAFE_PID
        )));
    }
    Ok(())
}

/// Validate that a signal number is in the supported range.
///
/// 0 is the liveness probe; 1..=31 are the standard signals on the
/// platforms in scope. Real-time signals are out of range on macOS and
/// deliberately excluded.
fn validate_signal(signal: i32) -> WhoportResult<()> {
    if !(0..=31).contains(&signal) {
        return Err(WhoportError::invalid_argument(format!(
            "signal {signal} outside supported range 0-31"
        )));
    }
    Ok(())
}

#[cfg(unix)]
mod unix;

// Signal numbers are part of this crate's vocabulary; re-exporting the two
// the wrappers use keeps callers off a direct libc dependency.
pub use libc::{SIGKILL, SIGTERM};

/// Send a signal to a process.
///
/// # Errors
///
/// Returns [`WhoportError::InvalidArgument`] if:
/// - `pid == 0`: would signal the caller's own process group
/// - `pid > MAX_SAFE_PID`: would wrap to a negative PID
/// - `signal` is outside 0..=31
///
/// Otherwise maps errno: EPERM → `PermissionDenied`, ESRCH → `NotFound`,
/// anything else → `System`.
pub fn kill(pid: u32, signal: i32) -> WhoportResult<()> {
    validate_pid(pid)?;
    validate_signal(signal)?;
    unix::kill_impl(pid, signal)
}

/// Convenience wrapper: send `SIGTERM`.
pub fn terminate(pid: u32) -> WhoportResult<()> {
    kill(pid, SIGTERM)
}

/// Convenience wrapper: send `SIGKILL`.
pub fn force_kill(pid: u32) -> WhoportResult<()> {
    kill(pid, SIGKILL)
}

/// Probe whether a process currently exists, without signaling it.
///
/// Sends signal 0, which performs permission and existence checks only.
/// EPERM proves existence: the kernel refuses delivery but confirms there
/// is a process to refuse for.
pub fn process_exists(pid: u32) -> WhoportResult<bool> {
    validate_pid(pid)?;
    unix::exists_impl(pid)
}
