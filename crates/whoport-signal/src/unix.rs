use std::io;

use libc::{kill as libc_kill, EINVAL, EPERM, ESRCH};

use whoport_core::{WhoportError, WhoportResult};

pub fn kill_impl(pid: u32, signal: i32) -> WhoportResult<()> {
    // Safe: libc expects pid_t (signed), but pid==0 and values above
    // i32::MAX are rejected at the API boundary.
    let result = unsafe { libc_kill(pid as i32, signal) };

    if result == 0 {
        return Ok(());
    }

    let os_error = io::Error::last_os_error();
    let errno = os_error.raw_os_error().unwrap_or(0);

    match errno {
        EPERM => Err(WhoportError::permission_denied(pid, "signal")),
        ESRCH => Err(WhoportError::not_found(pid)),
        EINVAL => Err(WhoportError::invalid_argument(format!(
            "invalid signal: {signal}"
        ))),
        _ => Err(WhoportError::system(os_error.to_string(), errno)),
    }
}

pub fn exists_impl(pid: u32) -> WhoportResult<bool> {
    // Signal 0 runs the existence and permission checks without delivery.
    let result = unsafe { libc_kill(pid as i32, 0) };

    if result == 0 {
        return Ok(true);
    }

    let os_error = io::Error::last_os_error();
    let errno = os_error.raw_os_error().unwrap_or(0);

    match errno {
        // The process exists; we just may not signal it.
        EPERM => Ok(true),
        ESRCH => Ok(false),
        _ => Err(WhoportError::system(os_error.to_string(), errno)),
    }
}
