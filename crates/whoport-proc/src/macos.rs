//! macOS implementation backed by libproc and sysctl
//!
//! Snapshot facts come from:
//! - `proc_pidinfo()` with `PROC_PIDTBSDINFO` - identity (name, ppid, uid, state)
//! - `proc_pidinfo()` with `PROC_PIDTASKINFO` - memory figures
//! - `proc_pidpath()` / `proc_name()` - executable path and display name
//! - `proc_listpids()` - pid enumeration
//! - `sysctl(CTL_KERN, KERN_PROCARGS2)` - the argv/environment block

use crate::{EnvironmentSet, ProcessSnapshot, ProcessState};
use libc::{c_int, c_void, pid_t, uid_t};
use std::ffi::CStr;
use std::mem;
use whoport_core::{WhoportError, WhoportResult};

// ============================================================================
// libproc Declarations
// ============================================================================

// <libproc.h> constants
const PROC_ALL_PIDS: u32 = 1;
const PROC_PIDTBSDINFO: c_int = 3;
const PROC_PIDTASKINFO: c_int = 4;
const MAXCOMLEN: usize = 16;
const MAXPATHLEN: usize = 1024;

// pbi_status values, <sys/proc.h>
const SIDL: u32 = 1; // being created
const SRUN: u32 = 2; // runnable
const SSLEEP: u32 = 3; // sleeping on an address
const SSTOP: u32 = 4; // stopped
const SZOMB: u32 = 5; // zombie

/// proc_bsdinfo, the PROC_PIDTBSDINFO flavor's record layout.
#[repr(C)]
#[derive(Debug, Default)]
struct ProcBsdInfo {
    pbi_flags: u32,
    pbi_status: u32,
    pbi_xstatus: u32,
    pbi_pid: u32,
    pbi_ppid: u32,
    pbi_uid: uid_t,
    pbi_gid: u32,
    pbi_ruid: uid_t,
    pbi_rgid: u32,
    pbi_svuid: uid_t,
    pbi_svgid: u32,
    _rfu_1: u32,
    pbi_comm: [u8; MAXCOMLEN],
    pbi_name: [u8; 2 * MAXCOMLEN],
    pbi_nfiles: u32,
    pbi_pgid: u32,
    pbi_pjobc: u32,
    e_tdev: u32,
    e_tpgid: u32,
    pbi_nice: i32,
    pbi_start_tvsec: u64,
    pbi_start_tvusec: u64,
}

/// proc_taskinfo, the PROC_PIDTASKINFO flavor's record layout.
#[repr(C)]
#[derive(Debug, Default)]
struct ProcTaskInfo {
    pti_virtual_size: u64,
    pti_resident_size: u64,
    pti_total_user: u64,
    pti_total_system: u64,
    pti_threads_user: u64,
    pti_threads_system: u64,
    pti_policy: i32,
    pti_faults: i32,
    pti_pageins: i32,
    pti_cow_faults: i32,
    pti_messages_sent: i32,
    pti_messages_received: i32,
    pti_syscalls_mach: i32,
    pti_syscalls_unix: i32,
    pti_csw: i32,
    pti_threadnum: i32,
    pti_numrunning: i32,
    pti_priority: i32,
}

extern "C" {
    fn proc_listpids(type_: u32, typeinfo: u32, buffer: *mut c_void, buffersize: c_int) -> c_int;

    fn proc_pidinfo(
        pid: c_int,
        flavor: c_int,
        arg: u64,
        buffer: *mut c_void,
        buffersize: c_int,
    ) -> c_int;

    fn proc_name(pid: c_int, buffer: *mut c_void, buffersize: u32) -> c_int;

    fn proc_pidpath(pid: c_int, buffer: *mut c_void, buffersize: u32) -> c_int;
}

// ============================================================================
// Implementation
// ============================================================================

pub fn get_process_impl(pid: u32) -> WhoportResult<ProcessSnapshot> {
    read_snapshot(pid)
}

pub fn list_processes_impl() -> WhoportResult<Vec<ProcessSnapshot>> {
    let pids = list_all_pids()?;
    let mut processes = Vec::with_capacity(pids.len());

    for pid in pids {
        if pid <= 0 {
            continue;
        }
        // A pid can exit between enumeration and this read; skip it.
        if let Ok(snap) = read_snapshot(pid as u32) {
            processes.push(snap);
        }
    }

    Ok(processes)
}

pub fn environment_impl(pid: u32) -> WhoportResult<EnvironmentSet> {
    let buf = read_procargs(pid)?;
    Ok(EnvironmentSet {
        entries: parse_procargs_env(&buf),
    })
}

/// Build a snapshot for a single PID.
fn read_snapshot(pid: u32) -> WhoportResult<ProcessSnapshot> {
    let bsd = bsd_info(pid)?;
    // Task info is refused for zombies and protected processes; memory
    // figures then degrade to zero.
    let task = task_info(pid).ok();

    let name = process_name(pid).unwrap_or_else(|| comm_name(&bsd));
    let user = get_username(bsd.pbi_uid).unwrap_or_else(|| bsd.pbi_uid.to_string());
    // No argv access without entitlements; the executable path stands in
    // for the command line.
    let cmdline = executable_path(pid).unwrap_or_else(|| name.clone());

    let state = match bsd.pbi_status {
        SRUN => ProcessState::Running,
        SSLEEP => ProcessState::Sleeping,
        SIDL => ProcessState::Idle,
        SSTOP => ProcessState::Stopped,
        SZOMB => ProcessState::Zombie,
        _ => ProcessState::Unknown,
    };

    let (vsz_kb, rss_kb) = match &task {
        Some(t) => (t.pti_virtual_size / 1024, t.pti_resident_size / 1024),
        None => (0, 0),
    };

    Ok(ProcessSnapshot {
        pid,
        ppid: bsd.pbi_ppid,
        name,
        cmdline,
        user,
        uid: bsd.pbi_uid,
        state,
        vsz_kb,
        rss_kb,
        start_time: bsd.pbi_start_tvsec,
    })
}

/// Every pid the kernel will admit to, via the two-call size-then-fetch
/// pattern proc_listpids expects.
fn list_all_pids() -> WhoportResult<Vec<pid_t>> {
    let buffer_size = unsafe { proc_listpids(PROC_ALL_PIDS, 0, std::ptr::null_mut(), 0) };

    if buffer_size <= 0 {
        return Err(WhoportError::unavailable(
            "proc_listpids",
            "size query failed",
        ));
    }

    let count = buffer_size as usize / mem::size_of::<pid_t>();
    let mut pids: Vec<pid_t> = vec![0; count];

    let actual = unsafe {
        proc_listpids(
            PROC_ALL_PIDS,
            0,
            pids.as_mut_ptr() as *mut c_void,
            buffer_size,
        )
    };

    if actual <= 0 {
        return Err(WhoportError::unavailable("proc_listpids", "fetch failed"));
    }

    // The second call reports how many bytes it actually filled.
    let actual_count = actual as usize / mem::size_of::<pid_t>();
    pids.truncate(actual_count);

    Ok(pids)
}

/// Fetch the BSD-info record for a pid.
fn bsd_info(pid: u32) -> WhoportResult<ProcBsdInfo> {
    let mut info: ProcBsdInfo = unsafe { mem::zeroed() };
    let size = mem::size_of::<ProcBsdInfo>() as c_int;

    let result = unsafe {
        proc_pidinfo(
            pid as c_int,
            PROC_PIDTBSDINFO,
            0,
            &mut info as *mut _ as *mut c_void,
            size,
        )
    };

    if result <= 0 {
        // Distinguish a vanished process from a protected one
        let errno = unsafe { *libc::__error() };
        if errno == libc::ESRCH {
            return Err(WhoportError::not_found(pid));
        } else if errno == libc::EPERM || errno == libc::EACCES {
            return Err(WhoportError::permission_denied(pid, "read process info"));
        }
        return Err(WhoportError::not_found(pid));
    }

    Ok(info)
}

/// Fetch the task-info record (memory figures) for a pid.
fn task_info(pid: u32) -> WhoportResult<ProcTaskInfo> {
    let mut info: ProcTaskInfo = unsafe { mem::zeroed() };
    let size = mem::size_of::<ProcTaskInfo>() as c_int;

    let result = unsafe {
        proc_pidinfo(
            pid as c_int,
            PROC_PIDTASKINFO,
            0,
            &mut info as *mut _ as *mut c_void,
            size,
        )
    };

    if result <= 0 {
        return Err(WhoportError::internal("task info unavailable"));
    }

    Ok(info)
}

/// Display name via proc_name; None when the call fails or answers empty.
fn process_name(pid: u32) -> Option<String> {
    let mut buffer = [0u8; MAXPATHLEN];

    let result = unsafe {
        proc_name(
            pid as c_int,
            buffer.as_mut_ptr() as *mut c_void,
            MAXPATHLEN as u32,
        )
    };

    if result > 0 {
        let name = unsafe {
            CStr::from_ptr(buffer.as_ptr() as *const libc::c_char)
                .to_string_lossy()
                .into_owned()
        };
        if !name.is_empty() {
            return Some(name);
        }
    }

    None
}

/// Name out of the BSD-info record itself, for when proc_name refuses.
fn comm_name(info: &ProcBsdInfo) -> String {
    // pbi_name holds the untruncated name; pbi_comm caps at MAXCOMLEN.
    let name_bytes = if info.pbi_name[0] != 0 {
        &info.pbi_name[..]
    } else {
        &info.pbi_comm[..]
    };

    let end = name_bytes
        .iter()
        .position(|&b| b == 0)
        .unwrap_or(name_bytes.len());
    String::from_utf8_lossy(&name_bytes[..end]).into_owned()
}

/// Absolute executable path via proc_pidpath.
fn executable_path(pid: u32) -> Option<String> {
    let mut buffer = [0u8; MAXPATHLEN];

    let result = unsafe {
        proc_pidpath(
            pid as c_int,
            buffer.as_mut_ptr() as *mut c_void,
            MAXPATHLEN as u32,
        )
    };

    if result <= 0 {
        return None;
    }

    let path = unsafe { CStr::from_ptr(buffer.as_ptr() as *const libc::c_char) }
        .to_string_lossy()
        .into_owned();
    if path.is_empty() {
        None
    } else {
        Some(path)
    }
}

/// Read the raw KERN_PROCARGS2 buffer for a process.
fn read_procargs(pid: u32) -> WhoportResult<Vec<u8>> {
    let mut mib: [c_int; 3] = [libc::CTL_KERN, libc::KERN_PROCARGS2, pid as c_int];

    // Size query first, then the read; the kernel sizes the buffer.
    let mut size: usize = 0;
    let ret = unsafe {
        libc::sysctl(
            mib.as_mut_ptr(),
            3,
            std::ptr::null_mut(),
            &mut size,
            std::ptr::null_mut(),
            0,
        )
    };
    if ret != 0 {
        return Err(map_procargs_error(pid));
    }
    if size == 0 {
        return Ok(Vec::new());
    }

    let mut buf: Vec<u8> = vec![0u8; size];
    let ret = unsafe {
        libc::sysctl(
            mib.as_mut_ptr(),
            3,
            buf.as_mut_ptr() as *mut c_void,
            &mut size,
            std::ptr::null_mut(),
            0,
        )
    };
    if ret != 0 {
        return Err(map_procargs_error(pid));
    }
    buf.truncate(size);

    Ok(buf)
}

/// Map a failed KERN_PROCARGS2 sysctl to the caller-facing error.
///
/// Some releases answer EINVAL for a live but protected process; the BSD
/// info probe separates that from a vanished pid.
fn map_procargs_error(pid: u32) -> WhoportError {
    let errno = unsafe { *libc::__error() };
    match errno {
        libc::EPERM | libc::EACCES => WhoportError::permission_denied(pid, "read environment"),
        libc::ESRCH | libc::ENOENT => WhoportError::not_found(pid),
        libc::EINVAL => match bsd_info(pid) {
            Err(WhoportError::NotFound { .. }) => WhoportError::not_found(pid),
            _ => WhoportError::permission_denied(pid, "read environment"),
        },
        _ => WhoportError::system("sysctl KERN_PROCARGS2 failed", errno),
    }
}

/// Parse the environment block out of a KERN_PROCARGS2 buffer.
///
/// Layout: `[argc: i32] [exec_path\0] [padding \0s] [argv[0]\0] ...
/// [argv[argc-1]\0] [env[0]\0] [env[1]\0] ...` with an empty string ending
/// the environment block.
fn parse_procargs_env(buf: &[u8]) -> Vec<String> {
    if buf.len() < mem::size_of::<c_int>() {
        return Vec::new();
    }

    // argc is untrusted data from the kernel buffer; cap it to avoid
    // pathological skips.
    const MAX_ARGC: i32 = 4096;

    let argc = i32::from_ne_bytes([buf[0], buf[1], buf[2], buf[3]]);
    if !(0..=MAX_ARGC).contains(&argc) {
        return Vec::new();
    }

    // exec_path follows argc, NUL-terminated and NUL-padded to alignment.
    let mut pos = mem::size_of::<c_int>();
    while pos < buf.len() && buf[pos] != 0 {
        pos += 1;
    }
    while pos < buf.len() && buf[pos] == 0 {
        pos += 1;
    }

    // Skip exactly argc argument strings (arguments may be empty).
    for _ in 0..argc {
        while pos < buf.len() && buf[pos] != 0 {
            pos += 1;
        }
        pos += 1; // argument terminator
    }

    // The remainder is the environment block, ended by the first empty
    // string. Stray non-KV fragments at the tail fail the '=' check.
    let mut entries = Vec::new();
    while pos < buf.len() {
        let start = pos;
        while pos < buf.len() && buf[pos] != 0 {
            pos += 1;
        }
        if start == pos {
            break;
        }
        let entry = String::from_utf8_lossy(&buf[start..pos]);
        if entry.contains('=') {
            entries.push(entry.into_owned());
        }
        pos += 1;
    }

    entries
}

/// Resolve a uid to a username through the reentrant getpwuid_r.
///
/// The scratch buffer doubles on ERANGE up to a 64 KiB cap; any other
/// failure (including a uid with no passwd entry) answers None.
fn get_username(uid: uid_t) -> Option<String> {
    let mut buf_size = 1024usize;
    let max_buf_size = 65536usize;

    loop {
        let mut buf: Vec<u8> = vec![0; buf_size];
        let mut pwd: libc::passwd = unsafe { std::mem::zeroed() };
        let mut result: *mut libc::passwd = std::ptr::null_mut();

        let ret = unsafe {
            libc::getpwuid_r(
                uid,
                &mut pwd,
                buf.as_mut_ptr() as *mut libc::c_char,
                buf_size,
                &mut result,
            )
        };

        if ret == libc::ERANGE && buf_size < max_buf_size {
            buf_size *= 2;
            continue;
        }

        if ret != 0 || result.is_null() {
            return None;
        }

        let name_ptr = pwd.pw_name;
        if name_ptr.is_null() {
            return None;
        }

        let name = unsafe { CStr::from_ptr(name_ptr).to_string_lossy().into_owned() };
        return Some(name);
    }
}
