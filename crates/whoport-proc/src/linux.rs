//! Linux implementation backed by the /proc filesystem
//!
//! Reads process facts from:
//! - `/proc/[pid]/stat` - name, state, parent, start tick offset
//! - `/proc/[pid]/status` - numeric uid and memory fields
//! - `/proc/[pid]/cmdline` - NUL-separated command line
//! - `/proc/[pid]/environ` - NUL-separated environment block
//! - `/proc/stat` - system boot time for start-time conversion

use crate::{EnvironmentSet, ProcessSnapshot, ProcessState};
use std::ffi::CStr;
use std::fs;
use std::io;
use std::path::Path;
use whoport_core::{WhoportError, WhoportResult};

// ============================================================================
// Implementation
// ============================================================================

pub fn get_process_impl(pid: u32) -> WhoportResult<ProcessSnapshot> {
    read_snapshot(pid)
}

pub fn list_processes_impl() -> WhoportResult<Vec<ProcessSnapshot>> {
    let proc_dir = fs::read_dir("/proc")
        .map_err(|e| WhoportError::unavailable("/proc", e.to_string()))?;

    let mut processes = Vec::new();
    for entry in proc_dir.flatten() {
        let name = entry.file_name();
        let name_str = name.to_string_lossy();

        // Only numeric entries are processes.
        if !name_str.chars().all(|c| c.is_ascii_digit()) {
            continue;
        }

        let pid: u32 = match name_str.parse() {
            Ok(p) => p,
            Err(_) => continue,
        };
        if pid == 0 {
            continue;
        }

        // Silently skip processes that exit between the listing and the read.
        if let Ok(snap) = read_snapshot(pid) {
            processes.push(snap);
        }
    }

    Ok(processes)
}

pub fn environment_impl(pid: u32) -> WhoportResult<EnvironmentSet> {
    let raw = fs::read(format!("/proc/{pid}/environ"))
        .map_err(|e| map_environ_error(e, pid))?;

    let entries = raw
        .split(|&b| b == 0)
        .filter(|chunk| !chunk.is_empty())
        .map(|chunk| String::from_utf8_lossy(chunk).into_owned())
        .collect();

    Ok(EnvironmentSet { entries })
}

/// Build a snapshot from /proc/[pid]/*.
fn read_snapshot(pid: u32) -> WhoportResult<ProcessSnapshot> {
    let proc_path = Path::new("/proc").join(pid.to_string());

    // stat carries the primary identity fields; if it cannot be read or
    // parsed the process is not observable.
    let stat_raw = fs::read_to_string(proc_path.join("stat"))
        .map_err(|_| WhoportError::not_found(pid))?;
    let stat = parse_stat(&stat_raw).ok_or_else(|| WhoportError::not_found(pid))?;

    // status supplies uid and memory; absence degrades to defaults.
    let status_raw = fs::read_to_string(proc_path.join("status")).unwrap_or_default();
    let status = parse_status(&status_raw);

    let cmdline_raw = fs::read(proc_path.join("cmdline")).unwrap_or_default();
    let joined = join_cmdline(&cmdline_raw);
    let cmdline = if joined.is_empty() {
        // Kernel threads have no command line.
        format!("[{}]", stat.name)
    } else {
        joined
    };

    let user = get_username(status.uid).unwrap_or_else(|| status.uid.to_string());

    // Start ticks are relative to boot; /proc/stat's btime anchors them.
    let boot = boot_time();
    let start_time = if boot == 0 {
        0
    } else {
        boot + stat.start_ticks / clock_ticks()
    };

    Ok(ProcessSnapshot {
        pid,
        ppid: stat.ppid,
        name: stat.name,
        cmdline,
        user,
        uid: status.uid,
        state: ProcessState::from_code(stat.state),
        vsz_kb: status.vsz_kb,
        rss_kb: status.rss_kb,
        start_time,
    })
}

/// Fields pulled from /proc/[pid]/stat.
struct StatFields {
    name: String,
    state: char,
    ppid: u32,
    start_ticks: u64,
}

/// Parse the one-line /proc/[pid]/stat record.
///
/// Layout after the bracketed name: state ppid pgrp session tty_nr tpgid
/// flags minflt cminflt majflt cmajflt utime stime cutime cstime priority
/// nice num_threads itrealvalue starttime ...; starttime is field 20,
/// counted from state.
fn parse_stat(content: &str) -> Option<StatFields> {
    // comm may contain spaces and parens; bracket it by the first '(' and
    // the last ')'.
    let open = content.find('(')?;
    let close = content.rfind(')')?;
    if close < open {
        return None;
    }
    let name = content[open + 1..close].to_string();

    let rest = content.get(close + 1..)?;
    let fields: Vec<&str> = rest.split_whitespace().collect();
    if fields.len() < 20 {
        return None;
    }

    let state = fields[0].chars().next()?;
    let ppid = fields[1].parse().ok()?;
    let start_ticks = fields[19].parse().ok()?;

    Some(StatFields {
        name,
        state,
        ppid,
        start_ticks,
    })
}

/// Fields pulled from /proc/[pid]/status; all optional, zero when absent.
struct StatusFields {
    uid: u32,
    vsz_kb: u64,
    rss_kb: u64,
}

fn parse_status(content: &str) -> StatusFields {
    let mut fields = StatusFields {
        uid: 0,
        vsz_kb: 0,
        rss_kb: 0,
    };

    for line in content.lines() {
        if let Some(rest) = line.strip_prefix("Uid:") {
            // Format: "Uid:\treal\teffective\tsaved\tfs"
            if let Some(first) = rest.split_whitespace().next() {
                fields.uid = first.parse().unwrap_or(0);
            }
        } else if let Some(rest) = line.strip_prefix("VmSize:") {
            fields.vsz_kb = parse_kb(rest);
        } else if let Some(rest) = line.strip_prefix("VmRSS:") {
            fields.rss_kb = parse_kb(rest);
        }
    }

    fields
}

/// Parse a status memory value ("\t  10240 kB").
fn parse_kb(rest: &str) -> u64 {
    rest.split_whitespace()
        .next()
        .and_then(|v| v.parse().ok())
        .unwrap_or(0)
}

/// Join the NUL-separated command line into one spaced string.
///
/// Uses lossy UTF-8 conversion so non-UTF-8 arguments cannot fail the read.
fn join_cmdline(bytes: &[u8]) -> String {
    let mut bytes = bytes.to_vec();
    for b in &mut bytes {
        if *b == 0 {
            *b = b' ';
        }
    }
    String::from_utf8_lossy(&bytes).trim_end().to_string()
}

fn map_environ_error(e: io::Error, pid: u32) -> WhoportError {
    match e.kind() {
        io::ErrorKind::NotFound => WhoportError::not_found(pid),
        io::ErrorKind::PermissionDenied => {
            WhoportError::permission_denied(pid, "read environment")
        }
        _ => e.into(),
    }
}

/// Resolve a uid to a username through the reentrant getpwuid_r.
///
/// The scratch buffer doubles on ERANGE up to a 64 KiB cap; any other
/// failure (including a uid with no passwd entry) answers None.
fn get_username(uid: u32) -> Option<String> {
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

/// System boot time (Unix seconds) from the btime line of /proc/stat.
fn boot_time() -> u64 {
    if let Ok(content) = fs::read_to_string("/proc/stat") {
        for line in content.lines() {
            if let Some(rest) = line.strip_prefix("btime ") {
                return rest.trim().parse().unwrap_or(0);
            }
        }
    }
    0
}

/// Clock ticks per second for starttime conversion.
///
/// sysconf answers -1 on failure; 100 is the value on every mainstream
/// Linux configuration and stands in.
fn clock_ticks() -> u64 {
    let result = unsafe { libc::sysconf(libc::_SC_CLK_TCK) };
    if result <= 0 {
        100
    } else {
        result as u64
    }
}
