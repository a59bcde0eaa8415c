//! whoport-proc: Process inspection, ancestry walking, and environment reading
//!
//! This crate answers "what is the observable state of process P?". It reads
//! kernel-exposed process metadata into a uniform snapshot type, enumerates
//! all visible processes, walks a process's chain of ancestors, and reads a
//! process's environment block.
//!
//! ## Platform Support
//!
//! | Feature | Linux | macOS |
//! |---------|-------|-------|
//! | Process snapshot | /proc/[pid]/* | proc_pidinfo |
//! | PID enumeration | /proc | proc_listpids |
//! | Environment | /proc/[pid]/environ | sysctl KERN_PROCARGS2 |
//!
//! ## Example
//!
//! ```rust,no_run
//! // Inspect the current process.
//! let me = whoport_proc::get_process(std::process::id()).unwrap();
//! println!("{} ({}) owned by {}", me.name, me.pid, me.user);
//!
//! // Walk its ancestry up to the root.
//! let chain = whoport_proc::ancestry(me.pid).unwrap();
//! for ancestor in &chain.processes {
//!     println!("{} <- {}", ancestor.pid, ancestor.ppid);
//! }
//! ```
//!
//! Every call is a point-in-time read: snapshots are created fresh per query,
//! never cached, and never mutated after construction.

use serde::Serialize;
use std::collections::HashSet;
use whoport_core::{WhoportError, WhoportResult};

// Platform-specific implementations
#[cfg(target_os = "linux")]
mod linux;
#[cfg(target_os = "macos")]
mod macos;

// Re-export the platform implementation
#[cfg(target_os = "linux")]
use linux as platform;
#[cfg(target_os = "macos")]
use macos as platform;

// ============================================================================
// Core Types
// ============================================================================

/// Point-in-time metadata for a single process.
///
/// Primary identity fields (`pid`, `ppid`, `name`, `state`) are always
/// populated; secondary fields (memory, user, start time) degrade to
/// zero/numeric defaults when the kernel withholds them.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessSnapshot {
    /// Process ID.
    pub pid: u32,

    /// Parent process ID (0 for the root).
    pub ppid: u32,

    /// Short executable name.
    pub name: String,

    /// Full command line, argument-separated by single spaces.
    ///
    /// Kernel threads on Linux have no command line and are rendered as the
    /// bracketed name (`[kthreadd]` style).
    pub cmdline: String,

    /// Owner username; falls back to the numeric uid rendered as a string
    /// when no passwd entry exists.
    pub user: String,

    /// Owner numeric user id.
    pub uid: u32,

    /// Lifecycle state.
    pub state: ProcessState,

    /// Virtual memory size in kilobytes (0 if unavailable).
    pub vsz_kb: u64,

    /// Resident set size in kilobytes (0 if unavailable).
    pub rss_kb: u64,

    /// Process start time as seconds since the Unix epoch (0 if unknown).
    pub start_time: u64,
}

/// Process lifecycle state.
///
/// Maps platform-specific state codes to a common enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessState {
    /// Running or runnable.
    Running,
    /// Sleeping (interruptible or uninterruptible).
    Sleeping,
    /// Stopped by a signal or debugger.
    Stopped,
    /// Terminated but not yet reaped.
    Zombie,
    /// Idle (kernel threads on Linux, freshly created processes on macOS).
    Idle,
    /// State could not be determined.
    Unknown,
}

impl ProcessState {
    /// Map a single-letter kernel state code to the common vocabulary.
    ///
    /// Covers the Linux `/proc/[pid]/stat` codes, including the ones retired
    /// from newer kernels ('D', 'X', 't').
    pub fn from_code(code: char) -> Self {
        match code {
            'R' => ProcessState::Running,
            'S' | 'D' => ProcessState::Sleeping,
            'T' | 't' => ProcessState::Stopped,
            'Z' | 'X' => ProcessState::Zombie,
            'I' => ProcessState::Idle,
            _ => ProcessState::Unknown,
        }
    }

    /// Canonical single-letter form, as shown in table output.
    pub fn code(self) -> char {
        match self {
            ProcessState::Running => 'R',
            ProcessState::Sleeping => 'S',
            ProcessState::Stopped => 'T',
            ProcessState::Zombie => 'Z',
            ProcessState::Idle => 'I',
            ProcessState::Unknown => '?',
        }
    }
}

/// Chain of ancestors for a process, ordered leaf first.
///
/// The queried process is `processes[0]`; each subsequent entry is the
/// parent of the one before it, up to the furthest resolvable ancestor.
#[derive(Debug, Clone, Serialize)]
pub struct AncestryChain {
    /// Snapshots from the queried leaf to the root.
    pub processes: Vec<ProcessSnapshot>,
}

/// Environment variables of a process as raw `KEY=VALUE` strings.
///
/// Order-preserving as returned by the kernel; duplicates are kept (the
/// kernel does not deduplicate).
#[derive(Debug, Clone, Serialize)]
pub struct EnvironmentSet {
    /// Raw `KEY=VALUE` entries.
    pub entries: Vec<String>,
}

// ============================================================================
// Public API
// ============================================================================

// PIDs above i32::MAX would go negative when cast to pid_t.
const MAX_SAFE_PID: u32 = i32::MAX as u32;

fn validate_pid(pid: u32) -> WhoportResult<()> {
    if pid == 0 {
        return Err(WhoportError::invalid_argument("PID 0 is not valid"));
    }
    if pid > MAX_SAFE_PID {
        return Err(WhoportError::invalid_argument(format!(
            "PID {} exceeds maximum safe value {}",
            pid, MAX_SAFE_PID
        )));
    }
    Ok(())
}

/// Get a snapshot of a single process.
///
/// # Errors
///
/// Returns `NotFound` if the process does not exist (or its primary state
/// cannot be read), `InvalidArgument` for pid 0 or a pid beyond the signed
/// range.
///
/// # Example
///
/// ```rust,no_run
/// let me = whoport_proc::get_process(std::process::id()).unwrap();
/// assert_eq!(me.pid, std::process::id());
/// ```
pub fn get_process(pid: u32) -> WhoportResult<ProcessSnapshot> {
    validate_pid(pid)?;
    platform::get_process_impl(pid)
}

/// List all processes visible to the current user.
///
/// Processes that vanish or cannot be read between enumeration and the
/// per-pid query are silently skipped. Ordering follows the kernel's
/// enumeration order and is not guaranteed sorted.
pub fn list_processes() -> WhoportResult<Vec<ProcessSnapshot>> {
    platform::list_processes_impl()
}

/// Walk the ancestry of a process from the leaf up to the root.
///
/// The walk is a bounded loop: it stops when the parent id is 0, when a
/// process is its own parent (the root on some platforms), when a pid
/// repeats, or when a parent can no longer be resolved. An unresolvable
/// parent ends the chain without failing it; the chain built so far is
/// returned.
///
/// # Errors
///
/// Returns `NotFound` only when the leaf itself cannot be resolved.
pub fn ancestry(pid: u32) -> WhoportResult<AncestryChain> {
    validate_pid(pid)?;

    let leaf = platform::get_process_impl(pid)?;

    let mut visited = HashSet::new();
    visited.insert(leaf.pid);

    let mut current_pid = leaf.pid;
    let mut parent_pid = leaf.ppid;
    let mut processes = vec![leaf];

    // The kernel never reports a cycle, but reparenting can race with the
    // walk; the visited set bounds it regardless.
    while parent_pid != 0 && parent_pid != current_pid && visited.insert(parent_pid) {
        match platform::get_process_impl(parent_pid) {
            Ok(parent) => {
                current_pid = parent.pid;
                parent_pid = parent.ppid;
                processes.push(parent);
            }
            // Parent exited mid-walk; the chain up to here stands.
            Err(_) => break,
        }
    }

    Ok(AncestryChain { processes })
}

/// Read the environment of a process as raw `KEY=VALUE` strings.
///
/// # Errors
///
/// Returns `PermissionDenied` for processes owned by another user (the
/// kernel enforces this), `NotFound` if the process has vanished.
pub fn environment(pid: u32) -> WhoportResult<EnvironmentSet> {
    validate_pid(pid)?;
    platform::environment_impl(pid)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_self() {
        let pid = std::process::id();
        let snap = get_process(pid).unwrap();
        assert_eq!(snap.pid, pid);
        assert!(!snap.name.is_empty(), "Process should have a name");
    }

    #[test]
    fn test_get_self_has_valid_fields() {
        let pid = std::process::id();
        let snap = get_process(pid).unwrap();

        assert!(!snap.cmdline.is_empty(), "Test binary has a command line");
        assert!(!snap.user.is_empty(), "Owner should resolve or fall back");
        assert!(snap.start_time > 0, "Start time should be a real timestamp");

        let own_uid = unsafe { libc::geteuid() };
        assert_eq!(snap.uid, own_uid);

        // We are executing, so running or (briefly) sleeping.
        assert!(
            snap.state == ProcessState::Running || snap.state == ProcessState::Sleeping,
            "Test process should be running or sleeping, got {:?}",
            snap.state
        );
    }

    #[test]
    fn test_invalid_pid_zero() {
        let result = get_process(0);
        assert!(
            matches!(result, Err(WhoportError::InvalidArgument { .. })),
            "PID 0 should be invalid"
        );
    }

    #[test]
    fn test_pid_beyond_signed_range() {
        let result = get_process(u32::MAX);
        assert!(matches!(result, Err(WhoportError::InvalidArgument { .. })));
    }

    #[test]
    fn test_nonexistent_pid() {
        // Use a very high PID that shouldn't exist
        let result = get_process(99999999);
        assert!(
            matches!(result, Err(WhoportError::NotFound { .. })),
            "Should return NotFound for nonexistent PID"
        );
    }

    #[test]
    fn test_list_contains_self() {
        let processes = list_processes().unwrap();
        let own_pid = std::process::id();
        assert!(
            processes.iter().any(|p| p.pid == own_pid),
            "Listing should include our own process"
        );
    }

    #[test]
    fn test_list_snapshots_are_plausible() {
        let processes = list_processes().unwrap();
        assert!(!processes.is_empty());
        for p in &processes {
            assert!(p.pid > 0, "Enumerated pids are positive");
            assert!(!p.name.is_empty(), "PID {} should have a name", p.pid);
        }
    }

    #[test]
    fn test_ancestry_of_self_terminates() {
        let pid = std::process::id();
        let chain = ancestry(pid).unwrap();

        assert!(!chain.processes.is_empty());
        assert_eq!(chain.processes[0].pid, pid, "Chain starts at the leaf");

        // No pid may repeat, whatever the platform's root looks like.
        let mut seen = HashSet::new();
        for p in &chain.processes {
            assert!(seen.insert(p.pid), "PID {} repeated in chain", p.pid);
        }
    }

    #[test]
    fn test_ancestry_links_are_consistent() {
        let chain = ancestry(std::process::id()).unwrap();
        for pair in chain.processes.windows(2) {
            assert_eq!(
                pair[0].ppid, pair[1].pid,
                "Each entry's parent is the next entry"
            );
        }
    }

    #[test]
    fn test_ancestry_of_root() {
        // PID 1 must terminate immediately: its parent is 0 or itself.
        // On macOS reading launchd may be denied outright; that also proves
        // the walk cannot loop through it.
        match ancestry(1) {
            Ok(chain) => {
                assert_eq!(chain.processes[0].pid, 1);
                assert_eq!(chain.processes.len(), 1);
            }
            Err(WhoportError::PermissionDenied { pid, .. }) => assert_eq!(pid, 1),
            Err(WhoportError::NotFound { .. }) => {
                eprintln!("skipping: PID 1 not visible in this environment");
            }
            Err(e) => panic!("Unexpected error walking PID 1: {e:?}"),
        }
    }

    #[test]
    fn test_environment_of_self() {
        let env = environment(std::process::id()).unwrap();
        assert!(!env.entries.is_empty(), "Test process has environment");
        for entry in &env.entries {
            let (key, _) = entry.split_once('=').unwrap_or((entry.as_str(), ""));
            assert!(!key.is_empty(), "Entry {entry:?} has an empty key");
            assert!(entry.contains('='), "Entry {entry:?} is not KEY=VALUE");
        }
    }

    #[test]
    fn test_environment_of_foreign_process_denied() {
        if unsafe { libc::geteuid() } == 0 {
            eprintln!("skipping: running as root, nothing is denied");
            return;
        }
        // In a user-namespace container PID 1 can be our own uid; only a
        // genuinely foreign PID 1 proves the denial path.
        match get_process(1) {
            Ok(snap) if snap.uid == unsafe { libc::geteuid() } => {
                eprintln!("skipping: PID 1 is owned by the current user");
                return;
            }
            Err(_) => {
                eprintln!("skipping: PID 1 not visible in this environment");
                return;
            }
            Ok(_) => {}
        }
        let result = environment(1);
        assert!(
            matches!(
                result,
                Err(WhoportError::PermissionDenied { .. } | WhoportError::NotFound { .. })
            ),
            "Expected a denial, got {result:?}"
        );
    }

    #[test]
    fn test_state_code_round_trip() {
        assert_eq!(ProcessState::from_code('R'), ProcessState::Running);
        assert_eq!(ProcessState::from_code('S'), ProcessState::Sleeping);
        assert_eq!(ProcessState::from_code('D'), ProcessState::Sleeping);
        assert_eq!(ProcessState::from_code('T'), ProcessState::Stopped);
        assert_eq!(ProcessState::from_code('t'), ProcessState::Stopped);
        assert_eq!(ProcessState::from_code('Z'), ProcessState::Zombie);
        assert_eq!(ProcessState::from_code('X'), ProcessState::Zombie);
        assert_eq!(ProcessState::from_code('I'), ProcessState::Idle);
        assert_eq!(ProcessState::from_code('W'), ProcessState::Unknown);

        assert_eq!(ProcessState::Running.code(), 'R');
        assert_eq!(ProcessState::Zombie.code(), 'Z');
        assert_eq!(ProcessState::Unknown.code(), '?');
    }

    #[test]
    fn test_state_serialization() {
        // States serialize to snake_case
        let json = serde_json::to_string(&ProcessState::Running).unwrap();
        assert_eq!(json, "\"running\"");

        let json = serde_json::to_string(&ProcessState::Zombie).unwrap();
        assert_eq!(json, "\"zombie\"");

        let json = serde_json::to_string(&ProcessState::Idle).unwrap();
        assert_eq!(json, "\"idle\"");
    }

    #[test]
    fn test_snapshot_json_shape() {
        let snap = get_process(std::process::id()).unwrap();
        let json = serde_json::to_string(&snap).unwrap();

        assert!(json.contains("\"pid\""));
        assert!(json.contains("\"ppid\""));
        assert!(json.contains("\"cmdline\""));
        assert!(json.contains("\"state\""));
    }
}
