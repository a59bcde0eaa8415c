//! macOS implementation delegating to lsof
//!
//! Connection enumeration goes through `lsof -nP -iTCP:<port> -F pcn`,
//! invoked directly with no shell in between. The `-F` flag selects
//! machine-parseable output with one-character field tags:
//!
//! ```text
//! p735
//! cSpotify
//! n*:8080
//! p859
//! cnginx
//! n127.0.0.1:8080->127.0.0.1:52311
//! ```
//!
//! `p` starts a process section, `c` names it, and each `n` line is one
//! connection's address spec under the current process.

use crate::{ConnectionRecord, Protocol, TcpState};
use std::process::Command;
use whoport_core::{WhoportError, WhoportResult};

// ============================================================================
// Implementation
// ============================================================================

pub fn resolve_port_impl(port: u16) -> WhoportResult<Vec<ConnectionRecord>> {
    let output = Command::new("lsof")
        .args(["-nP", &format!("-iTCP:{port}"), "-F", "pcn"])
        .output()
        .map_err(|e| WhoportError::unavailable("lsof", e.to_string()))?;

    // lsof exits nonzero with empty output when nothing matches; that is an
    // empty answer, not a failure.
    if !output.status.success() && output.stdout.is_empty() {
        return Ok(Vec::new());
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    Ok(parse_lsof_output(&stdout, port))
}

/// Parse field-tagged lsof output into connection records.
fn parse_lsof_output(output: &str, port: u16) -> Vec<ConnectionRecord> {
    let mut records = Vec::new();
    let mut current_pid: Option<u32> = None;

    for line in output.lines() {
        if let Some(value) = line.strip_prefix('p') {
            current_pid = value.parse().ok();
        } else if let Some(value) = line.strip_prefix('n') {
            if let Some(record) = parse_name_field(value, port, current_pid) {
                records.push(record);
            }
        }
        // 'c' (command name) lines carry nothing the record needs; the
        // caller joins names through the process layer.
    }

    records
}

/// Parse one `n` field into a record.
///
/// Forms seen in practice: `*:8080`, `127.0.0.1:8080`, `[::1]:8080`, and
/// `127.0.0.1:8080->127.0.0.1:52311` for a connected pair. The output
/// carries no state field, so every record reports as listening.
fn parse_name_field(value: &str, port: u16, pid: Option<u32>) -> Option<ConnectionRecord> {
    let (local, remote) = match value.split_once("->") {
        Some((local, remote)) => (local, Some(remote)),
        None => (value, None),
    };

    let (local_addr, local_port) = split_host_port(local)?;
    let local_port = local_port.unwrap_or(port);

    let (remote_addr, remote_port) = match remote {
        Some(remote) => {
            let (addr, parsed) = split_host_port(remote)?;
            (addr, parsed.unwrap_or(0))
        }
        None => ("*".to_string(), 0),
    };

    let protocol = if local_addr.contains(':') {
        Protocol::Tcp6
    } else {
        Protocol::Tcp
    };

    Some(ConnectionRecord {
        protocol,
        local_addr,
        local_port,
        remote_addr,
        remote_port,
        state: TcpState::Listen,
        pid,
    })
}

/// Split an lsof `host:port` spec; brackets around an IPv6 host are
/// stripped so addresses render the same way as on other platforms.
fn split_host_port(spec: &str) -> Option<(String, Option<u16>)> {
    let (host, port_str) = spec.rsplit_once(':')?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    Some((host.to_string(), port_str.parse().ok()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_lsof_output() {
        let output = "p735\ncSpotify\nn*:8080\np859\ncnginx\nn127.0.0.1:8080->127.0.0.1:52311\nn[::1]:8080\n";
        let records = parse_lsof_output(output, 8080);
        assert_eq!(records.len(), 3);

        assert_eq!(records[0].pid, Some(735));
        assert_eq!(records[0].local_addr, "*");
        assert_eq!(records[0].local_port, 8080);
        assert_eq!(records[0].protocol, Protocol::Tcp);
        assert_eq!(records[0].remote_addr, "*");
        assert_eq!(records[0].remote_port, 0);
        assert_eq!(records[0].state, TcpState::Listen);

        // The second process owns both remaining connections.
        assert_eq!(records[1].pid, Some(859));
        assert_eq!(records[1].local_addr, "127.0.0.1");
        assert_eq!(records[1].remote_addr, "127.0.0.1");
        assert_eq!(records[1].remote_port, 52311);

        assert_eq!(records[2].pid, Some(859));
        assert_eq!(records[2].local_addr, "::1");
        assert_eq!(records[2].protocol, Protocol::Tcp6);
    }

    #[test]
    fn test_parse_wildcard_port_spec() {
        // A `*:*` spec has no parseable port; the queried port stands in.
        let records = parse_lsof_output("p100\nn*:*\n", 9000);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].local_port, 9000);
        assert_eq!(records[0].pid, Some(100));
    }

    #[test]
    fn test_parse_empty_output() {
        assert!(parse_lsof_output("", 8080).is_empty());
    }

    #[test]
    fn test_parse_name_line_without_process() {
        // An n line before any p line still yields a record, just without
        // an owner.
        let records = parse_lsof_output("n*:443\n", 443);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].pid, None);
    }

    #[test]
    fn test_split_host_port() {
        assert_eq!(
            split_host_port("127.0.0.1:8080"),
            Some(("127.0.0.1".to_string(), Some(8080)))
        );
        assert_eq!(
            split_host_port("[::1]:8080"),
            Some(("::1".to_string(), Some(8080)))
        );
        assert_eq!(split_host_port("*:*"), Some(("*".to_string(), None)));
        assert_eq!(split_host_port("no-port-here"), None);
    }
}
