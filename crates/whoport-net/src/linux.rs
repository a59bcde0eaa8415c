//! Linux implementation backed by the /proc filesystem
//!
//! Reads connection facts from:
//! - `/proc/net/tcp` - IPv4 connection table
//! - `/proc/net/tcp6` - IPv6 connection table (same field layout)
//! - `/proc/[pid]/fd/*` - socket descriptor symlinks for owner lookup

use crate::{ConnectionRecord, Protocol, TcpState};
use std::collections::HashMap;
use std::fs;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use whoport_core::{WhoportError, WhoportResult};

// ============================================================================
// Implementation
// ============================================================================

pub fn resolve_port_impl(port: u16) -> WhoportResult<Vec<ConnectionRecord>> {
    let tables = [
        ("/proc/net/tcp", Protocol::Tcp),
        ("/proc/net/tcp6", Protocol::Tcp6),
    ];

    let mut matches = Vec::new();
    let mut tables_read = 0;

    for (path, protocol) in tables {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) => {
                // Kernels built without IPv6 have no tcp6 table.
                tracing::debug!(path, error = %e, "connection table not readable");
                continue;
            }
        };
        tables_read += 1;

        for entry in parse_table(&content) {
            if entry.local_port == port {
                matches.push((protocol, entry));
            }
        }
    }

    if tables_read == 0 {
        return Err(WhoportError::unavailable(
            "/proc/net/tcp",
            "no connection table could be opened",
        ));
    }

    if matches.is_empty() {
        return Ok(Vec::new());
    }

    // One pass over every process's descriptor links, then O(1) joins.
    let index = SocketOwnerIndex::build();

    Ok(matches
        .into_iter()
        .map(|(protocol, entry)| ConnectionRecord {
            protocol,
            local_addr: entry.local_addr.to_string(),
            local_port: entry.local_port,
            remote_addr: entry.remote_addr.to_string(),
            remote_port: entry.remote_port,
            state: entry.state,
            pid: index.owner(entry.inode),
        })
        .collect())
}

// ============================================================================
// Connection Table Parsing
// ============================================================================

/// One decoded line of a procfs connection table.
#[derive(Debug)]
struct TcpTableEntry {
    local_addr: IpAddr,
    local_port: u16,
    remote_addr: IpAddr,
    remote_port: u16,
    state: TcpState,
    inode: u64,
}

/// Parse the body of a connection table, skipping the header line.
fn parse_table(content: &str) -> Vec<TcpTableEntry> {
    let mut entries = Vec::new();

    for line in content.lines().skip(1) {
        if line.trim().is_empty() {
            continue;
        }
        match parse_line(line) {
            Some(entry) => entries.push(entry),
            None => {
                tracing::debug!(line, "skipping malformed connection table line");
            }
        }
    }

    entries
}

/// Parse one connection table line.
///
/// Format: sl local_address rem_address st tx_queue:rx_queue tr:tm->when
///         retrnsmt uid timeout inode ...
/// Addresses are hexadecimal `ADDR:PORT` pairs.
fn parse_line(line: &str) -> Option<TcpTableEntry> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < 10 {
        return None;
    }

    let (local_addr, local_port) = decode_addr_port(fields[1])?;
    let (remote_addr, remote_port) = decode_addr_port(fields[2])?;
    let state_code = u8::from_str_radix(fields[3], 16).ok()?;
    let inode = fields[9].parse().ok()?;

    Some(TcpTableEntry {
        local_addr,
        local_port,
        remote_addr,
        remote_port,
        state: TcpState::from_code(state_code),
        inode,
    })
}

/// Split and decode a hexadecimal `ADDR:PORT` field.
fn decode_addr_port(field: &str) -> Option<(IpAddr, u16)> {
    let (addr_hex, port_hex) = field.split_once(':')?;
    let port = u16::from_str_radix(port_hex, 16).ok()?;
    let addr = decode_addr(addr_hex)?;
    Some((addr, port))
}

/// Decode a procfs hexadecimal address field.
///
/// IPv4 is one little-endian 32-bit word (8 hex digits). IPv6 is four such
/// words in sequence (32 hex digits), each contributing its four bytes in
/// order; decoding word by word keeps all 128 bits.
fn decode_addr(hex: &str) -> Option<IpAddr> {
    match hex.len() {
        8 => {
            let raw = u32::from_str_radix(hex, 16).ok()?;
            Some(IpAddr::V4(Ipv4Addr::from(raw.to_le_bytes())))
        }
        32 => {
            let mut bytes = [0u8; 16];
            for (i, chunk) in hex.as_bytes().chunks(8).enumerate() {
                let chunk = std::str::from_utf8(chunk).ok()?;
                let raw = u32::from_str_radix(chunk, 16).ok()?;
                bytes[i * 4..(i + 1) * 4].copy_from_slice(&raw.to_le_bytes());
            }
            Some(IpAddr::V6(Ipv6Addr::from(bytes)))
        }
        _ => None,
    }
}

// ============================================================================
// Socket Owner Index
// ============================================================================

/// Inode-to-pid mapping built from every process's descriptor links.
///
/// Sockets appear in `/proc/[pid]/fd/` as symlinks whose target reads
/// `socket:[inode]`. The index is built in a single pass per resolution and
/// answers each matching connection's owner in O(1).
struct SocketOwnerIndex {
    by_inode: HashMap<u64, u32>,
}

impl SocketOwnerIndex {
    /// Scan `/proc/[pid]/fd/*` once for all visible processes.
    ///
    /// Descriptor directories of other users' processes are unreadable
    /// without privileges; those pids are skipped and their sockets stay
    /// unowned in the index.
    fn build() -> Self {
        let mut by_inode = HashMap::new();

        let proc_dir = match fs::read_dir("/proc") {
            Ok(dir) => dir,
            Err(_) => return SocketOwnerIndex { by_inode },
        };

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

            let fd_dir = match fs::read_dir(entry.path().join("fd")) {
                Ok(dir) => dir,
                Err(_) => continue,
            };

            for fd in fd_dir.flatten() {
                let target = match fs::read_link(fd.path()) {
                    Ok(target) => target,
                    Err(_) => continue,
                };
                if let Some(inode) = socket_inode(&target.to_string_lossy()) {
                    // A descriptor shared across processes keeps its first
                    // claimant.
                    by_inode.entry(inode).or_insert(pid);
                }
            }
        }

        tracing::debug!(sockets = by_inode.len(), "built socket owner index");
        SocketOwnerIndex { by_inode }
    }

    fn owner(&self, inode: u64) -> Option<u32> {
        // Inode 0 marks a socket detached from any descriptor (TIME_WAIT
        // remnants); it never has an owner.
        if inode == 0 {
            return None;
        }
        self.by_inode.get(&inode).copied()
    }
}

/// Extract the inode from a `socket:[12345]` symlink target.
fn socket_inode(target: &str) -> Option<u64> {
    target
        .strip_prefix("socket:[")?
        .strip_suffix(']')?
        .parse()
        .ok()
}
