//! whoport-net: TCP connection tables and port-to-process resolution
//!
//! This crate answers "which process owns TCP port N?". It reads the kernel's
//! connection tables, filters for the requested local port, and joins each
//! match against the process that holds the socket.
//!
//! ## Platform Support
//!
//! | Feature | Linux | macOS |
//! |---------|-------|-------|
//! | Connection tables | /proc/net/tcp, /proc/net/tcp6 | lsof -F output |
//! | Socket ownership | /proc/[pid]/fd/* symlinks | lsof -F output |
//!
//! ## Example
//!
//! ```rust,no_run
//! let records = whoport_net::resolve_port(8080).unwrap();
//! for rec in &records {
//!     match rec.pid {
//!         Some(pid) => println!("{}:{} {} pid {}", rec.local_addr, rec.local_port, rec.state, pid),
//!         None => println!("{}:{} {} unknown owner", rec.local_addr, rec.local_port, rec.state),
//!     }
//! }
//! ```
//!
//! Resolution is a point-in-time read: every call re-parses the tables and
//! rebuilds the socket ownership mapping, so results reflect the instant of
//! the query and nothing is cached between calls.

use serde::Serialize;
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

/// Transport protocol of a connection table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    /// TCP over IPv4.
    Tcp,
    /// TCP over IPv6.
    Tcp6,
}

impl Protocol {
    /// Lowercase tag, as shown in table output.
    pub fn as_str(self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Tcp6 => "tcp6",
        }
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// TCP connection state.
///
/// Maps the kernel's numeric state codes to a common enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TcpState {
    Established,
    SynSent,
    SynRecv,
    FinWait1,
    FinWait2,
    TimeWait,
    Close,
    CloseWait,
    LastAck,
    Listen,
    Closing,
    /// State code outside the known table.
    Unknown,
}

impl TcpState {
    /// Map a procfs connection-table state code to the common vocabulary.
    pub fn from_code(code: u8) -> Self {
        match code {
            0x01 => TcpState::Established,
            0x02 => TcpState::SynSent,
            0x03 => TcpState::SynRecv,
            0x04 => TcpState::FinWait1,
            0x05 => TcpState::FinWait2,
            0x06 => TcpState::TimeWait,
            0x07 => TcpState::Close,
            0x08 => TcpState::CloseWait,
            0x09 => TcpState::LastAck,
            0x0A => TcpState::Listen,
            0x0B => TcpState::Closing,
            _ => TcpState::Unknown,
        }
    }

    /// Canonical uppercase form, as shown in table output.
    pub fn as_str(self) -> &'static str {
        match self {
            TcpState::Established => "ESTABLISHED",
            TcpState::SynSent => "SYN_SENT",
            TcpState::SynRecv => "SYN_RECV",
            TcpState::FinWait1 => "FIN_WAIT1",
            TcpState::FinWait2 => "FIN_WAIT2",
            TcpState::TimeWait => "TIME_WAIT",
            TcpState::Close => "CLOSE",
            TcpState::CloseWait => "CLOSE_WAIT",
            TcpState::LastAck => "LAST_ACK",
            TcpState::Listen => "LISTEN",
            TcpState::Closing => "CLOSING",
            TcpState::Unknown => "UNKNOWN",
        }
    }
}

impl std::fmt::Display for TcpState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One kernel-reported connection matched against its owning process.
///
/// Immutable once constructed; one record per connection table line.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionRecord {
    /// Which connection table the record came from.
    pub protocol: Protocol,

    /// Local address in display form.
    pub local_addr: String,

    /// Local port.
    pub local_port: u16,

    /// Remote address in display form (`*` when there is no peer).
    pub remote_addr: String,

    /// Remote port (0 when there is no peer).
    pub remote_port: u16,

    /// Connection state.
    pub state: TcpState,

    /// Owning process, when the socket could be traced to one. `None` means
    /// the owner is unknown, typically because the socket belongs to another
    /// user and its descriptor links are unreadable.
    pub pid: Option<u32>,
}

// ============================================================================
// Public API
// ============================================================================

/// Resolve all TCP connections using `port`.
///
/// On Linux this means connections whose local port equals `port`; on macOS
/// the enumeration source also surfaces the peer endpoint of an established
/// pair. An empty list means nothing is using the port; that is a successful
/// answer, not an error. Errors are reserved for the kernel data source
/// itself being unusable.
///
/// # Errors
///
/// Returns `InvalidArgument` for port 0, `Unavailable` when no connection
/// table could be consulted at all.
///
/// # Example
///
/// ```rust,no_run
/// let records = whoport_net::resolve_port(8080).unwrap();
/// println!("{} connection(s) on port 8080", records.len());
/// ```
pub fn resolve_port(port: u16) -> WhoportResult<Vec<ConnectionRecord>> {
    if port == 0 {
        return Err(WhoportError::invalid_argument(
            "port must be between 1 and 65535",
        ));
    }
    platform::resolve_port_impl(port)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_zero_rejected() {
        let result = resolve_port(0);
        assert!(
            matches!(result, Err(WhoportError::InvalidArgument { .. })),
            "Port 0 should be invalid"
        );
    }

    #[test]
    fn test_state_code_table() {
        assert_eq!(TcpState::from_code(0x01), TcpState::Established);
        assert_eq!(TcpState::from_code(0x02), TcpState::SynSent);
        assert_eq!(TcpState::from_code(0x03), TcpState::SynRecv);
        assert_eq!(TcpState::from_code(0x04), TcpState::FinWait1);
        assert_eq!(TcpState::from_code(0x05), TcpState::FinWait2);
        assert_eq!(TcpState::from_code(0x06), TcpState::TimeWait);
        assert_eq!(TcpState::from_code(0x07), TcpState::Close);
        assert_eq!(TcpState::from_code(0x08), TcpState::CloseWait);
        assert_eq!(TcpState::from_code(0x09), TcpState::LastAck);
        assert_eq!(TcpState::from_code(0x0A), TcpState::Listen);
        assert_eq!(TcpState::from_code(0x0B), TcpState::Closing);
        assert_eq!(TcpState::from_code(0x0C), TcpState::Unknown);
        assert_eq!(TcpState::from_code(0x00), TcpState::Unknown);
    }

    #[test]
    fn test_state_display() {
        assert_eq!(TcpState::Listen.to_string(), "LISTEN");
        assert_eq!(TcpState::Established.to_string(), "ESTABLISHED");
        assert_eq!(TcpState::FinWait1.to_string(), "FIN_WAIT1");
    }

    #[test]
    fn test_state_serialization() {
        // States serialize to their canonical uppercase form
        let json = serde_json::to_string(&TcpState::Listen).unwrap();
        assert_eq!(json, "\"LISTEN\"");

        let json = serde_json::to_string(&TcpState::CloseWait).unwrap();
        assert_eq!(json, "\"CLOSE_WAIT\"");
    }

    #[test]
    fn test_protocol_tags() {
        assert_eq!(Protocol::Tcp.as_str(), "tcp");
        assert_eq!(Protocol::Tcp6.as_str(), "tcp6");
        assert_eq!(serde_json::to_string(&Protocol::Tcp6).unwrap(), "\"tcp6\"");
    }

    #[test]
    fn test_record_json_shape() {
        let record = ConnectionRecord {
            protocol: Protocol::Tcp,
            local_addr: "127.0.0.1".to_string(),
            local_port: 8080,
            remote_addr: "*".to_string(),
            remote_port: 0,
            state: TcpState::Listen,
            pid: None,
        };
        let json = serde_json::to_string(&record).unwrap();

        assert!(json.contains("\"protocol\":\"tcp\""));
        assert!(json.contains("\"local_port\":8080"));
        assert!(json.contains("\"state\":\"LISTEN\""));
        // Unresolved owner serializes as null, not as a sentinel number
        assert!(json.contains("\"pid\":null"));
    }
}
