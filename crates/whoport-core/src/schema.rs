//! Schema ID constants for JSON output contracts.
//!
//! All whoport JSON reports include a `schema_id` field naming the shape of
//! the document, so downstream tooling can detect contract changes without
//! guessing from field presence. The ids are plain path-style strings; there
//! is no registry behind them and no runtime schema validation.
//!
//! ## Example
//!
//! ```rust,ignore
//! use whoport_core::schema::PORT_REPORT_V1;
//! use serde::Serialize;
//!
//! #[derive(Serialize)]
//! struct PortReport {
//!     schema_id: &'static str,
//!     port: u16,
//!     // ... other fields
//! }
//!
//! let report = PortReport {
//!     schema_id: PORT_REPORT_V1,
//!     port: 8080,
//! };
//! ```

/// Schema ID for port resolution JSON output (v1).
///
/// This is the shape of `whoport port <PORT> --json` output.
pub const PORT_REPORT_V1: &str = "whoport/port-report/v1";

/// Schema ID for single-process JSON output (v1).
///
/// This is the shape of `whoport pid <PID> --json` output.
pub const PROCESS_REPORT_V1: &str = "whoport/process-report/v1";

/// Schema ID for process list JSON output (v1).
///
/// This is the shape of `whoport list --json` output.
pub const PROCESS_LIST_V1: &str = "whoport/process-list/v1";

/// Common prefix of every whoport schema id.
pub const SCHEMA_PREFIX: &str = "whoport/";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_ids_share_prefix() {
        assert!(PORT_REPORT_V1.starts_with(SCHEMA_PREFIX));
        assert!(PROCESS_REPORT_V1.starts_with(SCHEMA_PREFIX));
        assert!(PROCESS_LIST_V1.starts_with(SCHEMA_PREFIX));
    }

    #[test]
    fn test_schema_ids_are_versioned() {
        assert!(PORT_REPORT_V1.ends_with("/v1"));
        assert!(PROCESS_REPORT_V1.ends_with("/v1"));
        assert!(PROCESS_LIST_V1.ends_with("/v1"));
    }

    #[test]
    fn test_schema_ids_are_unique() {
        let ids = [PORT_REPORT_V1, PROCESS_REPORT_V1, PROCESS_LIST_V1];

        for (i, a) in ids.iter().enumerate() {
            for (j, b) in ids.iter().enumerate() {
                if i != j {
                    assert_ne!(a, b, "Schema IDs must be unique");
                }
            }
        }
    }
}
