//! whoport-core: shared types for the whoport workspace
//!
//! This crate provides the foundations used across all whoport crates:
//! - The canonical error type and result alias
//! - Schema ID constants for JSON output contracts
//! - Platform detection
//!
//! ## Error Handling
//!
//! Every query in the workspace returns [`WhoportResult`]; the taxonomy in
//! [`WhoportError`] distinguishes a vanished process, a kernel permission
//! refusal, a missing data source, and a record that failed to parse.
//!
//! ## Schema Integration
//!
//! JSON outputs include a `schema_id` field so consumers can detect shape
//! changes. See the [`schema`] module for the constants.

use std::env::consts::OS;

pub mod error;
pub mod schema;

// Re-export canonical error type at crate root
pub use error::{WhoportError, WhoportResult};

// ============================================================================
// Platform Detection
// ============================================================================

/// Get the current platform identifier.
///
/// Returns one of: "linux", "macos", etc.
///
/// This is a pure function with no side effects.
#[inline]
pub fn get_platform() -> &'static str {
    OS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_platform() {
        let platform = get_platform();
        assert!(!platform.is_empty());
        // The introspection backends exist for these two platforms only
        assert!(
            ["linux", "macos"].contains(&platform),
            "Unexpected platform: {}",
            platform
        );
    }
}
