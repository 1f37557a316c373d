//! Core utilities and shared types for the reachability engine.

pub mod gate;

pub use gate::{AdmissionGate, Permit};

pub const fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// Split a comma-separated hostname argument into individual names.
/// Surrounding whitespace and empty entries are dropped; order and duplicates are kept.
pub fn split_hosts(arg: &str) -> Vec<String> {
    arg.split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}
