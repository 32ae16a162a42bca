// Utility functions
// Helper functions for common operations

pub mod time;
pub mod format;

pub use format::{format_sats_compact, format_sats_with_separator};
