// All extraction logic is in takeoff-core
// This CLI acts as a thin wrapper around the core library

// CLI-specific modules
pub mod report;

// Re-export core types for convenience
pub use takeoff_core::*;

// Re-export CLI utilities
pub use report::{default_output_path, sha256_file, DocumentReport, PageReport};
