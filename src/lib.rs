// Unique engine - bounded-memory duplicate elimination with external merge
pub mod unique;

// Unit conversions and logging defaults shared with the binary
pub mod constants;

// Logging setup and human-readable formatting
pub mod utils;

// Re-export main types for convenience
pub use unique::{
    collect_unique, estimate_cost, FixedStrideBuffer, KeyComparator, SequentialStream, Unique,
    UniqueConfig, UniqueError, UniqueStats,
};
