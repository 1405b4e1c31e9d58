/// Default in-memory budget for the unique tree (max_heap_table_size).
pub const DEFAULT_MEMORY_BUDGET_KB: usize = 16 * 1024;
pub const MIN_MEMORY_BUDGET_BYTES: usize = 64;

pub const MIN_MEMORY_USAGE_PERCENT: f64 = 1.0;
pub const MAX_MEMORY_USAGE_PERCENT: f64 = 90.0;

/// Bookkeeping bytes charged per tree entry on top of the key itself.
pub const TREE_ELEMENT_OVERHEAD: usize = 24;
pub const ELEMENT_ALIGNMENT: usize = 8;

/// Runs merged together in one collapse step (MERGEBUFF).
pub const MERGE_FAN_IN: usize = 7;
/// Collapse passes start once the last run index reaches this (MERGEBUFF2).
pub const COLLAPSE_THRESHOLD: usize = 15;
pub const MIN_MERGE_FAN_IN: usize = 2;

pub const IO_SIZE: usize = 4096;
pub const DISK_BUFFER_SIZE_KB: usize = IO_SIZE * 16 / 1024;
pub const TIME_FOR_COMPARE_ROWID: f64 = 10.0;
pub const DISK_SEEK_BASE_COST: f64 = 0.9;

pub const DIRECTORY_INITIAL_CAPACITY: usize = 16;
