pub const BYTES_PER_KB: usize = 1024;
pub const PERCENT_100: f64 = 100.0;

pub const DEFAULT_LOG_VERBOSITY: &str = "normal";
pub const LOG_TARGET_CRATE: &str = "tuonella_unique";

pub const OUTPUT_BUFFER_SIZE_KB: usize = 512;
pub const INPUT_BUFFER_SIZE_KB: usize = 256;
