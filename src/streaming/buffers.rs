//! Buffer size constants for streaming operations.
//!
//! These constants control memory usage vs I/O throughput tradeoffs.

/// Default output buffer size (2 MB).
pub const DEFAULT_OUTPUT_BUFFER: usize = 2 * 1024 * 1024;

/// Output buffer for per-partition and cache files (256 KB).
pub const PART_OUTPUT_BUFFER: usize = 256 * 1024;

/// Default input buffer size (256 KB).
pub const DEFAULT_INPUT_BUFFER: usize = 256 * 1024;

/// Rows buffered per partition channel before the producing worker blocks.
pub const PARTITION_CHANNEL_CAPACITY: usize = 4096;

/// Returns the output buffer size for a final or intermediate writer.
#[inline]
pub const fn output_buffer_size(intermediate: bool) -> usize {
    if intermediate {
        PART_OUTPUT_BUFFER
    } else {
        DEFAULT_OUTPUT_BUFFER
    }
}
