use std::time::Duration;

/// Fixed ciphertext chunk size (64 KiB)
pub const CHUNK_SIZE: usize = 64 * 1024;

/// Outstanding unsent bytes above which chunk emission pauses
pub const HIGH_WATER_MARK: usize = 500_000;

/// Poll interval while waiting for the channel to drain below the mark
pub const BACKPRESSURE_POLL: Duration = Duration::from_millis(10);
