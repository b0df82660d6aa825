/// Current build state file format version.
pub const STATE_VERSION: u32 = 1;

/// Extension of persisted build state files.
pub const STATE_FILE_EXT: &str = "json";

/// Suffix appended to a state file while it is being written.
pub const TEMP_FILE_SUFFIX: &str = "tmp";

/// Environment variable forcing every new build context into a full build.
pub const FULL_BUILD_ENV: &str = "BUILDGUARD_FULL_BUILD";

/// Chunk size used when comparing streamed output against existing file content.
pub const COMPARE_BUFFER_SIZE: usize = 16 * 1024;
