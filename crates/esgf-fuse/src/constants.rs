//! Tiger Style resource bounds for the ESGF filesystem.
//!
//! All limits are explicitly defined to prevent unbounded resource use.

use std::time::Duration;

// ============================================================================
// Virtual path layout
// ============================================================================

/// Number of facet segments preceding the filename in a virtual path.
pub const FACET_SEGMENTS: usize = 9;

/// Extension of the data files served by the filesystem.
pub const DATA_FILE_EXTENSION: &str = "nc";

/// Suffix of the in-progress marker next to a cached data file.
pub const LOCK_SUFFIX: &str = ".lock";

/// Directory under the cache root holding downloaded data.
pub const CACHE_DIR_NAME: &str = "ESGF_CACHE";

/// Directory under the cache root holding download diagnostics.
pub const LOG_DIR_NAME: &str = "ESGF_LOG";

/// Raw download tool output.
pub const RAW_LOG_NAME: &str = "wget_raw.log";

/// Structured download failure notes.
pub const ERROR_LOG_NAME: &str = "download_error.log";

// ============================================================================
// Downloads
// ============================================================================

/// Default maximum number of concurrent downloads per process.
pub const DEFAULT_MAX_CONCURRENT_DOWNLOADS: usize = 5;

/// Hard ceiling for the configurable download concurrency.
pub const MAX_CONCURRENT_DOWNLOADS: usize = 64;

/// Marker the download tool prints on TLS/certificate failures.
pub const TLS_ERROR_MARKER: &str = "OpenSSL: error:";

/// Lines of tool output longer than this are truncated before logging.
pub const MAX_LOG_LINE_LENGTH: usize = 64 * 1024;

/// Default age after which an orphaned lock file is reclaimed.
pub const DEFAULT_STALE_LOCK_AFTER: Duration = Duration::from_secs(60 * 60);

/// Longest interval between refreshes of a held lock's mtime.
pub const MAX_LOCK_REFRESH_INTERVAL: Duration = Duration::from_secs(60);

/// Shortest interval between refreshes of a held lock's mtime.
pub const MIN_LOCK_REFRESH_INTERVAL: Duration = Duration::from_millis(50);

/// Worker threads of the runtime driving downloads.
pub const DOWNLOAD_RUNTIME_THREADS: usize = 2;

// ============================================================================
// Filesystem calls
// ============================================================================

/// Fixed delay before resolving a URL on open, throttling catalogue load.
pub const DEFAULT_OPEN_THROTTLE: Duration = Duration::from_millis(100);

/// Maximum number of inodes in the cache.
pub const MAX_INODE_CACHE: usize = 10_000;

/// TTL for attributes handed to the kernel.
pub const ATTR_TTL: Duration = Duration::from_secs(1);

/// TTL for directory entries handed to the kernel.
pub const ENTRY_TTL: Duration = Duration::from_secs(1);

/// Root inode number (always 1 per FUSE convention).
pub const ROOT_INODE: u64 = 1;

/// Mode of synthesized directories (0755).
pub const DIR_MODE: u32 = 0o040755;

/// Mode of served data files (0444, read-only).
pub const FILE_MODE: u32 = 0o100444;

/// Block size reported in attributes.
pub const BLOCK_SIZE: u32 = 4096;

/// Number of threads for FUSE request handling.
pub const DEFAULT_FUSE_THREADS: usize = 4;

/// Mode of the diagnostic log files (owner and group read/write).
pub const LOG_FILE_MODE: u32 = 0o660;

/// Mode of the cache directories.
pub const CACHE_DIR_MODE: u32 = 0o775;

// ============================================================================
// Compile-Time Constant Assertions
// ============================================================================

const _: () = assert!(FACET_SEGMENTS == 9);
const _: () = assert!(DEFAULT_MAX_CONCURRENT_DOWNLOADS > 0);
const _: () = assert!(DEFAULT_MAX_CONCURRENT_DOWNLOADS <= MAX_CONCURRENT_DOWNLOADS);
const _: () = assert!(DOWNLOAD_RUNTIME_THREADS > 0);
const _: () = assert!(MAX_LOCK_REFRESH_INTERVAL.as_secs() * 4 <= DEFAULT_STALE_LOCK_AFTER.as_secs());
const _: () = assert!(MIN_LOCK_REFRESH_INTERVAL.as_millis() < MAX_LOCK_REFRESH_INTERVAL.as_millis());
const _: () = assert!(MAX_INODE_CACHE > 0);
const _: () = assert!(ROOT_INODE == 1);
const _: () = assert!(BLOCK_SIZE.count_ones() == 1);
const _: () = assert!(DEFAULT_FUSE_THREADS > 0);
const _: () = assert!(DEFAULT_OPEN_THROTTLE.as_millis() < 1000);
