//! Standard exit codes for CLI operations
//!
//! These exit codes follow Unix conventions and sysexits.h where applicable.

/// General error - unspecified failure
pub const ERROR: i32 = 1;

/// Sync error - the repository index could not be fetched or merged
pub const SYNC_ERROR: i32 = 2;

/// Release error - chart resolution or the package manager failed
pub const RELEASE_ERROR: i32 = 3;

/// Config error - configuration file missing or invalid
pub const CONFIG_ERROR: i32 = 4;

/// IO error - file not found, permission denied, etc.
pub const IO_ERROR: i32 = 5;

/// Usage error - invalid arguments or options (following sysexits.h convention)
pub const USAGE_ERROR: i32 = 64;
