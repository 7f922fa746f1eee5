//! Workspace-wide constants.

/// Name of the command-line binary.
pub const BIN_NAME: &str = "sbsh";

/// Directory under which scratch mount trees are created.
pub const SCRATCH_ROOT: &str = "/tmp";

/// Maximum number of file descriptors carried in one `SCM_RIGHTS` message.
///
/// Matches the kernel's `SCM_MAX_FD` limit.
pub const SCM_MAX_FD: usize = 253;

/// Exit code for success.
pub const EXIT_SUCCESS: i32 = 0;

/// Generic exit code for a failed operation.
pub const EXIT_FAILURE: i32 = 1;

/// Exit code for a malformed invocation.
pub const EXIT_USAGE: i32 = 2;
