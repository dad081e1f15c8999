//! Exit codes for the logroll CLI.
//!
//! Following Unix conventions for exit codes.

use logroll_writer::LogError;

use crate::pipe::CommandError;

/// Exit code constants.
pub mod codes {
    /// Successful execution.
    pub const SUCCESS: i32 = 0;
    /// Invalid arguments.
    pub const INVALID_ARGS: i32 = 1;
    /// IO error.
    pub const IO_ERROR: i32 = 2;
    /// The log file could not be opened, rotated or written.
    pub const LOG_ERROR: i32 = 3;
}

/// Map a CommandError to an exit code.
pub fn exit_code(error: &CommandError) -> i32 {
    match error {
        CommandError::InvalidArgument(_) => codes::INVALID_ARGS,
        CommandError::Log(LogError::Config(_)) => codes::INVALID_ARGS,
        CommandError::Log(_) => codes::LOG_ERROR,
        CommandError::Input(_) => codes::IO_ERROR,
    }
}
