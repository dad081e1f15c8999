//! Pipe command orchestration.
//!
//! Reads lines from an input stream and writes each one to the rotating
//! file as a single record.

use std::io::{self, BufRead};

use logroll_writer::{LogError, Reporter, RotatingFile};
use thiserror::Error;

use crate::cli::CliError;

/// Errors from command execution.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("invalid argument: {0}")]
    InvalidArgument(#[from] CliError),

    #[error("log error: {0}")]
    Log(#[from] LogError),

    #[error("failed to read input: {0}")]
    Input(#[source] io::Error),
}

/// Result of piping one input stream.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PipeResult {
    /// Lines written to the log.
    pub lines: usize,
    /// Bytes written to the log.
    pub bytes: u64,
    /// Lines dropped because they exceed the maximum file size.
    pub dropped: usize,
}

/// Copy `input` into `logger` line by line until EOF.
///
/// Lines keep their trailing newline. A line larger than the maximum file
/// size is reported and skipped. At EOF, or on the first other failure, the
/// writer is shut down and background work is waited for.
pub fn execute_pipe<R: BufRead>(
    mut input: R,
    logger: &RotatingFile,
    reporter: &dyn Reporter,
) -> Result<PipeResult, CommandError> {
    let copied = copy_lines(&mut input, logger, reporter);

    let closed = logger.shutdown();
    logger.wait_for_background();

    let result = copied?;
    closed?;
    reporter.info(&format!(
        "wrote {} lines ({} bytes), dropped {}",
        result.lines, result.bytes, result.dropped
    ));
    Ok(result)
}

fn copy_lines<R: BufRead>(
    input: &mut R,
    logger: &RotatingFile,
    reporter: &dyn Reporter,
) -> Result<PipeResult, CommandError> {
    let mut result = PipeResult::default();
    let mut line = Vec::new();

    loop {
        line.clear();
        let read = match input.read_until(b'\n', &mut line) {
            Ok(read) => read,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(CommandError::Input(e)),
        };
        if read == 0 {
            return Ok(result);
        }

        match logger.write(&line) {
            Ok(written) => {
                result.lines += 1;
                result.bytes += written as u64;
            }
            Err(e @ LogError::OversizedWrite { .. }) => {
                reporter.warn(&format!("dropped line: {}", e));
                result.dropped += 1;
            }
            Err(e) => return Err(e.into()),
        }
    }
}
