//! logroll CLI.
//!
//! This crate provides the command-line interface that pipes stdin into a
//! self-rotating log file. It handles argument parsing, validation, and
//! exit codes.

pub mod cli;
pub mod exit;
pub mod pipe;

pub use cli::{parse_from, Args, CliError};
pub use pipe::{execute_pipe, CommandError, PipeResult};
