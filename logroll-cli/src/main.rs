//! logroll binary.
//!
//! Entry point for the `logroll` command-line tool.

use std::io;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use logroll_cli::exit::{codes, exit_code};
use logroll_cli::{execute_pipe, Args, CommandError};
use logroll_writer::{Level, Reporter, RotatingFile, StderrReporter};

fn main() -> ExitCode {
    let args = Args::parse();

    match run(&args) {
        Ok(()) => ExitCode::from(codes::SUCCESS as u8),
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::from(exit_code(&e) as u8)
        }
    }
}

fn run(args: &Args) -> Result<(), CommandError> {
    args.validate()?;

    let reporter: Arc<dyn Reporter> =
        Arc::new(StderrReporter::new(Level::from_verbosity(args.verbose)));
    let logger = RotatingFile::from_config(&args.to_config())?.with_reporter(Arc::clone(&reporter));

    reporter.debug(&format!("writing to {}", logger.path().display()));

    let stdin = io::stdin();
    execute_pipe(stdin.lock(), &logger, reporter.as_ref())?;
    Ok(())
}
