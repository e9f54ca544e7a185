use std::fmt::Display;

use clap::{value_parser, Parser};

const ABOUT: &str = "Decodes SHEF messages into fixed-column text or a time-series loader";

const AFTER_HELP: &str = r#"
Reads SHEF text (NWS version 2.2) from --in, expands every .A, .B, and .E
message into individual dated values, and writes one line per value to
--out in the selected --format. Alternatively, values can be handed to a
--loader for storage in a time-series store.

Registry defaults match the SHEFPARM file bundled with the NWS shefit
program. Use --shefparm to apply an override file, or --defaults to ignore
any SHEFPARM file found in the current directory or $rfs_sys_dir.

Use --make_shefparm to print the built-in registry in SHEFPARM form.
"#;

/// Top-level program arguments
#[derive(Parser, Clone, Debug)]
#[command(version)]
#[command(about = ABOUT, long_about = None)]
#[command(after_help = AFTER_HELP)]
#[command(max_term_width = 100)]
pub struct Args {
    /// Path of SHEFPARM file to use
    #[arg(short, long, conflicts_with = "defaults")]
    pub shefparm: Option<String>,

    /// Use program defaults (ignore any default SHEFPARM file)
    #[arg(long)]
    pub defaults: bool,

    /// Input file (defaults to <stdin>)
    #[arg(short = 'i', long = "in", value_name = "input_filename")]
    pub input: Option<String>,

    /// Output file (defaults to <stdout>)
    #[arg(short, long, value_name = "output_filename")]
    pub out: Option<String>,

    /// Log file (defaults to <stderr>)
    #[arg(short, long, value_name = "log_filename")]
    pub log: Option<String>,

    /// Output format
    #[arg(short, long, default_value_t = 1)]
    #[arg(value_parser = value_parser!(u8).range(1..=2))]
    pub format: u8,

    /// Verbosity/logging level
    #[arg(short = 'v', long, default_value = "INFO")]
    #[arg(value_parser = ["DEBUG", "INFO", "WARNING", "ERROR", "CRITICAL"])]
    pub loglevel: String,

    /// Dispatch values to a named loader, e.g. dummy[option1][option2]
    #[arg(long, value_name = "ts_loader")]
    pub loader: Option<String>,

    /// Input is already in format 1 or 2; re-parse and re-emit
    #[arg(long)]
    pub processed: bool,

    /// Timestamp log output
    #[arg(long)]
    pub timestamps: bool,

    /// Use shefit date/time logic (preserves its known zone defects)
    #[arg(long = "shefit_times")]
    pub shefit_times: bool,

    /// Reject all values from messages that contain errors
    #[arg(long = "reject_problematic")]
    pub reject_problematic: bool,

    /// Append to the output file instead of overwriting
    #[arg(long = "append_out")]
    pub append_out: bool,

    /// Append to the log file instead of overwriting
    #[arg(long = "append_log")]
    pub append_log: bool,

    /// Use the loader to unload from its data store to SHEF text
    #[arg(long)]
    pub unload: bool,

    /// Write SHEFPARM data to the output and exit
    #[arg(long = "make_shefparm")]
    pub make_shefparm: bool,

    /// Show a more detailed program description and exit
    #[arg(long)]
    pub description: bool,
}

/// Process exit codes
pub mod exit_code {
    pub const CONFIG: i32 = 1;
    pub const IO: i32 = 2;
    pub const MAX_ERRORS: i32 = 3;
    pub const INTERNAL: i32 = 4;
}

/// A program-level error with its exit code
#[derive(Debug)]
pub struct CliError {
    error: anyhow::Error,
    exit_code: i32,
}

impl CliError {
    pub fn new(error: anyhow::Error, exit_code: i32) -> CliError {
        CliError { error, exit_code }
    }

    pub fn config<E: Into<anyhow::Error>>(error: E) -> CliError {
        CliError::new(error.into(), exit_code::CONFIG)
    }

    pub fn io<E: Into<anyhow::Error>>(error: E) -> CliError {
        CliError::new(error.into(), exit_code::IO)
    }

    /// Report this error and terminate the process
    pub fn exit(&self) -> ! {
        if let Some(e) = self.error.downcast_ref::<clap::Error>() {
            let _ = e.print();
        } else {
            // the sink is installed before any fallible work begins
            log::error!("{:#}", self.error);
        }
        std::process::exit(self.exit_code);
    }
}

impl Display for CliError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self.error)
    }
}

impl std::error::Error for CliError {}

impl From<clap::Error> for CliError {
    fn from(err: clap::Error) -> CliError {
        let code = if err.use_stderr() { exit_code::CONFIG } else { 0 };
        CliError::new(err.into(), code)
    }
}

impl From<shef::ShefError> for CliError {
    fn from(err: shef::ShefError) -> CliError {
        let code = match &err {
            shef::ShefError::Io(_) => exit_code::IO,
            shef::ShefError::Config(_) => exit_code::CONFIG,
            shef::ShefError::TooManyErrors(_) => exit_code::MAX_ERRORS,
            _ => exit_code::INTERNAL,
        };
        CliError::new(err.into(), code)
    }
}

impl From<std::io::Error> for CliError {
    fn from(err: std::io::Error) -> CliError {
        CliError::new(err.into(), exit_code::IO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clap() {
        use clap::CommandFactory;
        Args::command().debug_assert();
    }

    #[test]
    fn test_exclusive_flags() {
        assert!(Args::try_parse_from(["shefdec", "--shefparm", "X", "--defaults"]).is_err());
        let args = Args::try_parse_from(["shefdec", "--format", "2", "--shefit_times"]).unwrap();
        assert_eq!(args.format, 2);
        assert!(args.shefit_times);
        assert!(Args::try_parse_from(["shefdec", "--format", "3"]).is_err());
    }
}
