//! Pipeline wiring for the shell
//!
//! Owns the input/output byte streams and drives the
//! tokenizer → decoder → emitter (or loader) pipeline to completion.

use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use anyhow::anyhow;
use chrono::Utc;
use log::{debug, error, info};

use shef::{
    emitter, Decoder, DecoderOptions, OutputFormat, ParamRegistry, ShefError, TimeModel, Tokenizer,
};

use crate::cli::{exit_code, Args, CliError};
use crate::loader::{self, ShefLoader};

const DESCRIPTION: &str = r#"
shefdec decodes Standard Hydrometeorologic Exchange Format (SHEF) text,
NWS version 2.2, into one line per value in either of the two classic
fixed-column formats, or hands the values to a time-series loader.

SHEFPARM file:
    A SHEFPARM file is not required. If --defaults is not given, the
    current directory is searched first, then the directory named by the
    "rfs_sys_dir" environment variable. Program defaults are used when no
    file is found. Any modification a SHEFPARM file makes to the defaults
    is logged at INFO or WARNING on startup. Use --make_shefparm to print
    the defaults in SHEFPARM form.

Times and time zones:
    By default, times are resolved with tz-database rules. The
    --shefit_times option switches to the date/time logic of the NWS
    shefit program, including its incorrect UTC times for SHEF zones Y,
    YD, YS, and ND, and for zone N during daylight saving time.

Messages with errors:
    Valid values are mined from partially corrupt messages where
    possible. Use --reject_problematic to discard every value from any
    message that produced an error.

Loaders:
    dummy: writes each time series to the output as plain text. Cannot
    unload.
"#;

/// Run the program with parsed arguments
pub fn run(args: &Args) -> Result<(), CliError> {
    if args.description {
        println!("{}", DESCRIPTION);
        return Ok(());
    }
    if args.make_shefparm {
        return make_shefparm(args);
    }
    if args.unload && args.loader.is_none() {
        return Err(CliError::config(anyhow!(
            "--unload may only be used if --loader is also used"
        )));
    }

    let registry = build_registry(args)?;
    let mut output = open_output(args)?;
    let format = match args.format {
        2 => OutputFormat::Text2,
        _ => OutputFormat::Text1,
    };

    let mut loader = match &args.loader {
        Some(spec) => {
            let loader = loader::create(spec, output).map_err(CliError::config)?;
            if args.unload && !loader.can_unload() {
                return Err(CliError::config(anyhow!(
                    "loader {} does not support --unload",
                    loader.name()
                )));
            }
            output = Box::new(io::sink());
            Some(loader)
        }
        None => None,
    };

    let mut input = open_input(args)?;
    if args.unload {
        let loader = loader.as_mut().expect("checked above");
        loader
            .unload(&mut input)
            .map_err(|e| CliError::new(e, exit_code::INTERNAL))?;
        return Ok(());
    }

    let started = Utc::now();
    let outcome = if args.processed {
        run_processed(&registry, input, &mut output, format, &mut loader)
    } else {
        run_decode(args, &registry, input, &mut output, format, &mut loader)
    };
    let stats = match &outcome {
        Ok(stats) | Err((stats, _)) => stats,
    };

    if let Some(loader) = loader.as_mut() {
        loader
            .done()
            .map_err(|e| CliError::new(e, exit_code::INTERNAL))?;
    } else {
        output.flush()?;
    }

    info!("--[Summary]-----------------------------------------------------------");
    info!("Start time = {}", started.format("%Y-%m-%d %H:%M:%S"));
    info!("{:6} lines read", stats.lines);
    info!("{:6} messages processed", stats.messages);
    info!("{:6} values decoded", stats.values);
    info!("{:6} warnings", stats.warnings);
    info!("{:6} errors", stats.errors);

    match outcome {
        Ok(_) => Ok(()),
        Err((_, e)) => Err(e),
    }
}

#[derive(Default)]
struct RunStats {
    lines: usize,
    messages: usize,
    values: usize,
    warnings: u32,
    errors: u32,
}

type RunOutcome = Result<RunStats, (RunStats, CliError)>;

// the normal pipeline: tokenize, decode, emit or dispatch
fn run_decode(
    args: &Args,
    registry: &ParamRegistry,
    input: Box<dyn BufRead>,
    output: &mut Box<dyn Write>,
    format: OutputFormat,
    loader: &mut Option<Box<dyn ShefLoader>>,
) -> RunOutcome {
    let mut stats = RunStats::default();
    let mut tokenizer = Tokenizer::new(input);
    let mut decoder = Decoder::new(
        registry,
        DecoderOptions {
            time_model: if args.shefit_times {
                TimeModel::Legacy
            } else {
                TimeModel::Modern
            },
            strict: args.reject_problematic,
            now: Utc::now(),
        },
    );
    let mut series: Option<String> = None;
    loop {
        let record = match tokenizer.next_message() {
            Ok(Some(record)) => record,
            Ok(None) => break,
            Err(e) => {
                stats.lines = tokenizer.lines_read();
                return Err((stats, e.into()));
            }
        };
        stats.messages += 1;
        debug!(
            "processing {:?} message at line {}",
            record.kind, record.line_number
        );
        for value in decoder.decode(&record) {
            stats.values += 1;
            if let Err(e) = dispatch(registry, output, format, loader, &mut series, &value) {
                stats.lines = tokenizer.lines_read();
                stats.warnings = decoder.warning_count();
                stats.errors = decoder.error_count();
                return Err((stats, e));
            }
        }
        if decoder.exhausted() {
            stats.lines = tokenizer.lines_read();
            stats.warnings = decoder.warning_count();
            stats.errors = decoder.error_count();
            let e = ShefError::TooManyErrors(registry.max_errors());
            return Err((stats, e.into()));
        }
    }
    stats.lines = tokenizer.lines_read();
    stats.warnings = decoder.warning_count();
    stats.errors = decoder.error_count();
    Ok(stats)
}

// processed input: one already-formatted value per line, re-emitted
fn run_processed(
    registry: &ParamRegistry,
    input: Box<dyn BufRead>,
    output: &mut Box<dyn Write>,
    format: OutputFormat,
    loader: &mut Option<Box<dyn ShefLoader>>,
) -> RunOutcome {
    let mut stats = RunStats::default();
    let mut series: Option<String> = None;
    for line in input.lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => return Err((stats, e.into())),
        };
        stats.lines += 1;
        if line.trim().is_empty() {
            continue;
        }
        match emitter::parse_processed(&line, registry) {
            Ok(value) => {
                stats.values += 1;
                if let Err(e) = dispatch(registry, output, format, loader, &mut series, &value) {
                    return Err((stats, e));
                }
            }
            Err(e) => {
                error!("{} at line {}", e, stats.lines);
                stats.errors += 1;
                if stats.errors > registry.max_errors() {
                    let e = ShefError::TooManyErrors(registry.max_errors());
                    return Err((stats, e.into()));
                }
            }
        }
    }
    Ok(stats)
}

// hand one value to the loader or the output
fn dispatch(
    registry: &ParamRegistry,
    output: &mut Box<dyn Write>,
    format: OutputFormat,
    loader: &mut Option<Box<dyn ShefLoader>>,
    series: &mut Option<String>,
    value: &shef::ShefValue,
) -> Result<(), CliError> {
    match loader {
        Some(loader) => {
            let name = loader.time_series_name(value);
            if series.as_deref().is_some_and(|prev| prev != name) {
                loader
                    .load_time_series()
                    .map_err(|e| CliError::new(e, exit_code::INTERNAL))?;
            }
            *series = Some(name);
            loader
                .set_shef_value(value)
                .map_err(|e| CliError::new(e, exit_code::INTERNAL))?;
        }
        None => match emitter::emit(value, format, registry) {
            Ok(line) => writeln!(output, "{}", line)?,
            Err(e) => error!("cannot format value for {}: {}", value.location, e),
        },
    }
    Ok(())
}

fn make_shefparm(args: &Args) -> Result<(), CliError> {
    if args.shefparm.is_some()
        || args.defaults
        || args.input.is_some()
        || args.log.is_some()
        || args.loader.is_some()
        || args.processed
        || args.unload
        || args.format != 1
    {
        return Err(CliError::config(anyhow!(
            "--make_shefparm may not be used with any other argument except -o/--out"
        )));
    }
    let mut output = open_output(args)?;
    output.write_all(ParamRegistry::default().emit_shefparm().as_bytes())?;
    output.flush()?;
    Ok(())
}

// registry from --shefparm, a SHEFPARM file in the standard locations, or
// the built-in defaults
fn build_registry(args: &Args) -> Result<ParamRegistry, CliError> {
    let path: Option<PathBuf> = if let Some(explicit) = &args.shefparm {
        Some(PathBuf::from(explicit))
    } else if args.defaults {
        None
    } else {
        [
            PathBuf::from("SHEFPARM"),
            std::env::var_os("rfs_sys_dir")
                .map(|dir| Path::new(&dir).join("SHEFPARM"))
                .unwrap_or_default(),
        ]
        .into_iter()
        .find(|p| !p.as_os_str().is_empty() && p.is_file())
    };
    match path {
        Some(path) => {
            let text = std::fs::read_to_string(&path).map_err(|e| {
                CliError::config(anyhow!("cannot read SHEFPARM file {}: {}", path.display(), e))
            })?;
            info!("modifying program defaults with {}", path.display());
            let (registry, _diags) = ParamRegistry::with_shefparm(&text);
            Ok(registry)
        }
        None => {
            debug!("using program defaults");
            Ok(ParamRegistry::default())
        }
    }
}

fn open_input(args: &Args) -> Result<Box<dyn BufRead>, CliError> {
    match &args.input {
        Some(path) => {
            info!("reading from {}", path);
            let file = File::open(path)
                .map_err(|e| CliError::io(anyhow!("unable to open --in {}: {}", path, e)))?;
            Ok(Box::new(BufReader::new(file)))
        }
        None => {
            info!("reading from <stdin>");
            Ok(Box::new(BufReader::new(io::stdin())))
        }
    }
}

fn open_output(args: &Args) -> Result<Box<dyn Write>, CliError> {
    match &args.out {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .write(true)
                .append(args.append_out)
                .truncate(!args.append_out)
                .open(path)
                .map_err(|e| CliError::io(anyhow!("unable to open --out {}: {}", path, e)))?;
            Ok(Box::new(file))
        }
        None => Ok(Box::new(io::stdout())),
    }
}
