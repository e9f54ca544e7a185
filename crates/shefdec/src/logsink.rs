//! Log output for the shell
//!
//! Records go to standard error until [`redirect_to_file`] swaps in the
//! `--log` file. Lines carry the level name the way the reference tool
//! prints them (`WARNING: …`), with an optional ISO-8601 timestamp prefix.

use std::fs::OpenOptions;
use std::io::Write;
use std::sync::Mutex;

use chrono::Local;
use log::{Level, LevelFilter, Log, Metadata, Record};

struct Sink {
    target: Mutex<Box<dyn Write + Send>>,
    timestamps: bool,
}

impl Log for Sink {
    fn enabled(&self, _metadata: &Metadata<'_>) -> bool {
        true
    }

    fn log(&self, record: &Record<'_>) {
        let level = match record.level() {
            Level::Error => "ERROR",
            Level::Warn => "WARNING",
            Level::Info => "INFO",
            Level::Debug => "DEBUG",
            Level::Trace => "DEBUG",
        };
        let mut target = self.target.lock().expect("log sink poisoned");
        let result = if self.timestamps {
            writeln!(
                target,
                "{} {}: {}",
                Local::now().format("%Y-%m-%d %H:%M:%S"),
                level,
                record.args()
            )
        } else {
            writeln!(target, "{}: {}", level, record.args())
        };
        drop(result);
    }

    fn flush(&self) {
        let _ = self.target.lock().expect("log sink poisoned").flush();
    }
}

static SINK: std::sync::OnceLock<&'static Sink> = std::sync::OnceLock::new();

/// Install the stderr sink at the requested level
///
/// Level names follow the reference tool: DEBUG, INFO, WARNING, ERROR,
/// CRITICAL (mapped to ERROR).
pub fn init(loglevel: &str, timestamps: bool) {
    let filter = match loglevel {
        "DEBUG" => LevelFilter::Debug,
        "INFO" => LevelFilter::Info,
        "WARNING" => LevelFilter::Warn,
        "ERROR" | "CRITICAL" => LevelFilter::Error,
        _ => LevelFilter::Info,
    };
    let sink: &'static Sink = Box::leak(Box::new(Sink {
        target: Mutex::new(Box::new(std::io::stderr())),
        timestamps,
    }));
    let _ = SINK.set(sink);
    let _ = log::set_logger(sink);
    log::set_max_level(filter);
}

/// Redirect subsequent records to the `--log` file
pub fn redirect_to_file(path: &str, append: bool) -> std::io::Result<()> {
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .append(append)
        .truncate(!append)
        .open(path)?;
    if let Some(sink) = SINK.get() {
        *sink.target.lock().expect("log sink poisoned") = Box::new(file);
    }
    Ok(())
}
