use clap::Parser;
use log::info;

mod app;
mod cli;
mod loader;
mod logsink;

use cli::{Args, CliError};

fn main() {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(err) => CliError::from(err).exit(),
    };

    logsink::init(&args.loglevel, args.timestamps);
    if let Some(path) = &args.log {
        if let Err(err) = logsink::redirect_to_file(path, args.append_log) {
            CliError::io(err).exit();
        }
    }

    info!("----------------------------------------------------------------------");
    info!(
        "Program {} version {} starting up",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION")
    );
    info!("----------------------------------------------------------------------");

    match app::run(&args) {
        Ok(()) => {}
        Err(err) => err.exit(),
    }
}
