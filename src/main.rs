use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use outlay::backend::open_store;
use outlay::cli;
use outlay::config::{CliArgs, Config, LoggingConfig};

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_new(&logging.level).unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn main() -> ExitCode {
    let args = CliArgs::parse();

    let config = match Config::load(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };
    init_tracing(&config.logging);

    let result =
        open_store(&config.storage).and_then(|store| cli::run(store.as_ref(), args.command));
    match result {
        Ok(output) => {
            println!("{}", output);
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(kind = ?e.kind(), "{}", e);
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
