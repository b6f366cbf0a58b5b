use std::process::ExitCode;

use clap::Parser;
use daemon::{Cli, ServerConfig};
use logging::Verbosity;

fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(Verbosity::from_count(cli.verbose));

    let config = match ServerConfig::resolve(&cli) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("kvsrvd: {err}");
            return ExitCode::FAILURE;
        }
    };

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("kvsrvd: failed to start the runtime: {err}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(daemon::run(config)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("kvsrvd: {err}");
            ExitCode::FAILURE
        }
    }
}
