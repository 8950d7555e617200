//! Lookout CLI: declarative UI verification
//!
//! ## Usage
//!
//! ```bash
//! lookout validate scenarios/                  # Check scenario files offline
//! lookout run scenarios/ --base-url http://localhost:3000
//! lookout run scenarios/fitting_room.yaml -j 2 --report out/report.json
//! ```

use clap::Parser;
use lookout_cli::{handlers, logging, Cli, CliConfig, CliResult, Commands, Verbosity};
use std::process::ExitCode;

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> CliResult<()> {
    let cli = Cli::parse();
    let config = build_config(&cli);
    logging::init(&config);

    match cli.command {
        Commands::Run(ref args) => handlers::execute_run(&config, &cli.config, args),
        Commands::Validate(ref args) => handlers::execute_validate(&config, args),
    }
}

fn build_config(cli: &Cli) -> CliConfig {
    CliConfig::new()
        .with_verbosity(Verbosity::from_flags(cli.quiet, cli.verbose))
        .with_color(cli.color.into())
        .with_log_format(cli.log_format.into())
}
