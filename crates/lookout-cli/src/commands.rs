//! CLI command definitions using clap

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::config::{ColorChoice, LogFormat};

/// Lookout: declarative UI verification for web applications
#[derive(Parser, Debug)]
#[command(name = "lookout")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Quiet mode (failures only)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Color output (auto, always, never)
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorArg,

    /// Log line format
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormatArg,

    /// Harness configuration file
    #[arg(short, long, default_value = "lookout.yaml", global = true, env = "LOOKOUT_CONFIG")]
    pub config: PathBuf,

    /// Subcommand to run
    #[command(subcommand)]
    pub command: Commands,
}

/// CLI subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run scenario files against a live browser
    Run(RunArgs),

    /// Check scenario files and print their step plans without a browser
    Validate(ValidateArgs),
}

/// Arguments for the run command
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Scenario files or directories of `.yaml` scenarios
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,

    /// Base URL of the application under test
    #[arg(long, env = "LOOKOUT_BASE_URL")]
    pub base_url: Option<String>,

    /// Directory screenshots are written to
    #[arg(short, long, env = "LOOKOUT_ARTIFACT_DIR")]
    pub artifacts: Option<PathBuf>,

    /// Write the JSON suite report here instead of stdout
    #[arg(short, long)]
    pub report: Option<PathBuf>,

    /// Scenarios run concurrently (0 = one per CPU)
    #[arg(short = 'j', long, default_value = "1")]
    pub jobs: usize,

    /// Show the browser window
    #[arg(long)]
    pub headed: bool,

    /// Disable the Chromium sandbox (containers)
    #[arg(long)]
    pub no_sandbox: bool,
}

/// Arguments for the validate command
#[derive(Parser, Debug)]
pub struct ValidateArgs {
    /// Scenario files or directories of `.yaml` scenarios
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,
}

/// Color argument for CLI
#[derive(ValueEnum, Clone, Copy, Debug, Default)]
pub enum ColorArg {
    /// Colors when stderr is a terminal
    #[default]
    Auto,
    /// Always use colors
    Always,
    /// Never use colors
    Never,
}

impl From<ColorArg> for ColorChoice {
    fn from(arg: ColorArg) -> Self {
        match arg {
            ColorArg::Auto => Self::Auto,
            ColorArg::Always => Self::Always,
            ColorArg::Never => Self::Never,
        }
    }
}

/// Log format argument for CLI
#[derive(ValueEnum, Clone, Copy, Debug, Default)]
pub enum LogFormatArg {
    /// Human-readable lines
    #[default]
    Text,
    /// One JSON object per event
    Json,
}

impl From<LogFormatArg> for LogFormat {
    fn from(arg: LogFormatArg) -> Self {
        match arg {
            LogFormatArg::Text => Self::Text,
            LogFormatArg::Json => Self::Json,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    mod parse_tests {
        use super::*;

        #[test]
        fn test_cli_definition_is_consistent() {
            Cli::command().debug_assert();
        }

        #[test]
        fn test_run_args() {
            let cli = Cli::try_parse_from([
                "lookout",
                "-vv",
                "run",
                "scenarios",
                "--base-url",
                "http://localhost:5173",
                "-j",
                "4",
                "--no-sandbox",
            ])
            .unwrap();
            assert_eq!(cli.verbose, 2);
            let Commands::Run(args) = cli.command else {
                panic!("expected run");
            };
            assert_eq!(args.paths, vec![PathBuf::from("scenarios")]);
            assert_eq!(args.base_url.as_deref(), Some("http://localhost:5173"));
            assert_eq!(args.jobs, 4);
            assert!(args.no_sandbox);
            assert!(!args.headed);
        }

        #[test]
        fn test_run_requires_a_path() {
            assert!(Cli::try_parse_from(["lookout", "run"]).is_err());
        }

        #[test]
        fn test_global_flags_after_subcommand() {
            let cli = Cli::try_parse_from([
                "lookout",
                "validate",
                "a.yaml",
                "--color",
                "never",
                "--log-format",
                "json",
            ])
            .unwrap();
            assert!(matches!(cli.color, ColorArg::Never));
            assert!(matches!(cli.log_format, LogFormatArg::Json));
        }
    }

    mod conversion_tests {
        use super::*;

        #[test]
        fn test_color_arg_conversion() {
            assert_eq!(ColorChoice::from(ColorArg::Auto), ColorChoice::Auto);
            assert_eq!(ColorChoice::from(ColorArg::Always), ColorChoice::Always);
            assert_eq!(ColorChoice::from(ColorArg::Never), ColorChoice::Never);
        }

        #[test]
        fn test_log_format_conversion() {
            assert_eq!(LogFormat::from(LogFormatArg::Text), LogFormat::Text);
            assert_eq!(LogFormat::from(LogFormatArg::Json), LogFormat::Json);
        }
    }
}
