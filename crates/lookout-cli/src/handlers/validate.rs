//! Validate command: check scenario files without launching a browser

use std::fmt::Write as _;

use lookout::Scenario;

use crate::commands::ValidateArgs;
use crate::config::CliConfig;
use crate::error::{CliError, CliResult};
use crate::handlers::discover_files;
use crate::output::ProgressReporter;

/// Step plan of a scenario, one numbered line per step
#[must_use]
pub fn render_plan(scenario: &Scenario) -> String {
    let mut out = format!("{}\n", scenario.name);
    for (name, fixture) in &scenario.fixtures {
        let _ = writeln!(out, "  fixture {name}: {}", fixture.describe());
    }
    for (i, step) in scenario.steps.iter().enumerate() {
        let _ = writeln!(out, "  {:>2}. {}", i + 1, step.label());
    }
    out
}

/// Execute the validate command
pub fn execute_validate(config: &CliConfig, args: &ValidateArgs) -> CliResult<()> {
    let reporter = ProgressReporter::new(config.color.should_color(), config.verbosity.is_quiet());
    let files = discover_files(&args.paths)?;

    let mut invalid = 0;
    for file in &files {
        match Scenario::from_file(file) {
            Ok(scenario) => {
                reporter.success(&format!("{} ({})", scenario.name, file.display()));
                if !config.verbosity.is_quiet() {
                    print!("{}", render_plan(&scenario));
                }
            }
            Err(e) => {
                invalid += 1;
                reporter.failure(&format!("{}: {e}", file.display()));
            }
        }
    }

    if invalid == 0 {
        Ok(())
    } else {
        Err(CliError::config(format!(
            "{invalid} of {} scenario file(s) are invalid",
            files.len()
        )))
    }
}
