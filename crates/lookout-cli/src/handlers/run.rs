//! Run command: execute scenario files and report the suite

use std::path::Path;
use std::sync::Arc;

use lookout::{HarnessConfig, Launcher, ScenarioRunner, SuiteReport};

use crate::commands::RunArgs;
use crate::config::CliConfig;
use crate::error::{CliError, CliResult};
use crate::handlers::{discover_files, load_scenarios};
use crate::output::ProgressReporter;

/// Apply command-line overrides on top of the layered harness config
pub fn apply_run_args(mut harness: HarnessConfig, args: &RunArgs) -> CliResult<HarnessConfig> {
    if let Some(ref url) = args.base_url {
        harness = harness.with_base_url(url.clone());
    }
    if let Some(ref dir) = args.artifacts {
        harness = harness.with_artifact_dir(dir.clone());
    }
    if args.headed {
        harness.browser = harness.browser.with_headless(false);
    }
    if args.no_sandbox {
        harness.browser = harness.browser.with_no_sandbox();
    }
    harness.validate()?;
    Ok(harness)
}

#[cfg(feature = "browser")]
fn launcher() -> CliResult<Arc<dyn Launcher>> {
    Ok(Arc::new(lookout::ChromiumLauncher::new()))
}

#[cfg(not(feature = "browser"))]
fn launcher() -> CliResult<Arc<dyn Launcher>> {
    Err(CliError::config(
        "built without the `browser` feature; rebuild with --features browser",
    ))
}

/// Execute the run command
pub fn execute_run(config: &CliConfig, config_path: &Path, args: &RunArgs) -> CliResult<()> {
    let harness = apply_run_args(HarnessConfig::load(Some(config_path))?, args)?;
    let files = discover_files(&args.paths)?;
    let scenarios = load_scenarios(&files)?;
    let launcher = launcher()?;

    let jobs = config.clone().with_parallel_jobs(args.jobs).effective_jobs();
    tracing::info!(
        scenarios = scenarios.len(),
        jobs,
        base_url = %harness.base_url,
        artifact_dir = %harness.artifact_dir.display(),
        "starting suite"
    );

    let mut reporter = ProgressReporter::new(config.color.should_color(), config.verbosity.is_quiet())
        .with_detail(!config.verbosity.is_quiet(), config.verbosity.is_verbose());
    reporter.header(&format!("Running {} scenario(s)", scenarios.len()));
    reporter.start_progress(scenarios.len() as u64, "scenarios");
    let reporter = Arc::new(reporter);

    let runner = ScenarioRunner::new(harness, launcher).with_observer(reporter.clone());

    let rt = tokio::runtime::Runtime::new()
        .map_err(|e| CliError::config(format!("Failed to create runtime: {e}")))?;
    let results = rt.block_on(async {
        let cancel = runner.cancel_token();
        let interrupt = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupted; cancelling running scenarios");
                cancel.cancel();
            }
        });
        let results = runner.run_all(scenarios, jobs).await;
        interrupt.abort();
        results
    });
    reporter.finish();

    let report = SuiteReport::new("lookout", results);
    match args.report {
        Some(ref path) => {
            report.write_json(path)?;
            reporter.info(&format!("report written to {}", path.display()));
        }
        None => println!("{}", report.to_json()?),
    }
    reporter.summary(&report);

    if report.all_passed() {
        Ok(())
    } else {
        Err(CliError::scenario_failed(report.totals.failed, report.totals.total))
    }
}
