//! Command handlers - extracted from main.rs for testability

pub mod run;
pub mod validate;

pub use run::{apply_run_args, execute_run};
pub use validate::{execute_validate, render_plan};

use crate::error::{CliError, CliResult};
use lookout::Scenario;
use std::path::{Path, PathBuf};

/// Scenario files named by `paths`, directories expanded in name order
pub fn discover_files(paths: &[PathBuf]) -> CliResult<Vec<PathBuf>> {
    let mut files = Vec::new();
    for path in paths {
        if !path.exists() {
            return Err(CliError::config(format!("{} does not exist", path.display())));
        }
        files.extend(Scenario::discover(path)?);
    }
    if files.is_empty() {
        return Err(CliError::config("no scenario files found"));
    }
    Ok(files)
}

/// Load every scenario file, failing on the first invalid one
pub fn load_scenarios(files: &[PathBuf]) -> CliResult<Vec<Scenario>> {
    files
        .iter()
        .map(|f| load_one(f))
        .collect::<CliResult<Vec<_>>>()
}

fn load_one(path: &Path) -> CliResult<Scenario> {
    tracing::debug!(path = %path.display(), "loading scenario");
    Ok(Scenario::from_file(path)?)
}
