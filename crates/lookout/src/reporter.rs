//! Suite report: run results aggregated for humans and machines.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::path::Path;

use crate::result::{FailureKind, LookoutResult};
use crate::runner::{Outcome, RunResult, StepStatus};

/// Counts by outcome
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuiteTotals {
    /// Scenarios run
    pub total: usize,
    /// Scenarios that succeeded
    pub passed: usize,
    /// Scenarios that failed
    pub failed: usize,
    /// Steps that timed out under `log_and_continue`
    pub warnings: usize,
}

/// Report over every scenario of a suite run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuiteReport {
    /// Suite name
    pub name: String,
    /// Earliest scenario start
    pub started_at: DateTime<Utc>,
    /// Sum of scenario durations
    pub duration_ms: u64,
    /// Counts
    pub totals: SuiteTotals,
    /// Results in input order
    pub scenarios: Vec<RunResult>,
}

impl SuiteReport {
    /// Aggregate `results`
    #[must_use]
    pub fn new(name: impl Into<String>, results: Vec<RunResult>) -> Self {
        let passed = results.iter().filter(|r| r.is_success()).count();
        let warnings = results
            .iter()
            .flat_map(|r| &r.step_reports)
            .filter(|s| s.status == StepStatus::TimedOutContinued)
            .count();
        Self {
            name: name.into(),
            started_at: results.iter().map(|r| r.started_at).min().unwrap_or_else(Utc::now),
            duration_ms: results.iter().map(|r| r.duration_ms).sum(),
            totals: SuiteTotals {
                total: results.len(),
                passed,
                failed: results.len() - passed,
                warnings,
            },
            scenarios: results,
        }
    }

    /// Whether every scenario succeeded
    #[must_use]
    pub const fn all_passed(&self) -> bool {
        self.totals.failed == 0
    }

    /// Failed results
    #[must_use]
    pub fn failures(&self) -> Vec<&RunResult> {
        self.scenarios.iter().filter(|r| !r.is_success()).collect()
    }

    /// Number of failures of `kind`
    #[must_use]
    pub fn count_kind(&self, kind: FailureKind) -> usize {
        self.scenarios
            .iter()
            .filter(|r| r.outcome == Outcome::Failure(kind))
            .count()
    }

    /// One-line summary
    #[must_use]
    pub fn summary(&self) -> String {
        let rate = if self.totals.total == 0 {
            100.0
        } else {
            self.totals.passed as f64 * 100.0 / self.totals.total as f64
        };
        format!(
            "{}: {}/{} passed ({rate:.1}%)",
            self.name, self.totals.passed, self.totals.total
        )
    }

    /// Multi-line text report
    #[must_use]
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        for result in &self.scenarios {
            let status = match result.outcome {
                Outcome::Success => "PASS".to_string(),
                Outcome::Failure(kind) => format!("FAIL [{kind}]"),
            };
            let _ = writeln!(out, "{status} {} ({}ms)", result.scenario_name, result.duration_ms);
            if let Some(ref error) = result.error {
                let _ = writeln!(out, "    {error}");
                if let Some(ref state) = error.last_state {
                    let _ = writeln!(out, "    last state: {state}");
                }
            }
            for step in &result.step_reports {
                if step.status == StepStatus::TimedOutContinued {
                    let detail = step.detail.as_deref().unwrap_or_default();
                    let _ = writeln!(out, "    warn: step {} {}: {detail}", step.index, step.label);
                }
            }
            for artifact in &result.artifacts {
                let marker = if artifact.on_failure { " (failure)" } else { "" };
                let _ = writeln!(out, "    artifact: {}{marker}", artifact.path.display());
            }
        }
        out.push_str(&self.summary());
        out.push('\n');
        out
    }

    /// Pretty JSON
    ///
    /// # Errors
    ///
    /// Returns error if serialization fails
    pub fn to_json(&self) -> LookoutResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Write the JSON report to `path`, creating parent directories
    ///
    /// # Errors
    ///
    /// Returns error if serialization or writing fails
    pub fn write_json(&self, path: &Path) -> LookoutResult<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::artifact::{Artifact, CaptureMode};
    use crate::result::ErrorDetail;
    use crate::runner::{RunnerState, StepReport};
    use std::path::PathBuf;

    fn result(name: &str, outcome: Outcome) -> RunResult {
        let error = match outcome {
            Outcome::Success => None,
            Outcome::Failure(kind) => Some(
                ErrorDetail::new(kind, "'button' not found within 2000ms")
                    .with_last_state("tried: role=button (0 matches)"),
            ),
        };
        RunResult {
            scenario_name: name.to_string(),
            outcome,
            artifacts: vec![Artifact {
                path: PathBuf::from(format!("verification/{name}.png")),
                mode: CaptureMode::Viewport,
                bytes: 68,
                sha256: "ab".repeat(32),
                on_failure: !outcome.is_success(),
            }],
            error,
            transitions: vec![RunnerState::Init, RunnerState::Done(outcome)],
            step_reports: vec![StepReport {
                index: 0,
                label: "wait quiescence".to_string(),
                status: StepStatus::TimedOutContinued,
                duration_ms: 5000,
                detail: Some("network still busy".to_string()),
            }],
            started_at: Utc::now(),
            duration_ms: 120,
        }
    }

    mod aggregate_tests {
        use super::*;

        #[test]
        fn test_totals() {
            let report = SuiteReport::new(
                "suite",
                vec![
                    result("a", Outcome::Success),
                    result("b", Outcome::Failure(FailureKind::TimeoutError)),
                    result("c", Outcome::Success),
                ],
            );
            assert_eq!(
                report.totals,
                SuiteTotals {
                    total: 3,
                    passed: 2,
                    failed: 1,
                    warnings: 3
                }
            );
            assert!(!report.all_passed());
            assert_eq!(report.failures().len(), 1);
            assert_eq!(report.count_kind(FailureKind::TimeoutError), 1);
            assert_eq!(report.duration_ms, 360);
            assert_eq!(report.summary(), "suite: 2/3 passed (66.7%)");
        }

        #[test]
        fn test_empty_suite_passes() {
            let report = SuiteReport::new("empty", Vec::new());
            assert!(report.all_passed());
            assert_eq!(report.summary(), "empty: 0/0 passed (100.0%)");
        }
    }

    mod render_tests {
        use super::*;

        #[test]
        fn test_text_lists_failures_and_artifacts() {
            let report = SuiteReport::new(
                "suite",
                vec![result("broken", Outcome::Failure(FailureKind::TimeoutError))],
            );
            let text = report.render_text();
            assert!(text.contains("FAIL [TimeoutError] broken"));
            assert!(text.contains("last state: tried: role=button (0 matches)"));
            assert!(text.contains("artifact: verification/broken.png (failure)"));
            assert!(text.contains("warn: step 0 wait quiescence"));
        }

        #[test]
        fn test_json_written_and_parsed_back() {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("out/report.json");
            let report = SuiteReport::new("suite", vec![result("a", Outcome::Success)]);
            report.write_json(&path).unwrap();
            let text = std::fs::read_to_string(&path).unwrap();
            let parsed: SuiteReport = serde_json::from_str(&text).unwrap();
            assert_eq!(parsed, report);
            assert!(text.contains("\"scenario_name\": \"a\""));
        }
    }
}
