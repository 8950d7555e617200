//! Output formatting and progress reporting

use console::{style, Style, Term};
use indicatif::{ProgressBar, ProgressStyle};
use lookout::{RunObserver, RunResult, RunnerState, StepReport, StepStatus, SuiteReport};
use std::time::Duration;

/// Message severity, selects the line prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    /// Passed
    Success,
    /// Failed
    Failure,
    /// Advisory
    Warning,
    /// Informational
    Info,
}

/// Progress reporter for scenario execution.
///
/// Human-readable lines go to stderr so stdout stays free for the JSON report.
#[derive(Debug)]
pub struct ProgressReporter {
    term: Term,
    progress_bar: Option<ProgressBar>,
    /// Whether to use colors
    pub use_color: bool,
    /// Quiet mode
    pub quiet: bool,
    /// Print every step result
    pub show_steps: bool,
    /// Print every state transition
    pub show_transitions: bool,
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new(true, false)
    }
}

impl ProgressReporter {
    /// Create a new progress reporter
    #[must_use]
    pub fn new(use_color: bool, quiet: bool) -> Self {
        Self {
            term: Term::stderr(),
            progress_bar: None,
            use_color,
            quiet,
            show_steps: false,
            show_transitions: false,
        }
    }

    /// Print step results and transitions as they happen
    #[must_use]
    pub const fn with_detail(mut self, steps: bool, transitions: bool) -> Self {
        self.show_steps = steps;
        self.show_transitions = transitions;
        self
    }

    /// Start a progress bar over `total` scenarios
    pub fn start_progress(&mut self, total: u64, message: &str) {
        if self.quiet || !self.term.is_term() {
            return;
        }

        let pb = ProgressBar::new(total);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=>-"),
        );
        pb.enable_steady_tick(Duration::from_millis(120));
        pb.set_message(message.to_string());
        self.progress_bar = Some(pb);
    }

    /// Increment progress
    pub fn increment(&self, delta: u64) {
        if let Some(ref pb) = self.progress_bar {
            pb.inc(delta);
        }
    }

    /// Finish progress bar
    pub fn finish(&self) {
        if let Some(ref pb) = self.progress_bar {
            pb.finish_and_clear();
        }
    }

    /// Line prefix for `level`
    #[must_use]
    pub fn prefix(&self, level: Level) -> String {
        if !self.use_color {
            return match level {
                Level::Success => "PASS",
                Level::Failure => "FAIL",
                Level::Warning => "WARN",
                Level::Info => "INFO",
            }
            .to_string();
        }
        match level {
            Level::Success => style("✓").green().bold().to_string(),
            Level::Failure => style("✗").red().bold().to_string(),
            Level::Warning => style("⚠").yellow().bold().to_string(),
            Level::Info => style("ℹ").blue().bold().to_string(),
        }
    }

    fn emit(&self, line: &str) {
        match self.progress_bar {
            Some(ref pb) => pb.suspend(|| {
                let _ = self.term.write_line(line);
            }),
            None => {
                let _ = self.term.write_line(line);
            }
        }
    }

    fn message(&self, level: Level, message: &str) {
        // Failures print even in quiet mode
        if self.quiet && level != Level::Failure {
            return;
        }
        self.emit(&format!("{} {message}", self.prefix(level)));
    }

    /// Print a success message
    pub fn success(&self, message: &str) {
        self.message(Level::Success, message);
    }

    /// Print a failure message
    pub fn failure(&self, message: &str) {
        self.message(Level::Failure, message);
    }

    /// Print a warning message
    pub fn warning(&self, message: &str) {
        self.message(Level::Warning, message);
    }

    /// Print an info message
    pub fn info(&self, message: &str) {
        self.message(Level::Info, message);
    }

    /// Print a section header
    pub fn header(&self, title: &str) {
        if self.quiet {
            return;
        }

        let styled = if self.use_color {
            style(title).bold().underlined().to_string()
        } else {
            format!("=== {title} ===")
        };

        self.emit("");
        self.emit(&styled);
    }

    /// Print the suite summary
    pub fn summary(&self, report: &SuiteReport) {
        let totals = report.totals;
        if self.quiet && totals.failed == 0 {
            return;
        }

        self.emit("");
        let duration_secs = Duration::from_millis(report.duration_ms).as_secs_f64();
        let status = if totals.failed > 0 { "FAILED" } else { "PASSED" };
        let line = format!(
            "{} scenarios in {duration_secs:.2}s ({} passed, {} failed, {} warnings)",
            totals.total, totals.passed, totals.failed, totals.warnings
        );

        if self.use_color {
            let status_style = if totals.failed > 0 {
                Style::new().red().bold()
            } else {
                Style::new().green().bold()
            };
            self.emit(&format!("{} {line}", status_style.apply_to(status)));
        } else {
            self.emit(&format!("{status} {line}"));
        }
    }
}

impl RunObserver for ProgressReporter {
    fn on_transition(&self, scenario: &str, state: RunnerState) {
        if self.show_transitions {
            self.info(&format!("{scenario}: -> {state}"));
        }
    }

    fn on_step(&self, scenario: &str, report: &StepReport) {
        match report.status {
            StepStatus::TimedOutContinued => {
                let detail = report.detail.as_deref().unwrap_or("timed out");
                self.warning(&format!(
                    "{scenario}: step {} {}: {detail}",
                    report.index, report.label
                ));
            }
            StepStatus::Passed if self.show_steps => {
                self.info(&format!(
                    "{scenario}: step {} {} ({}ms)",
                    report.index, report.label, report.duration_ms
                ));
            }
            StepStatus::Passed | StepStatus::Failed => {}
        }
    }

    fn on_finish(&self, result: &RunResult) {
        self.increment(1);
        if result.is_success() {
            self.success(&format!("{} ({}ms)", result.scenario_name, result.duration_ms));
            return;
        }
        let reason = result
            .error
            .as_ref()
            .map_or_else(String::new, |e| format!(": {e}"));
        self.failure(&format!("{}{reason}", result.scenario_name));
        if let Some(state) = result.error.as_ref().and_then(|e| e.last_state.as_deref()) {
            self.emit(&format!("    last state: {state}"));
        }
        for artifact in result.artifacts.iter().filter(|a| a.on_failure) {
            self.emit(&format!("    evidence: {}", artifact.path.display()));
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    mod prefix_tests {
        use super::*;

        #[test]
        fn test_plain_prefixes() {
            let reporter = ProgressReporter::new(false, false);
            assert_eq!(reporter.prefix(Level::Success), "PASS");
            assert_eq!(reporter.prefix(Level::Failure), "FAIL");
            assert_eq!(reporter.prefix(Level::Warning), "WARN");
            assert_eq!(reporter.prefix(Level::Info), "INFO");
        }

        #[test]
        fn test_colored_prefixes_use_symbols() {
            let reporter = ProgressReporter::new(true, false);
            assert!(reporter.prefix(Level::Success).contains('✓'));
            assert!(reporter.prefix(Level::Failure).contains('✗'));
        }
    }

    mod reporter_tests {
        use super::*;

        #[test]
        fn test_default_reporter() {
            let reporter = ProgressReporter::default();
            assert!(reporter.use_color);
            assert!(!reporter.quiet);
            assert!(!reporter.show_steps);
        }

        #[test]
        fn test_with_detail() {
            let reporter = ProgressReporter::new(false, false).with_detail(true, false);
            assert!(reporter.show_steps);
            assert!(!reporter.show_transitions);
        }

        #[test]
        fn test_quiet_progress_never_starts() {
            let mut reporter = ProgressReporter::new(false, true);
            reporter.start_progress(3, "running");
            assert!(reporter.progress_bar.is_none());
            reporter.increment(1);
            reporter.finish();
        }

        #[test]
        fn test_empty_summary_does_not_panic() {
            let reporter = ProgressReporter::new(false, false);
            reporter.summary(&SuiteReport::new("empty", Vec::new()));
        }
    }
}
