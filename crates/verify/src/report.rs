use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::compare::ComparisonOutcome;

/// Overall result of one suite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum Verdict {
    Passed { total: usize },
    Failed { failed: usize, total: usize },
    /// Nothing was compared. Never a success.
    Empty,
    Interrupted,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Passed { total } => write!(f, "Passed all {total} tests!"),
            Verdict::Failed { failed, total } => write!(f, "Failed {failed} of {total} tests!"),
            Verdict::Empty => write!(
                f,
                "There is something odd with the testsuite, 0 tests executed!"
            ),
            Verdict::Interrupted => write!(f, "Interrupted, results are incomplete!"),
        }
    }
}

/// Per-outcome artifact lists for one suite, in arrival order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuiteReport {
    pub suite: String,
    pub passed: Vec<PathBuf>,
    pub failed: Vec<PathBuf>,
    pub failed_reference: Vec<PathBuf>,
    pub wrong: Vec<PathBuf>,
    /// Error from the artifact regeneration step, if it ran and failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prepare_failure: Option<String>,
    pub interrupted: bool,
}

impl SuiteReport {
    /// Size of the pass/fail denominator. Reference crashes and wrong
    /// baselines are not part of it.
    pub fn total(&self) -> usize {
        self.passed.len() + self.failed.len()
    }

    pub fn processed(&self) -> usize {
        self.total() + self.failed_reference.len() + self.wrong.len()
    }

    pub fn verdict(&self) -> Verdict {
        if self.interrupted {
            Verdict::Interrupted
        } else if !self.failed.is_empty() {
            Verdict::Failed {
                failed: self.failed.len(),
                total: self.total(),
            }
        } else if self.total() == 0 {
            Verdict::Empty
        } else {
            Verdict::Passed {
                total: self.total(),
            }
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.verdict(), Verdict::Passed { .. })
    }

    pub fn bucket(&self, outcome: ComparisonOutcome) -> &[PathBuf] {
        match outcome {
            ComparisonOutcome::Passed => &self.passed,
            ComparisonOutcome::Failed => &self.failed,
            ComparisonOutcome::FailedReference => &self.failed_reference,
            ComparisonOutcome::Wrong => &self.wrong,
        }
    }

    fn bucket_mut(&mut self, outcome: ComparisonOutcome) -> &mut Vec<PathBuf> {
        match outcome {
            ComparisonOutcome::Passed => &mut self.passed,
            ComparisonOutcome::Failed => &mut self.failed,
            ComparisonOutcome::FailedReference => &mut self.failed_reference,
            ComparisonOutcome::Wrong => &mut self.wrong,
        }
    }

    /// Itemized warnings and failures followed by the verdict line.
    pub fn write_summary<W: Write>(&self, out: &mut W) -> io::Result<()> {
        writeln!(out, "suite {}:", self.suite)?;
        if let Some(err) = &self.prepare_failure {
            writeln!(out, "warning: artifact generation failed: {err}")?;
        }
        write_list(
            out,
            &format!("{} reference tests failed!", self.failed_reference.len()),
            &self.failed_reference,
        )?;
        write_list(
            out,
            &format!(
                "{} tests have a nonzero reference exit code!",
                self.wrong.len()
            ),
            &self.wrong,
        )?;
        let verdict = self.verdict();
        writeln!(out, "{verdict}")?;
        if !self.failed.is_empty() {
            for (idx, path) in self.failed.iter().enumerate() {
                writeln!(out, "  {idx}) {}", path.display())?;
            }
        }
        if self.interrupted {
            writeln!(
                out,
                "{} artifacts processed before the interrupt ({} passed, {} failed)",
                self.processed(),
                self.passed.len(),
                self.failed.len()
            )?;
        }
        Ok(())
    }
}

fn write_list<W: Write>(out: &mut W, heading: &str, items: &[PathBuf]) -> io::Result<()> {
    if items.is_empty() {
        return Ok(());
    }
    writeln!(out, "{heading}")?;
    for (idx, path) in items.iter().enumerate() {
        writeln!(out, "  {idx}) {}", path.display())?;
    }
    writeln!(out)
}

/// Folds outcomes into a [`SuiteReport`], echoing one progress symbol per
/// artifact to `progress`.
pub struct ResultAggregator<W: Write> {
    report: SuiteReport,
    progress: W,
}

impl<W: Write> ResultAggregator<W> {
    pub fn new(suite: impl Into<String>, progress: W) -> Self {
        Self {
            report: SuiteReport {
                suite: suite.into(),
                ..SuiteReport::default()
            },
            progress,
        }
    }

    pub fn record(&mut self, artifact: &Path, outcome: ComparisonOutcome) -> io::Result<()> {
        self.report
            .bucket_mut(outcome)
            .push(artifact.to_path_buf());
        write!(self.progress, "{}", outcome.symbol())?;
        self.progress.flush()
    }

    pub fn prepare_failed(&mut self, err: impl Into<String>) {
        self.report.prepare_failure = Some(err.into());
    }

    pub fn interrupted(&mut self) {
        self.report.interrupted = true;
    }

    /// Terminate the progress line and hand out the read-only report.
    pub fn finish(mut self) -> io::Result<SuiteReport> {
        if self.report.processed() > 0 {
            writeln!(self.progress)?;
        }
        self.progress.flush()?;
        Ok(self.report)
    }
}

/// Machine readable result of a whole run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub success: bool,
    pub suites: Vec<SuiteSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuiteSummary {
    #[serde(flatten)]
    pub verdict: Verdict,
    pub report: SuiteReport,
}

impl RunSummary {
    pub fn new(reports: &[SuiteReport]) -> Self {
        Self {
            success: !reports.is_empty() && reports.iter().all(SuiteReport::is_success),
            suites: reports
                .iter()
                .map(|report| SuiteSummary {
                    verdict: report.verdict(),
                    report: report.clone(),
                })
                .collect(),
        }
    }

    pub fn write_json(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("failed to serialize report")?;
        fs::write(path, json)
            .with_context(|| format!("failed to write report {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compare::ComparisonOutcome::*;

    fn aggregate(outcomes: &[(&str, ComparisonOutcome)]) -> (SuiteReport, String) {
        let mut progress = Vec::new();
        let mut agg = ResultAggregator::new("unit", &mut progress);
        for (path, outcome) in outcomes {
            agg.record(Path::new(path), *outcome).unwrap();
        }
        let report = agg.finish().unwrap();
        (report, String::from_utf8(progress).unwrap())
    }

    fn summary(report: &SuiteReport) -> String {
        let mut out = Vec::new();
        report.write_summary(&mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn buckets_are_disjoint_and_cover_everything() {
        let (report, progress) = aggregate(&[
            ("a", Passed),
            ("b", Failed),
            ("c", FailedReference),
            ("d", Wrong),
            ("e", Passed),
        ]);
        assert_eq!(progress, ".ESW.\n");
        assert_eq!(report.processed(), 5);
        assert_eq!(report.bucket(Passed), [PathBuf::from("a"), PathBuf::from("e")]);
        assert_eq!(report.bucket(Failed), [PathBuf::from("b")]);
        assert_eq!(report.bucket(FailedReference), [PathBuf::from("c")]);
        assert_eq!(report.bucket(Wrong), [PathBuf::from("d")]);
    }

    #[test]
    fn warnings_do_not_count_toward_total() {
        let (report, _) = aggregate(&[
            ("a", Passed),
            ("b", FailedReference),
            ("c", Wrong),
            ("d", Wrong),
        ]);
        assert_eq!(report.total(), 1);
        assert_eq!(report.verdict(), Verdict::Passed { total: 1 });
        assert!(report.is_success());
    }

    #[test]
    fn any_failure_fails_the_suite() {
        let (report, _) = aggregate(&[("a", Passed), ("b", Failed)]);
        assert_eq!(report.verdict(), Verdict::Failed { failed: 1, total: 2 });
        assert!(!report.is_success());
        let text = summary(&report);
        assert!(text.contains("Failed 1 of 2 tests!"));
        assert!(text.contains("  0) b"));
    }

    #[test]
    fn empty_suite_is_not_a_success() {
        let (report, progress) = aggregate(&[]);
        assert_eq!(progress, "");
        assert_eq!(report.verdict(), Verdict::Empty);
        assert!(!report.is_success());
        assert!(summary(&report).contains("something odd with the testsuite"));
    }

    #[test]
    fn only_warnings_is_still_empty() {
        let (report, _) = aggregate(&[("a", FailedReference), ("b", Wrong)]);
        assert_eq!(report.verdict(), Verdict::Empty);
        let text = summary(&report);
        assert!(text.contains("1 reference tests failed!"));
        assert!(text.contains("1 tests have a nonzero reference exit code!"));
    }

    #[test]
    fn interrupt_overrides_other_verdicts() {
        let mut progress = Vec::new();
        let mut agg = ResultAggregator::new("unit", &mut progress);
        agg.record(Path::new("a"), Passed).unwrap();
        agg.interrupted();
        let report = agg.finish().unwrap();
        assert_eq!(report.verdict(), Verdict::Interrupted);
        assert!(!report.is_success());
        assert!(summary(&report).contains("1 artifacts processed before the interrupt"));
    }

    #[test]
    fn prepare_failure_is_reported_but_not_fatal() {
        let mut progress = Vec::new();
        let mut agg = ResultAggregator::new("unit", &mut progress);
        agg.prepare_failed("generator exited with 2");
        agg.record(Path::new("a"), Passed).unwrap();
        let report = agg.finish().unwrap();
        assert!(report.is_success());
        assert!(summary(&report).contains("artifact generation failed: generator exited with 2"));
    }

    #[test]
    fn run_summary_requires_every_suite_to_pass() {
        let (good, _) = aggregate(&[("a", Passed)]);
        let (empty, _) = aggregate(&[]);
        assert!(RunSummary::new(&[good.clone()]).success);
        assert!(!RunSummary::new(&[good, empty]).success);
        assert!(!RunSummary::new(&[]).success);
    }

    #[test]
    fn json_report_carries_verdict() {
        let (report, _) = aggregate(&[("a", Passed), ("b", Failed)]);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.json");
        RunSummary::new(&[report]).write_json(&path).unwrap();
        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["success"], false);
        assert_eq!(value["suites"][0]["verdict"], "failed");
        assert_eq!(value["suites"][0]["failed"], 1);
        assert_eq!(value["suites"][0]["report"]["failed"][0], "b");
    }
}
