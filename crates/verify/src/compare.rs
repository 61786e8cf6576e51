//! The assemble / run-reference / run-candidate / compare protocol.
//!
//! A [`ComparePlan`] lists three sets of inputs. Reference inputs establish
//! the expected exit code (or check a preset baseline), interpreted and
//! candidate inputs must then reproduce it. Textual inputs are assembled up
//! front; a module that does not assemble never gets executed.

use std::fmt;
use std::path::{Path, PathBuf};

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::discover::{assembled_path, Artifact, ArtifactKind, ArtifactPair, Layout};
use crate::tool::{ExecutionResult, ToolError};

/// The three external operations a comparison needs.
pub trait Runner {
    /// Assemble a textual module into its sibling binary.
    fn assemble(&self, textual: &Path) -> Result<ExecutionResult, ToolError>;
    /// Execute a binary under the trusted interpreter.
    fn interpret(&self, binary: &Path) -> Result<ExecutionResult, ToolError>;
    /// Execute a binary through the pipeline under test.
    fn run_candidate(&self, binary: &Path) -> Result<ExecutionResult, ToolError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonOutcome {
    /// Every execution reproduced the expected exit code.
    Passed,
    /// Assembly failed, or an execution diverged from the expectation.
    Failed,
    /// The reference execution itself crashed or timed out.
    FailedReference,
    /// The reference returned a nonzero baseline where zero was required.
    Wrong,
}

impl ComparisonOutcome {
    /// Progress symbol printed for one artifact.
    pub fn symbol(self) -> char {
        match self {
            ComparisonOutcome::Passed => '.',
            ComparisonOutcome::Failed => 'E',
            ComparisonOutcome::FailedReference => 'S',
            ComparisonOutcome::Wrong => 'W',
        }
    }

    /// Whether the outcome is part of the pass/fail denominator.
    pub fn counts_toward_total(self) -> bool {
        match self {
            ComparisonOutcome::Passed | ComparisonOutcome::Failed => true,
            ComparisonOutcome::FailedReference | ComparisonOutcome::Wrong => false,
        }
    }
}

impl fmt::Display for ComparisonOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ComparisonOutcome::Passed => "passed",
            ComparisonOutcome::Failed => "failed",
            ComparisonOutcome::FailedReference => "failed-reference",
            ComparisonOutcome::Wrong => "wrong",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum Protocol {
    /// Original binary vs. the writer's re-assembled textual output.
    Reassembly,
    /// Generated module under the interpreter vs. under the candidate.
    SelfConsistency,
}

impl Protocol {
    pub fn name(self) -> &'static str {
        match self {
            Protocol::Reassembly => "reassembly",
            Protocol::SelfConsistency => "self-consistency",
        }
    }

    pub fn layout(self) -> Layout {
        match self {
            Protocol::Reassembly => Layout::Reassembly,
            Protocol::SelfConsistency => Layout::SelfConsistency,
        }
    }

    pub fn plan(self, pair: &ArtifactPair) -> ComparePlan {
        match self {
            Protocol::Reassembly => ComparePlan::reassembly(pair),
            Protocol::SelfConsistency => ComparePlan::self_consistency(pair),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ComparePlan {
    pub reference: Vec<Artifact>,
    pub interpreted: Vec<Artifact>,
    pub candidate: Vec<Artifact>,
    /// Preset baseline the reference set must reproduce.
    pub expected_exit: Option<i32>,
}

impl ComparePlan {
    pub fn reassembly(pair: &ArtifactPair) -> Self {
        Self {
            reference: pair
                .reference
                .iter()
                .map(|path| Artifact {
                    path: path.clone(),
                    kind: ArtifactKind::ReferenceBinary,
                })
                .collect(),
            interpreted: vec![textual(&pair.root)],
            candidate: Vec::new(),
            expected_exit: None,
        }
    }

    pub fn self_consistency(pair: &ArtifactPair) -> Self {
        Self {
            reference: vec![textual(&pair.root)],
            interpreted: Vec::new(),
            candidate: vec![textual(&pair.root)],
            expected_exit: Some(0),
        }
    }

    fn inputs(&self) -> impl Iterator<Item = &Artifact> {
        self.reference
            .iter()
            .chain(&self.interpreted)
            .chain(&self.candidate)
    }
}

fn textual(path: &Path) -> Artifact {
    Artifact {
        path: path.to_path_buf(),
        kind: ArtifactKind::GeneratedTextual,
    }
}

#[derive(Debug, Clone, Copy)]
enum Expectation {
    Baseline(i32),
    Reference(i32),
}

impl Expectation {
    fn code(self) -> i32 {
        match self {
            Expectation::Baseline(code) | Expectation::Reference(code) => code,
        }
    }
}

/// Run one plan to completion and classify it.
///
/// Only tool errors escape; every divergence is an outcome.
pub fn compare<R: Runner + ?Sized>(
    runner: &R,
    plan: &ComparePlan,
) -> Result<ComparisonOutcome, ToolError> {
    let mut assembled: Vec<&Path> = Vec::new();
    for artifact in plan.inputs() {
        if !artifact.kind.needs_assembly() || assembled.contains(&artifact.path.as_path()) {
            continue;
        }
        let result = runner.assemble(&artifact.path)?;
        if !result.success() {
            debug!(file = %artifact.path.display(), exit_code = result.exit_code, "assembly failed");
            return Ok(ComparisonOutcome::Failed);
        }
        assembled.push(&artifact.path);
    }

    let mut expectation = plan.expected_exit.map(Expectation::Baseline);
    for artifact in &plan.reference {
        let result = runner.interpret(&executable(artifact))?;
        if result.is_fatal() {
            debug!(file = %artifact.path.display(), exit_code = result.exit_code, "reference crashed");
            return Ok(ComparisonOutcome::FailedReference);
        }
        match expectation {
            None => expectation = Some(Expectation::Reference(result.exit_code)),
            Some(Expectation::Baseline(code)) if code != result.exit_code => {
                return Ok(ComparisonOutcome::Wrong)
            }
            Some(Expectation::Reference(code)) if code != result.exit_code => {
                return Ok(ComparisonOutcome::FailedReference)
            }
            Some(_) => {}
        }
    }

    let mut expected = expectation.map(Expectation::code);
    for artifact in &plan.interpreted {
        let result = runner.interpret(&executable(artifact))?;
        if !reproduces(&mut expected, result) {
            return Ok(ComparisonOutcome::Failed);
        }
    }
    for artifact in &plan.candidate {
        let result = runner.run_candidate(&executable(artifact))?;
        if !reproduces(&mut expected, result) {
            return Ok(ComparisonOutcome::Failed);
        }
    }

    Ok(ComparisonOutcome::Passed)
}

fn executable(artifact: &Artifact) -> PathBuf {
    if artifact.kind.needs_assembly() {
        assembled_path(&artifact.path)
    } else {
        artifact.path.clone()
    }
}

fn reproduces(expected: &mut Option<i32>, result: ExecutionResult) -> bool {
    if result.timed_out {
        return false;
    }
    match *expected {
        Some(code) => code == result.exit_code,
        None if result.is_fatal() => false,
        None => {
            *expected = Some(result.exit_code);
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::collections::HashMap;

    use super::*;

    /// In-memory runner: exit codes keyed by file name, every call logged.
    #[derive(Default)]
    struct Scripted {
        assemble: HashMap<&'static str, ExecutionResult>,
        interpret: HashMap<&'static str, ExecutionResult>,
        candidate: HashMap<&'static str, ExecutionResult>,
        calls: RefCell<Vec<String>>,
    }

    impl Scripted {
        fn assemble(mut self, name: &'static str, code: i32) -> Self {
            self.assemble.insert(name, ExecutionResult::exited(code));
            self
        }

        fn interpret(mut self, name: &'static str, result: ExecutionResult) -> Self {
            self.interpret.insert(name, result);
            self
        }

        fn candidate(mut self, name: &'static str, code: i32) -> Self {
            self.candidate.insert(name, ExecutionResult::exited(code));
            self
        }

        fn lookup(
            &self,
            kind: &str,
            table: &HashMap<&'static str, ExecutionResult>,
            path: &Path,
        ) -> Result<ExecutionResult, ToolError> {
            let name = path.file_name().unwrap().to_str().unwrap();
            self.calls.borrow_mut().push(format!("{kind} {name}"));
            table.get(name).copied().ok_or_else(|| ToolError::Launch {
                program: kind.to_string(),
                file: name.to_string(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "unscripted"),
            })
        }

        fn calls(&self) -> Vec<String> {
            self.calls.borrow().clone()
        }
    }

    impl Runner for Scripted {
        fn assemble(&self, textual: &Path) -> Result<ExecutionResult, ToolError> {
            self.lookup("as", &self.assemble, textual)
        }

        fn interpret(&self, binary: &Path) -> Result<ExecutionResult, ToolError> {
            self.lookup("lli", &self.interpret, binary)
        }

        fn run_candidate(&self, binary: &Path) -> Result<ExecutionResult, ToolError> {
            self.lookup("candidate", &self.candidate, binary)
        }
    }

    fn exited(code: i32) -> ExecutionResult {
        ExecutionResult::exited(code)
    }

    fn reassembly(name: &str) -> ComparePlan {
        let pair = Layout::Reassembly
            .pair_root(Path::new(&format!("cache/{name}.out.ll")))
            .unwrap();
        Protocol::Reassembly.plan(&pair)
    }

    fn generated(name: &str) -> ComparePlan {
        let pair = Layout::SelfConsistency
            .pair_root(Path::new(&format!("gen/{name}.ll")))
            .unwrap();
        Protocol::SelfConsistency.plan(&pair)
    }

    #[test]
    fn reassembly_matching_exit_codes_pass() {
        let runner = Scripted::default()
            .assemble("foo.out.ll", 0)
            .interpret("foo.bc", exited(0))
            .interpret("foo.out.bc", exited(0));
        assert_eq!(
            compare(&runner, &reassembly("foo")).unwrap(),
            ComparisonOutcome::Passed
        );
        assert_eq!(
            runner.calls(),
            ["as foo.out.ll", "lli foo.bc", "lli foo.out.bc"]
        );
    }

    #[test]
    fn assembly_failure_fails_without_execution() {
        let runner = Scripted::default().assemble("bar.out.ll", 1);
        assert_eq!(
            compare(&runner, &reassembly("bar")).unwrap(),
            ComparisonOutcome::Failed
        );
        assert_eq!(runner.calls(), ["as bar.out.ll"]);
    }

    #[test]
    fn crashing_reference_is_failed_reference() {
        for signal in [-6, -11] {
            let runner = Scripted::default()
                .assemble("baz.out.ll", 0)
                .interpret("baz.bc", exited(signal))
                .interpret("baz.out.bc", exited(0));
            assert_eq!(
                compare(&runner, &reassembly("baz")).unwrap(),
                ComparisonOutcome::FailedReference
            );
            assert!(!runner.calls().contains(&"lli baz.out.bc".to_string()));
        }
    }

    #[test]
    fn reference_timeout_is_failed_reference() {
        let runner = Scripted::default()
            .assemble("slow.out.ll", 0)
            .interpret("slow.bc", ExecutionResult::timeout());
        assert_eq!(
            compare(&runner, &reassembly("slow")).unwrap(),
            ComparisonOutcome::FailedReference
        );
    }

    #[test]
    fn diverging_exit_codes_fail() {
        let runner = Scripted::default()
            .assemble("foo.out.ll", 0)
            .interpret("foo.bc", exited(3))
            .interpret("foo.out.bc", exited(4));
        assert_eq!(
            compare(&runner, &reassembly("foo")).unwrap(),
            ComparisonOutcome::Failed
        );
    }

    #[test]
    fn nonzero_reference_that_matches_passes_reassembly() {
        let runner = Scripted::default()
            .assemble("foo.out.ll", 0)
            .interpret("foo.bc", exited(42))
            .interpret("foo.out.bc", exited(42));
        assert_eq!(
            compare(&runner, &reassembly("foo")).unwrap(),
            ComparisonOutcome::Passed
        );
    }

    #[test]
    fn generated_nonzero_baseline_is_wrong() {
        let runner = Scripted::default()
            .assemble("qux.ll", 0)
            .interpret("qux.bc", exited(2));
        assert_eq!(
            compare(&runner, &generated("qux")).unwrap(),
            ComparisonOutcome::Wrong
        );
        assert!(runner.calls().iter().all(|c| !c.starts_with("candidate")));
    }

    #[test]
    fn generated_candidate_must_match_zero() {
        let passing = Scripted::default()
            .assemble("quux.ll", 0)
            .interpret("quux.bc", exited(0))
            .candidate("quux.bc", 0);
        assert_eq!(
            compare(&passing, &generated("quux")).unwrap(),
            ComparisonOutcome::Passed
        );
        assert_eq!(
            passing.calls(),
            ["as quux.ll", "lli quux.bc", "candidate quux.bc"]
        );

        let failing = Scripted::default()
            .assemble("quux.ll", 0)
            .interpret("quux.bc", exited(0))
            .candidate("quux.bc", 1);
        assert_eq!(
            compare(&failing, &generated("quux")).unwrap(),
            ComparisonOutcome::Failed
        );
    }

    #[test]
    fn candidate_timeout_fails() {
        let mut runner = Scripted::default()
            .assemble("q.ll", 0)
            .interpret("q.bc", exited(0));
        runner.candidate.insert("q.bc", ExecutionResult::timeout());
        assert_eq!(
            compare(&runner, &generated("q")).unwrap(),
            ComparisonOutcome::Failed
        );
    }

    #[test]
    fn references_that_disagree_are_failed_reference() {
        let plan = ComparePlan {
            reference: vec![
                Artifact::new("r/a.bc").unwrap(),
                Artifact::new("r/b.bc").unwrap(),
            ],
            ..ComparePlan::default()
        };
        let runner = Scripted::default()
            .interpret("a.bc", exited(0))
            .interpret("b.bc", exited(1));
        assert_eq!(
            compare(&runner, &plan).unwrap(),
            ComparisonOutcome::FailedReference
        );
    }

    #[test]
    fn shared_textual_input_is_assembled_once() {
        let runner = Scripted::default()
            .assemble("once.ll", 0)
            .interpret("once.bc", exited(0))
            .candidate("once.bc", 0);
        compare(&runner, &generated("once")).unwrap();
        let assembles = runner
            .calls()
            .iter()
            .filter(|c| c.starts_with("as "))
            .count();
        assert_eq!(assembles, 1);
    }

    #[test]
    fn comparison_is_repeatable() {
        let runner = Scripted::default()
            .assemble("foo.out.ll", 0)
            .interpret("foo.bc", exited(1))
            .interpret("foo.out.bc", exited(2));
        let plan = reassembly("foo");
        let first = compare(&runner, &plan).unwrap();
        let second = compare(&runner, &plan).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn tool_errors_escape() {
        let runner = Scripted::default().assemble("foo.out.ll", 0);
        let err = compare(&runner, &reassembly("foo")).unwrap_err();
        assert!(matches!(err, ToolError::Launch { .. }));
    }

    #[test]
    fn symbols_and_totals() {
        use super::ComparisonOutcome::*;
        let symbols: String = [Passed, Failed, FailedReference, Wrong]
            .iter()
            .map(|o| o.symbol())
            .collect();
        assert_eq!(symbols, ".ESW");
        assert!(Passed.counts_toward_total());
        assert!(Failed.counts_toward_total());
        assert!(!FailedReference.counts_toward_total());
        assert!(!Wrong.counts_toward_total());
    }
}
