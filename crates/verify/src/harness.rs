use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Args;
use tracing::{info, warn};

use crate::cancel::CancelToken;
use crate::compare::Protocol;
use crate::pool::effective_jobs;
use crate::report::{RunSummary, SuiteReport};
use crate::suite::{self, RunOptions, SuiteDef};
use crate::tool::Tool;
use crate::toolchain::{CandidateSpec, Family, ToolOptions, Toolchain, DEFAULT_TIMEOUT};

/// Exit status after a user interrupt, as a shell would report SIGINT.
const INTERRUPTED_EXIT: u8 = 130;

#[derive(Debug, Args)]
pub struct ToolArgs {
    /// LLVM release family the artifacts are written for.
    #[arg(long, value_enum, default_value_t = Family::Llvm38)]
    pub family: Family,

    /// Tool under test. The binary to execute is appended to its arguments.
    #[arg(long, env = "IRDIFF_CANDIDATE")]
    pub candidate: PathBuf,

    /// Extra argument for the candidate (repeatable).
    #[arg(long = "candidate-arg", allow_hyphen_values = true)]
    pub candidate_args: Vec<String>,

    /// Per-program time limit in seconds; 0 disables it.
    #[arg(long, default_value_t = DEFAULT_TIMEOUT.as_secs())]
    pub timeout: u64,

    /// Parallel comparisons; 0 uses one per CPU.
    #[arg(long, short, default_value_t = 1)]
    pub jobs: usize,

    /// Let the interpreter and candidate write to the terminal.
    #[arg(long)]
    pub show_output: bool,

    /// Also write the results as JSON to this file.
    #[arg(long)]
    pub report_json: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Suites to run. All suites of the family and protocol when omitted.
    pub suites: Vec<String>,

    #[arg(long, value_enum, default_value_t = Protocol::Reassembly)]
    pub protocol: Protocol,

    /// Root of the artifact cache.
    #[arg(long, env = "IRDIFF_CACHE_DIR")]
    pub cache_dir: PathBuf,

    /// Command that (re)generates a suite's artifacts before it runs.
    /// Receives the suite directory as its last argument.
    #[arg(long, env = "IRDIFF_GENERATE_CMD")]
    pub generate_cmd: Option<PathBuf>,

    /// Extra argument for the generation command (repeatable).
    #[arg(long = "generate-arg", allow_hyphen_values = true)]
    pub generate_args: Vec<String>,

    #[command(flatten)]
    pub tools: ToolArgs,
}

#[derive(Debug, Args)]
pub struct DirArgs {
    /// Directory to walk for artifacts.
    pub dir: PathBuf,

    #[arg(long, value_enum, default_value_t = Protocol::Reassembly)]
    pub protocol: Protocol,

    #[command(flatten)]
    pub tools: ToolArgs,
}

impl ToolArgs {
    fn resolve(&self, cancel: &CancelToken) -> Result<Toolchain> {
        let candidate = CandidateSpec {
            program: self.candidate.clone(),
            args: self.candidate_args.clone(),
        };
        let options = ToolOptions {
            timeout: (self.timeout > 0).then(|| Duration::from_secs(self.timeout)),
            show_output: self.show_output,
            version_tag: self.family.tag().to_string(),
        };
        Toolchain::resolve(&self.family.config(), &candidate, &options, cancel.clone())
            .context("toolchain lookup failed")
    }

    fn run_options(&self, cancel: &CancelToken) -> RunOptions {
        RunOptions {
            jobs: effective_jobs(self.jobs),
            cancel: cancel.clone(),
        }
    }
}

/// Run named suites from the cache.
pub fn run(args: RunArgs, cancel: &CancelToken) -> Result<ExitCode> {
    let selected = select_suites(&args.suites, args.tools.family, args.protocol)?;
    let toolchain = args.tools.resolve(cancel)?;
    let options = args.tools.run_options(cancel);
    let generate = args
        .generate_cmd
        .as_ref()
        .map(|cmd| Tool::new(cmd).with_args(&args.generate_args).with_timeout(None));

    let mut reports = Vec::with_capacity(selected.len());
    for def in selected {
        if cancel.is_cancelled() {
            break;
        }
        let report = suite::run_suite(
            def,
            &args.cache_dir,
            generate.as_ref(),
            &toolchain,
            &options,
            io::stdout(),
        )?;
        report.write_summary(&mut io::stdout())?;
        reports.push(report);
    }

    finish(&reports, args.tools.report_json.as_ref(), cancel)
}

/// Run every artifact below one directory as an ad hoc suite.
pub fn run_dir(args: DirArgs, cancel: &CancelToken) -> Result<ExitCode> {
    if !args.dir.is_dir() {
        bail!("{} is not a directory", args.dir.display());
    }
    let toolchain = args.tools.resolve(cancel)?;
    let options = args.tools.run_options(cancel);
    let name = args.dir.display().to_string();
    let report = suite::run_directory(
        &name,
        &args.dir,
        args.protocol,
        &toolchain,
        &options,
        io::stdout(),
    )?;
    report.write_summary(&mut io::stdout())?;
    finish(&[report], args.tools.report_json.as_ref(), cancel)
}

pub fn list() {
    for def in suite::registry() {
        println!(
            "{:<18} {:<4} {:<17} {}",
            def.name,
            def.family.tag(),
            def.protocol.name(),
            def.cache_subdir
        );
    }
}

fn select_suites(
    names: &[String],
    family: Family,
    protocol: Protocol,
) -> Result<Vec<&'static SuiteDef>> {
    if names.is_empty() {
        let all: Vec<_> = suite::suites_for(family, protocol).collect();
        if all.is_empty() {
            bail!("no {} suites exist for LLVM {}", protocol.name(), family.tag());
        }
        return Ok(all);
    }
    names
        .iter()
        .map(|name| {
            suite::find(name, family, protocol).with_context(|| {
                format!(
                    "unknown suite {name} for LLVM {} ({})",
                    family.tag(),
                    protocol.name()
                )
            })
        })
        .collect()
}

fn finish(
    reports: &[SuiteReport],
    report_json: Option<&PathBuf>,
    cancel: &CancelToken,
) -> Result<ExitCode> {
    let summary = RunSummary::new(reports);
    if let Some(path) = report_json {
        summary.write_json(path)?;
        info!(path = %path.display(), "wrote json report");
    }

    if cancel.is_cancelled() || reports.iter().any(|report| report.interrupted) {
        warn!("run interrupted");
        return Ok(ExitCode::from(INTERRUPTED_EXIT));
    }
    if summary.success {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}
