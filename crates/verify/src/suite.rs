//! Named suites and the batch driver.
//!
//! A suite is a cache directory of artifacts plus the protocol used to judge
//! them. Running a suite optionally regenerates the cache through an external
//! command, then walks it and folds every comparison into a report.

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::cancel::CancelToken;
use crate::compare::{compare, ComparisonOutcome, Protocol, Runner};
use crate::discover::discover;
use crate::pool::run_pool;
use crate::report::{ResultAggregator, SuiteReport};
use crate::scope::EnvScope;
use crate::tool::Tool;
use crate::toolchain::{Family, VERSION_VAR};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SuiteDef {
    pub name: &'static str,
    pub family: Family,
    pub protocol: Protocol,
    /// Build target whose sources are compiled before generation.
    pub compile_target: Option<&'static str>,
    /// Which generator the regeneration step should drive.
    pub generator: &'static str,
    /// Location of the artifacts, relative to the cache root.
    pub cache_subdir: &'static str,
    /// Source extensions the generator should restrict itself to.
    pub extension_filter: &'static [&'static str],
}

const fn reassembly(
    name: &'static str,
    family: Family,
    generator: &'static str,
    cache_subdir: &'static str,
    extension_filter: &'static [&'static str],
) -> SuiteDef {
    SuiteDef {
        name,
        family,
        protocol: Protocol::Reassembly,
        compile_target: Some(name),
        generator,
        cache_subdir,
        extension_filter,
    }
}

const fn generated(name: &'static str, generator: &'static str, cache_subdir: &'static str) -> SuiteDef {
    SuiteDef {
        name,
        family: Family::Llvm38,
        protocol: Protocol::SelfConsistency,
        compile_target: None,
        generator,
        cache_subdir,
        extension_filter: &[],
    }
}

const SUITES: &[SuiteDef] = &[
    reassembly("gcc_c", Family::Llvm32, "gcc", "gcc", &[".c"]),
    reassembly("llvm", Family::Llvm38, "llvm", "llvm", &[]),
    reassembly("gcc_c", Family::Llvm38, "gcc", "gcc", &[".c"]),
    reassembly("gcc_cpp", Family::Llvm38, "gcc", "gcc", &[".cpp", ".C", ".cc"]),
    reassembly("nwcc", Family::Llvm38, "nwcc", "nwcc", &[]),
    reassembly(
        "assembly",
        Family::Llvm38,
        "inline-assembly",
        "inlineassemblytests",
        &[],
    ),
    generated("binary_vector", "binary-vector", "irbuilder/vector"),
    generated("binary_i1", "binary-i1", "irbuilder/binaryI1"),
    generated("binary_i1_vector", "binary-i1-vector", "irbuilder/binaryI1Vector"),
    generated("cast_vector", "vector-bitcast", "irbuilder/castVector"),
    generated("fibonacci", "fibonacci-call", "irbuilder/fibonacci"),
    generated("cast_integer", "integer-casts", "irbuilder/VarICasts"),
    generated("float_compare", "float-compare", "irbuilder/FloatCompareOperator"),
];

pub fn registry() -> &'static [SuiteDef] {
    SUITES
}

pub fn suites_for(family: Family, protocol: Protocol) -> impl Iterator<Item = &'static SuiteDef> {
    SUITES
        .iter()
        .filter(move |def| def.family == family && def.protocol == protocol)
}

pub fn find(name: &str, family: Family, protocol: Protocol) -> Option<&'static SuiteDef> {
    suites_for(family, protocol).find(|def| def.name == name)
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Worker count; `1` evaluates artifacts one after another.
    pub jobs: usize,
    pub cancel: CancelToken,
}

impl SuiteDef {
    pub fn cache_dir(&self, cache_root: &Path) -> PathBuf {
        cache_root.join(self.cache_subdir)
    }

    /// The regeneration step for this suite: `generate` with the suite's
    /// parameters in its environment and the cache directory as argument.
    pub fn generate_step(&self, generate: &Tool) -> Tool {
        let mut step = generate
            .clone()
            .with_env("IRDIFF_SUITE", self.name)
            .with_env("IRDIFF_GENERATOR", self.generator)
            .with_env("IRDIFF_EXTENSION_FILTER", self.extension_filter.join(":"))
            .with_env(VERSION_VAR, self.family.tag());
        if let Some(target) = self.compile_target {
            step = step.with_env("IRDIFF_COMPILE_TARGET", target);
        }
        step
    }
}

/// Run one named suite: regenerate (when `generate` is given), then compare
/// every artifact in its cache directory.
pub fn run_suite<R, W>(
    def: &SuiteDef,
    cache_root: &Path,
    generate: Option<&Tool>,
    runner: &R,
    options: &RunOptions,
    progress: W,
) -> Result<SuiteReport>
where
    R: Runner + Sync,
    W: Write,
{
    let scope = EnvScope::set(VERSION_VAR, def.family.tag());
    let dir = def.cache_dir(cache_root);
    info!(suite = def.name, family = def.family.tag(), var = scope.name(), "starting suite");

    let mut agg = ResultAggregator::new(def.name, progress);
    if let Some(generate) = generate {
        let step = def.generate_step(generate);
        match step.invoke(&dir, &options.cancel) {
            Ok(result) if result.success() => {}
            Ok(result) => {
                let message = format!("{} exited with code {}", step.name(), result.exit_code);
                warn!(suite = def.name, "{message}");
                agg.prepare_failed(message);
            }
            Err(err) if err.is_interrupt() => {
                agg.interrupted();
                return agg.finish().context("failed to write progress");
            }
            Err(err) => {
                warn!(suite = def.name, error = %err, "artifact generation failed");
                agg.prepare_failed(err.to_string());
            }
        }
    }

    evaluate(&mut agg, &dir, def.protocol, runner, options)?;
    let report = agg.finish().context("failed to write progress")?;
    info!(suite = def.name, verdict = %report.verdict(), "finished suite");
    Ok(report)
}

/// Compare every artifact below `dir` without any suite bookkeeping.
pub fn run_directory<R, W>(
    name: &str,
    dir: &Path,
    protocol: Protocol,
    runner: &R,
    options: &RunOptions,
    progress: W,
) -> Result<SuiteReport>
where
    R: Runner + Sync,
    W: Write,
{
    info!(suite = name, dir = %dir.display(), ?protocol, "starting directory run");
    let mut agg = ResultAggregator::new(name, progress);
    evaluate(&mut agg, dir, protocol, runner, options)?;
    agg.finish().context("failed to write progress")
}

fn evaluate<R, W>(
    agg: &mut ResultAggregator<W>,
    dir: &Path,
    protocol: Protocol,
    runner: &R,
    options: &RunOptions,
) -> Result<()>
where
    R: Runner + Sync,
    W: Write,
{
    let cancel = &options.cancel;
    let mut write_error = None;

    run_pool(
        discover(dir, protocol.layout()),
        options.jobs,
        cancel,
        |pair| compare(runner, &protocol.plan(pair)),
        |pair, result| {
            // Anything finishing after the interrupt may have been cut short.
            if cancel.is_cancelled() {
                return;
            }
            let outcome = match result {
                Ok(outcome) => outcome,
                Err(err) if err.is_interrupt() => {
                    cancel.cancel();
                    return;
                }
                Err(err) => {
                    warn!(file = %pair.root.display(), error = %err, "comparison aborted");
                    ComparisonOutcome::Failed
                }
            };
            if let Err(err) = agg.record(&pair.root, outcome) {
                if write_error.is_none() {
                    write_error = Some(err);
                }
            }
        },
    );

    if cancel.is_cancelled() {
        agg.interrupted();
    }
    match write_error {
        Some(err) => Err(err).context("failed to write progress"),
        None => Ok(()),
    }
}
