//! Versioned tool lookup.
//!
//! The harness needs an assembler and an interpreter from a specific LLVM
//! release family, plus the candidate tool under test. All three are
//! resolved once, before any artifact is touched; a missing tool aborts the
//! run.

use std::env;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::cancel::CancelToken;
use crate::compare::Runner;
use crate::tool::{ExecutionResult, Tool, ToolError};

pub const ASSEMBLER: &str = "llvm-as";
pub const INTERPRETER: &str = "lli";

/// Environment variable that tells the IR writer which textual dialect to
/// emit.
pub const VERSION_VAR: &str = "IRWRITER_LLVM_VERSION";

/// Interpreter time limit per program.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// LLVM release family a suite is written for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
pub enum Family {
    #[value(name = "3.2")]
    #[serde(rename = "3.2")]
    Llvm32,
    #[value(name = "3.8")]
    #[serde(rename = "3.8")]
    Llvm38,
}

impl Family {
    pub fn tag(self) -> &'static str {
        match self {
            Family::Llvm32 => "3.2",
            Family::Llvm38 => "3.8",
        }
    }

    /// Releases whose tools understand this family's bitcode.
    pub fn versions(self) -> &'static [&'static str] {
        match self {
            Family::Llvm32 => &["3.2", "3.3"],
            Family::Llvm38 => &["3.8", "3.9", "4.0", "5.0"],
        }
    }

    pub fn config(self) -> ToolchainConfig {
        let versions: Vec<String> = self.versions().iter().map(|v| v.to_string()).collect();
        ToolchainConfig {
            assembler_versions: versions.clone(),
            interpreter_versions: versions,
        }
    }
}

/// Acceptable versions per tool, in preference order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolchainConfig {
    pub assembler_versions: Vec<String>,
    pub interpreter_versions: Vec<String>,
}

/// How to launch the tool under test. The binary to run is appended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ToolOptions {
    pub timeout: Option<Duration>,
    pub show_output: bool,
    /// Exported to the candidate as [`VERSION_VAR`].
    pub version_tag: String,
}

/// Concrete executables for one run. Shared read-only by all workers.
#[derive(Debug, Clone)]
pub struct Toolchain {
    pub assembler: Tool,
    pub interpreter: Tool,
    pub candidate: Tool,
    cancel: CancelToken,
}

impl Toolchain {
    pub fn resolve(
        config: &ToolchainConfig,
        candidate: &CandidateSpec,
        options: &ToolOptions,
        cancel: CancelToken,
    ) -> Result<Self, ToolError> {
        let search_path = env::var_os("PATH");
        let assembler = find_program_in(ASSEMBLER, &config.assembler_versions, search_path.clone())?;
        let interpreter =
            find_program_in(INTERPRETER, &config.interpreter_versions, search_path.clone())?;
        let candidate_program = locate(&candidate.program, search_path)?;
        info!(
            assembler = %assembler.display(),
            interpreter = %interpreter.display(),
            candidate = %candidate_program.display(),
            "resolved toolchain"
        );

        Ok(Self {
            assembler: Tool::new(assembler).with_output(true),
            interpreter: Tool::new(interpreter)
                .with_timeout(options.timeout)
                .with_output(options.show_output),
            candidate: Tool::new(candidate_program)
                .with_args(&candidate.args)
                .with_env(VERSION_VAR, &options.version_tag)
                .with_timeout(options.timeout)
                .with_output(options.show_output),
            cancel,
        })
    }

    /// Assemble from explicitly given tools, skipping lookup.
    pub fn from_tools(assembler: Tool, interpreter: Tool, candidate: Tool, cancel: CancelToken) -> Self {
        Self {
            assembler,
            interpreter,
            candidate,
            cancel,
        }
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }
}

impl Runner for Toolchain {
    fn assemble(&self, textual: &Path) -> Result<ExecutionResult, ToolError> {
        self.assembler.invoke(textual, &self.cancel)
    }

    fn interpret(&self, binary: &Path) -> Result<ExecutionResult, ToolError> {
        self.interpreter.invoke(binary, &self.cancel)
    }

    fn run_candidate(&self, binary: &Path) -> Result<ExecutionResult, ToolError> {
        self.candidate.invoke(binary, &self.cancel)
    }
}

/// Find `name` for one of `versions` on the directories of `search_path`.
///
/// Suffixed names (`lli-3.8`, then `lli-38`) are tried per version in
/// order; an unsuffixed `lli` is accepted only when its `--version` output
/// names one of the versions.
pub fn find_program_in(
    name: &str,
    versions: &[String],
    search_path: Option<OsString>,
) -> Result<PathBuf, ToolError> {
    let dirs: Vec<PathBuf> = search_path
        .map(|path| env::split_paths(&path).collect())
        .unwrap_or_default();

    for version in versions {
        for file_name in [
            format!("{name}-{version}"),
            format!("{name}-{}", version.replace('.', "")),
        ] {
            if let Some(found) = search(&dirs, &file_name) {
                return Ok(found);
            }
        }
    }

    if let Some(plain) = search(&dirs, name) {
        if reports_version(&plain, versions) {
            return Ok(plain);
        }
        debug!(program = %plain.display(), "unversioned tool has the wrong version");
    }

    Err(ToolError::NotFound {
        name: name.to_string(),
        versions: versions.join(", "),
    })
}

fn locate(program: &Path, search_path: Option<OsString>) -> Result<PathBuf, ToolError> {
    let not_found = || ToolError::NotFound {
        name: program.display().to_string(),
        versions: "any".to_string(),
    };
    if program.components().count() > 1 || program.is_absolute() {
        return if is_executable(program) {
            Ok(program.to_path_buf())
        } else {
            Err(not_found())
        };
    }
    let dirs: Vec<PathBuf> = search_path
        .map(|path| env::split_paths(&path).collect())
        .unwrap_or_default();
    search(&dirs, &program.to_string_lossy()).ok_or_else(not_found)
}

fn search(dirs: &[PathBuf], file_name: &str) -> Option<PathBuf> {
    dirs.iter()
        .map(|dir| dir.join(file_name))
        .find(|path| is_executable(path))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt as _;
    path.metadata()
        .is_ok_and(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

fn reports_version(program: &Path, versions: &[String]) -> bool {
    let Ok(output) = Command::new(program)
        .arg("--version")
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .output()
    else {
        return false;
    };
    let text = String::from_utf8_lossy(&output.stdout);
    versions
        .iter()
        .any(|version| text.contains(&format!("version {version}")))
}
