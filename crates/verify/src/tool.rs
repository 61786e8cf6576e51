use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::debug;

use crate::cancel::CancelToken;

/// Exit codes at or below this value mean the process was killed by a fatal
/// signal (abort, segfault, kill) rather than returning normally.
pub const SIGNAL_EXIT_THRESHOLD: i32 = -6;

/// Exit code reported for a process that was killed because it timed out.
pub const TIMEOUT_EXIT_CODE: i32 = -9;

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Exit code of a process killed by SIGINT.
const INTERRUPT_EXIT_CODE: i32 = -2;

/// How long a child that died of SIGINT waits for the Ctrl-C handler to
/// catch up before the exit is taken at face value.
const INTERRUPT_GRACE: Duration = Duration::from_millis(200);

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("{name} is not installed or not in PATH (tried versions: {versions})")]
    NotFound { name: String, versions: String },

    #[error("failed to launch {program} for {file}: {source}")]
    Launch {
        program: String,
        file: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to wait for {program} on {file}: {source}")]
    Wait {
        program: String,
        file: String,
        #[source]
        source: std::io::Error,
    },

    #[error("interrupted while running {program} on {file}")]
    Interrupted { program: String, file: String },
}

impl ToolError {
    pub fn is_interrupt(&self) -> bool {
        matches!(self, ToolError::Interrupted { .. })
    }
}

/// Observable outcome of one tool invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionResult {
    pub exit_code: i32,
    pub timed_out: bool,
}

impl ExecutionResult {
    pub fn exited(exit_code: i32) -> Self {
        Self {
            exit_code,
            timed_out: false,
        }
    }

    pub fn timeout() -> Self {
        Self {
            exit_code: TIMEOUT_EXIT_CODE,
            timed_out: true,
        }
    }

    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == 0
    }

    /// Signal-terminated or timed out. Such a run never produced a
    /// meaningful exit value.
    pub fn is_fatal(&self) -> bool {
        self.timed_out || self.exit_code <= SIGNAL_EXIT_THRESHOLD
    }
}

/// Translate a process status into a single integer: the exit code, or the
/// negated signal number for signal-terminated processes.
pub fn exit_code_of(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt as _;
        if let Some(signal) = status.signal() {
            return -signal;
        }
    }
    -1
}

/// One external program, invoked once per input file.
///
/// The file is always appended as the last argument.
#[derive(Debug, Clone)]
pub struct Tool {
    pub program: PathBuf,
    pub args: Vec<OsString>,
    pub env: Vec<(String, String)>,
    pub timeout: Option<Duration>,
    pub show_output: bool,
}

impl Tool {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            timeout: None,
            show_output: false,
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_output(mut self, show_output: bool) -> Self {
        self.show_output = show_output;
        self
    }

    pub fn name(&self) -> String {
        self.program
            .file_name()
            .unwrap_or(self.program.as_os_str())
            .to_string_lossy()
            .into_owned()
    }

    pub fn invoke(&self, file: &Path, cancel: &CancelToken) -> Result<ExecutionResult, ToolError> {
        if cancel.is_cancelled() {
            return Err(self.interrupted(file));
        }

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args).arg(file).stdin(Stdio::null());
        for (key, value) in &self.env {
            cmd.env(key, value);
        }
        if !self.show_output {
            cmd.stdout(Stdio::null()).stderr(Stdio::null());
        }

        debug!(tool = %self.name(), file = %file.display(), "invoking");
        let mut child = cmd.spawn().map_err(|source| ToolError::Launch {
            program: self.program.display().to_string(),
            file: file.display().to_string(),
            source,
        })?;

        let result = self.wait(&mut child, file, cancel)?;
        debug!(
            tool = %self.name(),
            file = %file.display(),
            exit_code = result.exit_code,
            timed_out = result.timed_out,
            "finished"
        );
        Ok(result)
    }

    fn wait(
        &self,
        child: &mut Child,
        file: &Path,
        cancel: &CancelToken,
    ) -> Result<ExecutionResult, ToolError> {
        let started = Instant::now();
        loop {
            match child.try_wait() {
                Ok(Some(status)) => {
                    let exit_code = exit_code_of(status);
                    if self.cancelled_during(exit_code, cancel) {
                        return Err(self.interrupted(file));
                    }
                    return Ok(ExecutionResult::exited(exit_code));
                }
                Ok(None) => {}
                Err(source) => {
                    kill_and_reap(child);
                    return Err(ToolError::Wait {
                        program: self.program.display().to_string(),
                        file: file.display().to_string(),
                        source,
                    });
                }
            }

            if cancel.is_cancelled() {
                kill_and_reap(child);
                return Err(self.interrupted(file));
            }
            if self.timeout.is_some_and(|limit| started.elapsed() >= limit) {
                kill_and_reap(child);
                return Ok(ExecutionResult::timeout());
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    /// Ctrl-C reaches the whole process group, so the child may die of it
    /// before the handler has set the token.
    fn cancelled_during(&self, exit_code: i32, cancel: &CancelToken) -> bool {
        if exit_code == INTERRUPT_EXIT_CODE {
            let started = Instant::now();
            while !cancel.is_cancelled() && started.elapsed() < INTERRUPT_GRACE {
                thread::sleep(POLL_INTERVAL);
            }
        }
        cancel.is_cancelled()
    }

    fn interrupted(&self, file: &Path) -> ToolError {
        ToolError::Interrupted {
            program: self.program.display().to_string(),
            file: file.display().to_string(),
        }
    }
}

fn kill_and_reap(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}
