//! Process-execution port
//!
//! The package manager is reached only through [`ProcessExecutor`], so an
//! in-process implementation can replace the subprocess without touching the
//! executor or the reconciler.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use crate::error::{ReleaseError, Result};

/// One program invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    pub timeout: Option<Duration>,
}

impl ProcessCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: Vec::new(),
            timeout: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Program name plus the first argument, for error messages
    pub fn display_name(&self) -> String {
        let program = self
            .program
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.program.display().to_string());
        match self.args.iter().find(|a| !a.starts_with("__")) {
            Some(verb) => format!("{} {}", program, verb),
            None => program,
        }
    }
}

/// Captured result of a finished process
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the process was killed by a signal
    pub exit_code: Option<i32>,
}

impl ProcessOutput {
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
            exit_code: Some(0),
        }
    }

    pub fn failure(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: stderr.into(),
            exit_code: Some(code),
        }
    }

    pub fn is_success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Runs a program to completion
#[async_trait]
pub trait ProcessExecutor: Send + Sync {
    /// A non-zero exit is reported in the output, not as an error; errors
    /// are reserved for failing to run the program at all
    async fn execute(&self, command: &ProcessCommand) -> Result<ProcessOutput>;
}

/// Spawns real subprocesses with tokio
#[derive(Debug, Clone, Default)]
pub struct TokioProcessExecutor;

impl TokioProcessExecutor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ProcessExecutor for TokioProcessExecutor {
    async fn execute(&self, command: &ProcessCommand) -> Result<ProcessOutput> {
        let mut cmd = tokio::process::Command::new(&command.program);
        cmd.args(&command.args)
            .envs(command.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(std::process::Stdio::null())
            .kill_on_drop(true);
        if let Some(dir) = &command.cwd {
            cmd.current_dir(dir);
        }

        let run = cmd.output();
        let output = match command.timeout {
            Some(limit) => tokio::time::timeout(limit, run).await.map_err(|_| {
                ReleaseError::Timeout {
                    command: command.display_name(),
                    seconds: limit.as_secs(),
                }
            })??,
            None => run.await?,
        };

        Ok(ProcessOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code(),
        })
    }
}

/// A recorded invocation of [`FakeProcess`]
#[derive(Debug, Clone)]
pub struct Invocation {
    pub command: ProcessCommand,
    /// File names present in the working directory when the program ran
    pub files: Vec<String>,
}

impl Invocation {
    /// First argument that is not a sentinel
    pub fn verb(&self) -> Option<&str> {
        self.command
            .args
            .iter()
            .find(|a| !a.starts_with("__"))
            .map(String::as_str)
    }
}

/// Scripted process executor that records every invocation
#[derive(Debug, Default)]
pub struct FakeProcess {
    invocations: Mutex<Vec<Invocation>>,
    rules: Mutex<Vec<(String, ProcessOutput)>>,
}

impl FakeProcess {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every `verb` invocation with `output` until replaced
    pub fn respond(&self, verb: impl Into<String>, output: ProcessOutput) {
        let verb = verb.into();
        let mut rules = self.rules.lock().unwrap_or_else(PoisonError::into_inner);
        rules.retain(|(v, _)| v != &verb);
        rules.push((verb, output));
    }

    pub fn invocations(&self) -> Vec<Invocation> {
        self.invocations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of invocations with the given verb
    pub fn count(&self, verb: &str) -> usize {
        self.invocations()
            .iter()
            .filter(|i| i.verb() == Some(verb))
            .count()
    }
}

fn list_files(dir: &Path) -> Vec<String> {
    let mut files: Vec<String> = std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .collect()
        })
        .unwrap_or_default();
    files.sort();
    files
}

#[async_trait]
impl ProcessExecutor for FakeProcess {
    async fn execute(&self, command: &ProcessCommand) -> Result<ProcessOutput> {
        let invocation = Invocation {
            command: command.clone(),
            files: command.cwd.as_deref().map(list_files).unwrap_or_default(),
        };
        let verb = invocation.verb().unwrap_or_default().to_string();
        self.invocations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(invocation);

        let rules = self.rules.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(rules
            .iter()
            .find(|(v, _)| *v == verb)
            .map(|(_, output)| output.clone())
            .unwrap_or_else(|| ProcessOutput::success(format!("{} ok", verb))))
    }
}
