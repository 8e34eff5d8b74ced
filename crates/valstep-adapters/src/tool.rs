//! ValStep invocation.

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tempfile::NamedTempFile;
use tokio::process::Command;
use tracing::debug;
use valstep_core::ToolConfig;
use valstep_proto::PlanningTask;

/// How the rendered happenings reach ValStep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputDelivery {
    /// Written to a file passed with `-i` (current ValStep versions).
    File,
    /// Piped to stdin in one shot (legacy ValStep versions).
    Pipe,
}

/// How to launch ValStep.
#[derive(Debug, Clone)]
pub struct ValStepTool {
    /// Executable to run.
    pub command: String,
    /// Arguments before ValStep's own.
    pub args: Vec<String>,
    /// Working directory, if not the current one.
    pub cwd: Option<PathBuf>,
}

impl ValStepTool {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            cwd: None,
        }
    }

    pub fn from_config(config: &ToolConfig) -> Self {
        Self {
            command: config.path.clone(),
            args: config.args.clone(),
            cwd: config.cwd.clone(),
        }
    }

    pub fn with_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Builds `<command> [args] [-i <input>] <domain> <problem>`.
    ///
    /// Stdout and stderr are always piped. The child is killed if its handle
    /// is dropped, so no exit path leaves ValStep running.
    pub(crate) fn build_command(
        &self,
        input_file: Option<&Path>,
        files: &TaskFiles,
        stdin: Stdio,
    ) -> Command {
        let mut command = Command::new(&self.command);
        command.args(&self.args);
        if let Some(input) = input_file {
            command.arg("-i").arg(input);
        }
        command.arg(files.domain_path()).arg(files.problem_path());

        if let Some(cwd) = &self.cwd {
            command.current_dir(cwd);
        }

        command
            .stdin(stdin)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(
            command = %self.command,
            args = ?self.args,
            input = ?input_file,
            domain = %files.domain_path().display(),
            problem = %files.problem_path().display(),
            "Prepared ValStep command"
        );
        command
    }
}

/// Domain and problem text materialized as temporary files.
///
/// Editor buffers may differ from disk, so ValStep always reads these
/// copies. The files are removed when this value is dropped.
#[derive(Debug)]
pub(crate) struct TaskFiles {
    domain: NamedTempFile,
    problem: NamedTempFile,
}

impl TaskFiles {
    pub(crate) fn write(task: &PlanningTask) -> io::Result<Self> {
        Ok(Self {
            domain: temp_file("domain", ".pddl", &task.domain_text)?,
            problem: temp_file("problem", ".pddl", &task.problem_text)?,
        })
    }

    pub(crate) fn domain_path(&self) -> &Path {
        self.domain.path()
    }

    pub(crate) fn problem_path(&self) -> &Path {
        self.problem.path()
    }
}

/// Writes ValStep instructions to a temporary `-i` input file.
pub(crate) fn write_input_file(input: &str) -> io::Result<NamedTempFile> {
    temp_file("valSteps", ".valsteps", input)
}

fn temp_file(prefix: &str, suffix: &str, content: &str) -> io::Result<NamedTempFile> {
    let mut file = tempfile::Builder::new()
        .prefix(prefix)
        .suffix(suffix)
        .tempfile()?;
    file.write_all(content.as_bytes())?;
    file.flush()?;
    Ok(file)
}
