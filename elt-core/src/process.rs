//! External command execution.
//!
//! dbt and the object-store CLI are driven through the `CommandRunner` trait so
//! workflows can be exercised (and dry-run) without either tool installed.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use thiserror::Error;

/// Failure to run an external command.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("failed to start `{program}`: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[error("`{command}` exited with {}{}", exit_description(.code), stderr_suffix(.stderr))]
    Failed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },
}

fn exit_description(code: &Option<i32>) -> String {
    code.map_or_else(|| "a signal".to_string(), |c| format!("status {c}"))
}

fn stderr_suffix(stderr: &str) -> String {
    let trimmed = stderr.trim();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!(": {trimmed}")
    }
}

/// A command line plus its working directory and extra environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    /// Added to the inherited environment. Values are never logged.
    pub env: BTreeMap<String, String>,
    /// Capture stdout/stderr instead of streaming them to the terminal.
    pub capture: bool,
}

impl CommandSpec {
    /// A command with no arguments that streams its output.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: BTreeMap::new(),
            capture: false,
        }
    }

    /// Append one argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Run in `dir` instead of the current directory.
    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Set an environment variable for the child only.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Capture stdout and stderr into the [`CommandOutput`].
    pub fn captured(mut self) -> Self {
        self.capture = true;
        self
    }

    /// `program arg1 arg2`, for logs. Environment is left out on purpose.
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(|a| a.as_str()))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Exit status and, for captured commands, the child's output.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandOutput {
    /// Exit code; `None` when killed by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// Exit code 0 with no output.
    pub fn ok() -> Self {
        Self {
            code: Some(0),
            ..Self::default()
        }
    }

    /// The given exit code with no output.
    pub fn exit(code: i32) -> Self {
        Self {
            code: Some(code),
            ..Self::default()
        }
    }

    pub fn with_stdout(mut self, stdout: impl Into<String>) -> Self {
        self.stdout = stdout.into();
        self
    }

    pub fn with_stderr(mut self, stderr: impl Into<String>) -> Self {
        self.stderr = stderr.into();
        self
    }

    /// Whether the command exited with code 0.
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Turn a non-zero exit into `ProcessError::Failed`.
    pub fn check(self, cmd: &CommandSpec) -> Result<Self, ProcessError> {
        if self.success() {
            Ok(self)
        } else {
            Err(ProcessError::Failed {
                command: cmd.display(),
                code: self.code,
                stderr: self.stderr,
            })
        }
    }
}

/// Runs external commands (dbt, the AWS CLI).
pub trait CommandRunner {
    /// Run to completion. A non-zero exit is returned as output, not as an
    /// error; callers decide whether it is fatal.
    fn run(&self, cmd: &CommandSpec) -> Result<CommandOutput, ProcessError>;
}

/// Runs commands for real.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, cmd: &CommandSpec) -> Result<CommandOutput, ProcessError> {
        tracing::debug!(command = %cmd.display(), cwd = ?cmd.cwd, "running");

        let mut command = Command::new(&cmd.program);
        command.args(&cmd.args).envs(&cmd.env);
        if let Some(dir) = &cmd.cwd {
            command.current_dir(dir);
        }

        let spawn_err = |source| ProcessError::Spawn {
            program: cmd.program.clone(),
            source,
        };

        if cmd.capture {
            let output = command.stdin(Stdio::null()).output().map_err(spawn_err)?;
            Ok(CommandOutput {
                code: output.status.code(),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            })
        } else {
            let status = command.stdin(Stdio::null()).status().map_err(spawn_err)?;
            Ok(CommandOutput {
                code: status.code(),
                ..CommandOutput::default()
            })
        }
    }
}

type Effect = Box<dyn Fn(&CommandSpec)>;

struct Rule {
    pattern: String,
    output: CommandOutput,
    effect: Option<Effect>,
}

/// Records every command instead of running it.
///
/// By default each command succeeds with empty output. Rules match on a
/// substring of [`CommandSpec::display`]; the first matching rule decides the
/// output and may run a side effect (e.g. create the file a download would
/// have written). `--dry-run` uses it with no rules.
#[derive(Default)]
pub struct ScriptedRunner {
    rules: Vec<Rule>,
    calls: RefCell<Vec<CommandSpec>>,
}

impl ScriptedRunner {
    /// A runner that records calls and answers every command with success.
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer commands containing `pattern` with `output`.
    pub fn respond(mut self, pattern: impl Into<String>, output: CommandOutput) -> Self {
        self.rules.push(Rule {
            pattern: pattern.into(),
            output,
            effect: None,
        });
        self
    }

    /// Like [`respond`](Self::respond), also running `effect` on each match.
    pub fn respond_with<F>(mut self, pattern: impl Into<String>, output: CommandOutput, effect: F) -> Self
    where
        F: Fn(&CommandSpec) + 'static,
    {
        self.rules.push(Rule {
            pattern: pattern.into(),
            output,
            effect: Some(Box::new(effect)),
        });
        self
    }

    /// Every command run so far, in order.
    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls.borrow().clone()
    }

    /// Display strings of every recorded call.
    pub fn command_lines(&self) -> Vec<String> {
        self.calls.borrow().iter().map(|c| c.display()).collect()
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, cmd: &CommandSpec) -> Result<CommandOutput, ProcessError> {
        tracing::info!(command = %cmd.display(), "dry run");
        self.calls.borrow_mut().push(cmd.clone());

        let line = cmd.display();
        match self.rules.iter().find(|r| line.contains(&r.pattern)) {
            Some(rule) => {
                if let Some(effect) = &rule.effect {
                    effect(cmd);
                }
                Ok(rule.output.clone())
            }
            None => Ok(CommandOutput::ok()),
        }
    }
}
