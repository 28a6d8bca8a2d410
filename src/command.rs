// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! External command execution.
//!
//! Every provisioning step boils down to shelling out to an existing CLI like
//! `docker`, `getent`, `useradd`, or `chown`, and inspecting its exit code.
//! This module owns the one place where a process actually gets spawned.
//!
//! # Failure Policy
//!
//! A non-zero exit is not always an error. Inspection commands like
//! `docker network inspect` or `getent group` report _absence_ through their
//! exit code, which is a perfectly normal branch outcome. Thus, callers pick
//! a policy per invocation through the `ignore_failure` flag of
//! [`CommandRunner::run`]. Nothing is ever retried here. Retrying a blind
//! `useradd` or `docker build` is not safe without re-checking state first,
//! which is the caller's job.

use std::process::{Command, Stdio};
use tracing::{debug, instrument};

/// Spawn external processes.
///
/// Implementors must not hold shared mutable state, so a single runner can be
/// used by provisioning runs of independent projects on separate threads.
pub trait CommandRunner {
    /// Spawn exactly one process for `argv` and wait for it to exit.
    ///
    /// The first element of `argv` is the program, the rest are arguments.
    /// Exit status is recorded, not judged.
    ///
    /// # Errors
    ///
    /// - Return [`CommandError::EmptyArgv`] if `argv` is empty.
    /// - Return [`CommandError::Spawn`] if the process cannot be started.
    fn execute(&self, argv: &[String]) -> Result<CommandOutput>;

    /// Run command, and judge its exit status.
    ///
    /// # Errors
    ///
    /// - Return [`CommandError::Failed`] if the command exited non-zero and
    ///   `ignore_failure` is false.
    /// - Any error from [`CommandRunner::execute`].
    fn run(&self, argv: &[String], ignore_failure: bool) -> Result<CommandOutput> {
        let output = self.execute(argv)?;
        if !ignore_failure && !output.success() {
            return Err(output.into_error());
        }

        Ok(output)
    }
}

impl<F> CommandRunner for F
where
    F: Fn(&[String]) -> Result<CommandOutput>,
{
    fn execute(&self, argv: &[String]) -> Result<CommandOutput> {
        self(argv)
    }
}

/// Runner that spawns real processes on the host.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl SystemRunner {
    /// Construct new system runner.
    pub fn new() -> Self {
        Self
    }
}

impl CommandRunner for SystemRunner {
    #[instrument(skip(self), level = "debug")]
    fn execute(&self, argv: &[String]) -> Result<CommandOutput> {
        let (program, args) = argv.split_first().ok_or(CommandError::EmptyArgv)?;
        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .map_err(|source| CommandError::Spawn {
                program: program.clone(),
                source,
            })?;

        let output = CommandOutput::new(
            argv.to_vec(),
            output.status.code(),
            String::from_utf8_lossy(output.stdout.as_slice()).into_owned(),
            String::from_utf8_lossy(output.stderr.as_slice()).into_owned(),
        );
        debug!("{} exited with {:?}", output.command_line(), output.code());

        Ok(output)
    }
}

/// Captured result of one external process.
///
/// Produced and consumed within a single operation, never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    argv: Vec<String>,
    code: Option<i32>,
    stdout: String,
    stderr: String,
}

impl CommandOutput {
    /// Construct new command output.
    ///
    /// Exit code is `None` if the process was terminated by a signal.
    pub fn new(
        argv: Vec<String>,
        code: Option<i32>,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
    ) -> Self {
        Self {
            argv,
            code,
            stdout: stdout.into(),
            stderr: stderr.into(),
        }
    }

    /// Argument vector the process was spawned with.
    pub fn argv(&self) -> &[String] {
        &self.argv
    }

    /// Exit code of the process.
    pub fn code(&self) -> Option<i32> {
        self.code
    }

    /// Determine if the process exited with code zero.
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    pub fn stdout(&self) -> &str {
        &self.stdout
    }

    pub fn stderr(&self) -> &str {
        &self.stderr
    }

    /// Combined stdout and stderr with trailing newline chomped.
    pub fn combined(&self) -> String {
        let mut message = String::new();
        message.push_str(self.stdout.as_str());
        if !self.stdout.is_empty() && !self.stderr.is_empty() && !self.stdout.ends_with('\n') {
            message.push('\n');
        }
        message.push_str(self.stderr.as_str());

        // INVARIANT: Chomp trailing newlines.
        message
            .strip_suffix("\r\n")
            .or(message.strip_suffix('\n'))
            .map(ToString::to_string)
            .unwrap_or(message)
    }

    /// Space-joined argument vector for log lines.
    pub fn command_line(&self) -> String {
        command_line(&self.argv)
    }

    /// Convert into [`CommandError::Failed`].
    pub fn into_error(self) -> CommandError {
        CommandError::Failed {
            output: self.combined(),
            command: self.command_line(),
            code: self.code,
        }
    }
}

/// Build argument vector from string slices.
pub fn argv<'a>(parts: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    parts.into_iter().map(str::to_owned).collect()
}

/// Space-join argument vector for display.
pub fn command_line(argv: &[String]) -> String {
    argv.join(" ")
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {code}"),
        None => "termination by signal".into(),
    }
}

/// External command error types.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    /// Nothing to run.
    #[error("cannot run empty command")]
    EmptyArgv,

    /// Process could not be started at all.
    #[error("failed to spawn {program:?}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// Process exited non-zero.
    #[error("command `{command}` failed with {}:\n{output}", describe_exit(.code))]
    Failed {
        command: String,
        code: Option<i32>,
        output: String,
    },
}

/// Friendly result alias :3
pub type Result<T, E = CommandError> = std::result::Result<T, E>;


#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn exiting(code: i32) -> impl Fn(&[String]) -> Result<CommandOutput> {
        move |argv: &[String]| Ok(CommandOutput::new(argv.to_vec(), Some(code), "out\n", "err\n"))
    }

    #[test]
    fn run_fails_on_nonzero_exit() {
        let runner = exiting(3);
        let result = runner.run(&argv(["docker", "network", "create", "foo"]), false);
        match result {
            Err(CommandError::Failed {
                command,
                code,
                output,
            }) => {
                assert_eq!(command, "docker network create foo");
                assert_eq!(code, Some(3));
                assert_eq!(output, "out\nerr");
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[test]
    fn run_ignores_nonzero_exit_when_asked() -> anyhow::Result<()> {
        let runner = exiting(1);
        let output = runner.run(&argv(["getent", "group", "foo"]), true)?;
        assert!(!output.success());
        assert_eq!(output.code(), Some(1));
        Ok(())
    }

    #[test]
    fn combined_output_chomps_trailing_newline() {
        let output = CommandOutput::new(argv(["id", "-u"]), Some(0), "1000\n", "");
        assert_eq!(output.combined(), "1000");

        let output = CommandOutput::new(argv(["id", "-u"]), Some(0), "a", "b\r\n");
        assert_eq!(output.combined(), "a\nb");
    }

    #[test]
    fn failed_error_reports_signal_termination() {
        let error = CommandOutput::new(argv(["docker", "build"]), None, "", "killed").into_error();
        assert_eq!(
            error.to_string(),
            "command `docker build` failed with termination by signal:\nkilled"
        );
    }

    #[test]
    fn system_runner_rejects_empty_argv() {
        let result = SystemRunner::new().execute(&[]);
        assert!(matches!(result, Err(CommandError::EmptyArgv)));
    }

    #[cfg(unix)]
    #[test]
    fn system_runner_captures_exit_code() -> anyhow::Result<()> {
        let output = SystemRunner::new().run(&argv(["sh", "-c", "echo hi; exit 4"]), true)?;
        assert_eq!(output.code(), Some(4));
        assert_eq!(output.stdout(), "hi\n");
        Ok(())
    }
}
