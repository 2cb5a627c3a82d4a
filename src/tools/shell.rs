//! External command execution
//!
//! Every tool wrapper funnels through [`ShellCommand`], which logs the
//! invocation, captures output and turns a non-zero exit into an error.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command as TokioCommand;

use crate::common::{Error, Result};

/// Captured result of a finished command
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub code: Option<i32>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// A command line to run
#[derive(Debug, Clone)]
pub struct ShellCommand {
    program: PathBuf,
    args: Vec<OsString>,
    env: BTreeMap<String, String>,
    current_dir: Option<PathBuf>,
    stdin: Option<String>,
}

impl ShellCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
            current_dir: None,
            stdin: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn envs(mut self, vars: &BTreeMap<String, String>) -> Self {
        self.env
            .extend(vars.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.current_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Text written to the command's stdin
    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    /// Human-readable form of the command line, for logs and errors
    pub fn display(&self) -> String {
        let mut parts = vec![self.program.display().to_string()];
        parts.extend(self.args.iter().map(|a| a.to_string_lossy().into_owned()));
        parts.join(" ")
    }

    /// Run to completion and return captured output regardless of exit status
    pub async fn execute(&self) -> Result<CommandOutput> {
        let shown = self.display();
        tracing::info!(command = %shown, "Running command");

        let mut cmd = TokioCommand::new(&self.program);
        cmd.args(&self.args)
            .envs(&self.env)
            .stdin(if self.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(dir) = &self.current_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|source| Error::CommandSpawn {
            command: shown.clone(),
            source,
        })?;

        if let Some(input) = &self.stdin {
            use tokio::io::AsyncWriteExt;

            if let Some(mut pipe) = child.stdin.take() {
                // A child that exits without reading stdin is reported by its exit status
                match pipe.write_all(input.as_bytes()).await {
                    Ok(()) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {
                        tracing::debug!(command = %shown, "Command closed stdin early");
                    }
                    Err(e) => return Err(e.into()),
                }
                // Dropping the pipe closes stdin
            }
        }

        let output = child.wait_with_output().await?;
        let result = CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            code: output.status.code(),
        };

        for line in result.stdout.lines() {
            tracing::debug!(command = %self.program.display(), "{}", line);
        }
        for line in result.stderr.lines() {
            tracing::debug!(command = %self.program.display(), stream = "stderr", "{}", line);
        }

        Ok(result)
    }

    /// Run and fail unless the command exits successfully
    pub async fn run(&self) -> Result<()> {
        self.output().await.map(|_| ())
    }

    /// Run and return stdout, failing unless the command exits successfully
    pub async fn output(&self) -> Result<String> {
        let result = self.execute().await?;
        if !result.success() {
            return Err(Error::CommandFailed {
                command: self.display(),
                code: result.code,
                stderr: result.stderr.trim().to_string(),
            });
        }
        Ok(result.stdout)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn output_captures_stdout() {
        let out = ShellCommand::new("sh")
            .args(["-c", "echo hello; echo ignored >&2"])
            .output()
            .await
            .unwrap();
        assert_eq!(out.trim(), "hello");
    }

    #[tokio::test]
    async fn non_zero_exit_is_command_failed() {
        let err = ShellCommand::new("sh")
            .args(["-c", "echo broken >&2; exit 3"])
            .run()
            .await
            .unwrap_err();
        match err {
            Error::CommandFailed { code, stderr, .. } => {
                assert_eq!(code, Some(3));
                assert_eq!(stderr, "broken");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn env_current_dir_and_stdin_are_applied() {
        let tmp = tempfile::tempdir().unwrap();
        let out = ShellCommand::new("sh")
            .args(["-c", "printf '%s|' \"$GREETING\"; basename \"$(pwd)\"; cat"])
            .env("GREETING", "hi")
            .current_dir(tmp.path())
            .stdin("from-stdin")
            .output()
            .await
            .unwrap();
        let dir_name = tmp.path().file_name().unwrap().to_string_lossy().into_owned();
        assert_eq!(out, format!("hi|{}\nfrom-stdin", dir_name));
    }

    #[tokio::test]
    async fn unread_stdin_reports_exit_status() {
        // Large enough to overflow the pipe buffer once the child is gone
        let input = "x".repeat(1 << 20);
        let err = ShellCommand::new("sh")
            .args(["-c", "echo refused >&2; exit 4"])
            .stdin(input)
            .run()
            .await
            .unwrap_err();
        match err {
            Error::CommandFailed { code, stderr, .. } => {
                assert_eq!(code, Some(4));
                assert_eq!(stderr, "refused");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn missing_program_is_spawn_error() {
        let err = ShellCommand::new("/definitely/not/a/real/binary")
            .run()
            .await
            .unwrap_err();
        assert!(matches!(err, Error::CommandSpawn { .. }));
    }
}
