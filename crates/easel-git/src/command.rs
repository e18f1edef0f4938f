//! Session-aware git process wrapper.
//!
//! Commands run against a workspace session: directly in a local directory,
//! or routed through the distribution launcher for remote sessions.

use std::ffi::OsString;
use std::process::Command;

use easel_core::types::WorkspaceSession;

use crate::error::GitError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitOutput {
    pub stdout: String,
    pub stderr: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitCli {
    pub binary: String,
    pub distribution_launcher: String,
}

impl Default for GitCli {
    fn default() -> Self {
        Self {
            binary: "git".to_string(),
            distribution_launcher: "wsl".to_string(),
        }
    }
}

impl GitCli {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            ..Self::default()
        }
    }

    /// Run `git <args>` inside the session's working directory.
    pub fn run<I, S>(&self, session: &WorkspaceSession, args: I) -> Result<GitOutput, GitError>
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        let owned_args: Vec<OsString> = args.into_iter().map(Into::into).collect();

        let mut command = match session {
            WorkspaceSession::Local { path } => {
                let mut command = Command::new(&self.binary);
                command.current_dir(path);
                command.args(&owned_args);
                command
            }
            WorkspaceSession::Distribution { name, path } => {
                let mut command = Command::new(&self.distribution_launcher);
                command.arg("-d");
                command.arg(name);
                command.arg("--cd");
                command.arg(path);
                command.arg(&self.binary);
                command.args(&owned_args);
                command
            }
        };

        let rendered = self.render(&owned_args);
        let output = command.output().map_err(|source| GitError::Io {
            command: rendered.clone(),
            source,
        })?;

        let stdout =
            String::from_utf8(output.stdout).map_err(|source| GitError::NonUtf8Output {
                command: rendered.clone(),
                stream: "stdout",
                source,
            })?;
        let stderr =
            String::from_utf8(output.stderr).map_err(|source| GitError::NonUtf8Output {
                command: rendered.clone(),
                stream: "stderr",
                source,
            })?;

        if !output.status.success() {
            return Err(GitError::CommandFailed {
                command: rendered,
                status: output.status.code(),
                stdout,
                stderr,
            });
        }

        Ok(GitOutput { stdout, stderr })
    }

    fn render(&self, args: &[OsString]) -> String {
        let mut rendered = self.binary.clone();
        for arg in args {
            rendered.push(' ');
            rendered.push_str(&arg.to_string_lossy());
        }
        rendered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn unique_temp_dir(prefix: &str) -> PathBuf {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos();
        let path = std::env::temp_dir().join(format!("easel-git-{prefix}-{now}"));
        fs::create_dir_all(&path).expect("create temp dir");
        path
    }

    #[test]
    fn run_returns_stdout_for_successful_command() {
        let git = GitCli::default();
        let cwd = unique_temp_dir("command-ok");
        let session = WorkspaceSession::local(&cwd);

        let output = git
            .run(&session, ["--version"])
            .expect("git --version should succeed");
        assert!(output.stdout.to_ascii_lowercase().contains("git version"));

        let _ = fs::remove_dir_all(cwd);
    }

    #[test]
    fn run_classifies_non_zero_exit_as_command_failed() {
        let git = GitCli::default();
        let cwd = unique_temp_dir("command-fail");
        let session = WorkspaceSession::local(&cwd);

        let err = git
            .run(&session, ["definitely-not-a-real-git-subcommand"])
            .expect_err("unknown subcommand should fail");
        assert!(matches!(err, GitError::CommandFailed { status, .. } if status.is_some()));

        let _ = fs::remove_dir_all(cwd);
    }

    #[test]
    fn run_classifies_missing_binary_as_io_error() {
        let git = GitCli::new("/definitely/missing/git-binary");
        let cwd = unique_temp_dir("command-io");
        let session = WorkspaceSession::local(&cwd);

        let err = git
            .run(&session, ["status"])
            .expect_err("missing binary should fail");
        match err {
            GitError::Io { command, source } => {
                assert!(command.contains("/definitely/missing/git-binary"));
                assert_eq!(source.kind(), std::io::ErrorKind::NotFound);
            }
            other => panic!("expected Io, got {other:?}"),
        }

        let _ = fs::remove_dir_all(cwd);
    }
}
