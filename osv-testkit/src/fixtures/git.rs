//! Thin runner for git plumbing commands.

use std::ffi::OsString;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use tracing::trace;

use super::error::{FixtureError, Result};

/// Returns true when a `git` binary can be executed.
pub fn git_available() -> bool {
    Command::new("git")
        .arg("--version")
        .output()
        .map(|out| out.status.success())
        .unwrap_or(false)
}

/// A git invocation against one repository, isolated from user and system
/// configuration.
pub(crate) struct GitCommand {
    args: Vec<String>,
    envs: Vec<(&'static str, OsString)>,
    stdin: Option<Vec<u8>>,
    repo: PathBuf,
}

impl GitCommand {
    pub(crate) fn new<I, S>(repo: &Path, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            args: args.into_iter().map(Into::into).collect(),
            envs: Vec::new(),
            stdin: None,
            repo: repo.to_path_buf(),
        }
    }

    pub(crate) fn env(mut self, key: &'static str, value: impl Into<OsString>) -> Self {
        self.envs.push((key, value.into()));
        self
    }

    pub(crate) fn stdin(mut self, input: &[u8]) -> Self {
        self.stdin = Some(input.to_vec());
        self
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new("git");
        cmd.current_dir(&self.repo)
            .env("GIT_CONFIG_NOSYSTEM", "1")
            .env("GIT_CONFIG_GLOBAL", "/dev/null")
            .env("GIT_TERMINAL_PROMPT", "0")
            .args(["-c", "commit.gpgsign=false", "-c", "core.autocrlf=false"])
            .args(&self.args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        for (key, value) in &self.envs {
            cmd.env(key, value);
        }
        cmd
    }

    /// Run to completion and return raw stdout.
    pub(crate) fn output(self) -> Result<Vec<u8>> {
        let mut cmd = self.command();
        trace!(repo = %self.repo.display(), args = ?self.args, "Running git");

        let output = match &self.stdin {
            Some(input) => {
                cmd.stdin(Stdio::piped());
                let mut child = cmd.spawn()?;
                if let Some(mut pipe) = child.stdin.take() {
                    pipe.write_all(input)?;
                }
                child.wait_with_output()?
            }
            None => cmd.stdin(Stdio::null()).output()?,
        };

        if !output.status.success() {
            return Err(FixtureError::Git {
                args: self.args,
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(output.stdout)
    }

    /// Run to completion and return trimmed stdout as text.
    pub(crate) fn text(self) -> Result<String> {
        let stdout = self.output()?;
        Ok(String::from_utf8_lossy(&stdout).trim().to_string())
    }
}
