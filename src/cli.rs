//! Runs the command-line front-end as an opaque executable and collects what
//! it printed and how it exited.

use std::{
    ffi::OsString,
    io,
    path::{Path, PathBuf},
    process::Stdio,
    time::Duration,
};

use thiserror::Error;
use tokio::process::Command;

use crate::{instance::DEFAULT_ADDRESS_ENV_VAR, paths, DaemonInstance};

const DEFAULT_CLI_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum CliError {
    #[error("failed to run {}: {source}", program.display())]
    Spawn {
        program: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{} did not finish within {timeout:?}", program.display())]
    Timeout { program: PathBuf, timeout: Duration },

    /// The process started but collecting its output or exit status failed.
    #[error("failed to collect output of {}: {source}", program.display())]
    Io {
        program: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// What a finished CLI invocation printed and how it exited.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CliOutput {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
}

impl CliOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// One invocation of the CLI under test.
#[derive(Debug, Clone)]
pub struct CliCommand {
    program: PathBuf,
    args: Vec<OsString>,
    current_dir: Option<PathBuf>,
    env: Vec<(OsString, OsString)>,
    timeout: Duration,
}

impl CliCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            current_dir: None,
            env: Vec::new(),
            timeout: DEFAULT_CLI_TIMEOUT,
        }
    }

    /// The CLI located by [`paths::cli_binary`].
    pub fn centy() -> Self {
        Self::new(paths::cli_binary())
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

    pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.current_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Points the CLI at `daemon` through `CENTY_DAEMON_ADDR`.
    pub fn daemon(self, daemon: &DaemonInstance) -> Self {
        self.env(DEFAULT_ADDRESS_ENV_VAR, daemon.address())
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Runs the command to completion. The process is killed if it outlives
    /// the timeout.
    pub async fn output(self) -> Result<CliOutput, CliError> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .envs(self.env.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.current_dir {
            command.current_dir(dir);
        }

        tracing::debug!(program = %self.program.display(), args = ?self.args, "running cli");
        let child = command.spawn().map_err(|source| CliError::Spawn {
            program: self.program.clone(),
            source,
        })?;

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(source)) => {
                return Err(CliError::Io {
                    program: self.program,
                    source,
                })
            }
            Err(_) => {
                return Err(CliError::Timeout {
                    program: self.program,
                    timeout: self.timeout,
                })
            }
        };

        Ok(CliOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code(),
        })
    }
}
