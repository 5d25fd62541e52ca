use std::{
    collections::VecDeque,
    ffi::OsString,
    io,
    path::Path,
    process::Stdio,
    sync::{Arc, Mutex},
};

use tokio::{
    io::{AsyncBufReadExt, AsyncRead, BufReader},
    process::{Child, Command},
};
use tokio_util::sync::CancellationToken;

use crate::instance::InstanceId;

const OUTPUT_CAPACITY: usize = 256;

/// Which pipe a captured line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

impl std::fmt::Display for OutputStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stdout => write!(f, "stdout"),
            Self::Stderr => write!(f, "stderr"),
        }
    }
}

/// Bounded tail of a child's stdout and stderr, oldest lines dropped first.
#[derive(Debug, Clone, Default)]
pub struct OutputLog {
    lines: Arc<Mutex<VecDeque<(OutputStream, String)>>>,
}

impl OutputLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&self, stream: OutputStream, line: String) {
        let mut lines = self.lines.lock().unwrap_or_else(|e| e.into_inner());
        if lines.len() == OUTPUT_CAPACITY {
            lines.pop_front();
        }
        lines.push_back((stream, line));
    }

    /// Captured lines formatted as `"<stream>: <line>"`, oldest first.
    pub fn lines(&self) -> Vec<String> {
        let lines = self.lines.lock().unwrap_or_else(|e| e.into_inner());
        lines
            .iter()
            .map(|(stream, line)| format!("{stream}: {line}"))
            .collect()
    }
}

/// What to run for one daemon instance.
#[derive(Debug)]
pub(crate) struct LaunchSpec<'a> {
    pub(crate) binary: &'a Path,
    pub(crate) args: &'a [OsString],
    pub(crate) env: &'a [(OsString, OsString)],
    pub(crate) work_dir: &'a Path,
}

pub(crate) struct Launched {
    pub(crate) child: Child,
    pub(crate) output: OutputLog,
}

/// Spawns the daemon binary with `spec.env` layered over the inherited
/// environment and stdio captured.
///
/// The returned child is killed if dropped without being reaped. Output pumps
/// run until the pipes close or `token` is cancelled.
pub(crate) fn launch(
    id: InstanceId,
    spec: &LaunchSpec<'_>,
    token: &CancellationToken,
) -> io::Result<Launched> {
    let mut child = Command::new(spec.binary)
        .args(spec.args)
        .envs(spec.env.iter().map(|(k, v)| (k, v)))
        .current_dir(spec.work_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;

    tracing::debug!(
        instance = %id,
        pid = child.id(),
        binary = %spec.binary.display(),
        "launched daemon process"
    );

    let output = OutputLog::new();
    if let Some(stdout) = child.stdout.take() {
        spawn_pump(id, OutputStream::Stdout, stdout, output.clone(), token.clone());
    }
    if let Some(stderr) = child.stderr.take() {
        spawn_pump(id, OutputStream::Stderr, stderr, output.clone(), token.clone());
    }

    Ok(Launched { child, output })
}

fn spawn_pump<R>(
    id: InstanceId,
    stream: OutputStream,
    reader: R,
    output: OutputLog,
    token: CancellationToken,
) where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                line = lines.next_line() => match line {
                    Ok(Some(line)) => {
                        tracing::debug!(target: "daemon_harness::daemon", instance = %id, %stream, "{line}");
                        output.push(stream, line);
                    }
                    Ok(None) | Err(_) => break,
                },
            }
        }
    });
}
