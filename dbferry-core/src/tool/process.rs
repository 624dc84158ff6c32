use super::Error;
use futures::{prelude::*, stream::BoxStream};
use std::time::Duration;
use tokio::{
    io::{AsyncBufReadExt as _, BufReader},
    process::Child,
};
use tokio_stream::wrappers::LinesStream;

#[derive(Debug, PartialEq, Eq, Hash, Copy, Clone)]
pub enum ExitStatus {
    Successful,
    Failed(Option<i32>),
}

impl ExitStatus {
    pub fn success(&self) -> bool {
        self == &ExitStatus::Successful
    }

    pub fn code(&self) -> Option<i32> {
        match self {
            ExitStatus::Successful => Some(0),
            ExitStatus::Failed(code) => *code,
        }
    }

    pub fn message(&self) -> String {
        match self {
            ExitStatus::Successful => "tool exited successfully".to_owned(),
            ExitStatus::Failed(Some(code)) => {
                format!("tool exited with error status {}", code)
            }
            ExitStatus::Failed(None) => "tool exited with unknown error status".to_owned(),
        }
    }
}

impl From<std::process::ExitStatus> for ExitStatus {
    fn from(status: std::process::ExitStatus) -> Self {
        if status.success() {
            ExitStatus::Successful
        } else {
            ExitStatus::Failed(status.code())
        }
    }
}

#[cfg(unix)]
fn ask_to_terminate(child: &mut Child) -> Result<(), Error> {
    match child.id() {
        Some(pid) => {
            unsafe { libc::kill(pid as i32, libc::SIGTERM) };
            Ok(())
        }
        // already reaped
        None => Ok(()),
    }
}

#[cfg(not(unix))]
fn ask_to_terminate(child: &mut Child) -> Result<(), Error> {
    child.start_kill().map_err(Error::SubprocessTerminate)
}

fn merge_output_streams(child: &mut Child) -> BoxStream<'static, std::io::Result<String>> {
    let stdout = child
        .stdout
        .take()
        .map(|io| LinesStream::new(BufReader::new(io).lines()));
    let stderr = child
        .stderr
        .take()
        .map(|io| LinesStream::new(BufReader::new(io).lines()));

    match (stdout, stderr) {
        (Some(stdout), Some(stderr)) => Box::pin(stream::select(stdout, stderr)),
        (Some(stdout), None) => Box::pin(stdout),
        (None, Some(stderr)) => Box::pin(stderr),
        (None, None) => Box::pin(stream::empty()),
    }
}

/// A running external tool whose combined stdout/stderr is consumed line by
/// line.
pub struct ToolProcess {
    child: Child,
    lines: BoxStream<'static, std::io::Result<String>>,
}

impl std::fmt::Debug for ToolProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolProcess")
            .field("child", &self.child)
            .field("lines", &"<...>")
            .finish()
    }
}

impl ToolProcess {
    pub(crate) fn new(mut child: Child) -> Self {
        let lines = merge_output_streams(&mut child);
        ToolProcess { child, lines }
    }

    /// The next output line, in arrival order. Returns `None` once both
    /// output pipes are closed.
    pub async fn next_line(&mut self) -> Option<Result<String, Error>> {
        self.lines
            .next()
            .await
            .map(|line| line.map_err(Error::SubprocessIo))
    }

    /// Drains any remaining output, then reaps the process.
    pub async fn wait(&mut self) -> Result<ExitStatus, Error> {
        while let Some(line) = self.lines.next().await {
            line.map_err(Error::SubprocessIo)?;
        }
        self.child
            .wait()
            .await
            .map(ExitStatus::from)
            .map_err(Error::SubprocessStatus)
    }

    #[tracing::instrument(level = "debug", skip_all, fields(pid = self.child.id(), grace_period_secs = grace_period.as_secs_f64()))]
    pub async fn terminate(&mut self, grace_period: Duration) -> Result<(), Error> {
        tracing::debug!("trying to terminate gracefully");
        ask_to_terminate(&mut self.child)?;
        match tokio::time::timeout(grace_period, self.child.wait()).await {
            Ok(result) => {
                tracing::debug!("process terminated before timeout");
                result.map_err(Error::SubprocessStatus)?;
            }
            Err(_) => {
                tracing::debug!("process did not terminate before timeout, killing it instead");
                self.child
                    .kill()
                    .await
                    .map_err(Error::SubprocessTerminate)?;
            }
        };
        Ok(())
    }
}
