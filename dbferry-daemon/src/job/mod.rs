use dbferry_core::{config::Endpoint, migrate};
use serde::Serialize;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Mutex, MutexGuard, PoisonError,
};
use time::{format_description::FormatItem, OffsetDateTime};
use tokio_util::sync::CancellationToken;

pub mod registry;
mod runner;

#[derive(Debug, PartialEq, Eq, Hash, Copy, Clone, Serialize)]
#[serde(transparent)]
pub struct Id(uuid::Uuid);

impl Default for Id {
    fn default() -> Self {
        Id(uuid::Uuid::new_v4())
    }
}

impl std::fmt::Display for Id {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl Id {
    pub fn new() -> Self {
        Default::default()
    }
}

#[derive(Debug, PartialEq, Eq, Hash, Copy, Clone, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl Status {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Status::Succeeded | Status::Failed)
    }
}

/// What went wrong, reduced to a stable kind plus a human-readable message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobError {
    pub kind: migrate::ErrorKind,
    pub message: String,
}

impl From<&migrate::Error> for JobError {
    fn from(error: &migrate::Error) -> Self {
        JobError {
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}

const LOG_TIME_FORMAT: &[FormatItem<'static>] =
    time::macros::format_description!("[hour]:[minute]:[second]");

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    pub timestamp: OffsetDateTime,
    pub message: String,
}

impl LogLine {
    fn new(message: String) -> Self {
        LogLine {
            timestamp: OffsetDateTime::now_utc(),
            message,
        }
    }

    pub fn render(&self) -> String {
        let timestamp = self
            .timestamp
            .format(LOG_TIME_FORMAT)
            .expect("hh:mm:ss formatting never fails");
        format!("[{}] {}", timestamp, self.message)
    }
}

/// Point-in-time copy of one job's public fields, for polling.
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub id: Id,
    pub status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JobError>,
    pub log: Vec<String>,
    pub progress: u8,
}

#[derive(Debug, Clone, Serialize)]
pub struct Summary {
    pub id: Id,
    pub status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JobError>,
}

#[derive(Debug)]
struct State {
    status: Status,
    log: Vec<LogLine>,
    progress: u8,
    error: Option<JobError>,
}

/// One tracked migration run. The registry hands out `Arc<Job>`s; the runner
/// task is the only writer of `state` apart from the cancellation log line.
#[derive(Debug)]
pub struct Job {
    pub id: Id,
    pub source: Endpoint,
    pub destination: Endpoint,
    created: OffsetDateTime,
    state: Mutex<State>,
    cancel: CancellationToken,
    started: AtomicBool,
}

impl Job {
    pub(crate) fn new(source: Endpoint, destination: Endpoint) -> Self {
        Job {
            id: Id::new(),
            source,
            destination,
            created: OffsetDateTime::now_utc(),
            state: Mutex::new(State {
                status: Status::Pending,
                log: Vec::new(),
                progress: 0,
                error: None,
            }),
            cancel: CancellationToken::new(),
            started: AtomicBool::new(false),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn status(&self) -> Status {
        self.state().status
    }

    pub(crate) fn created(&self) -> OffsetDateTime {
        self.created
    }

    /// True exactly once; the registry uses this to never spawn a second
    /// runner for the same job.
    pub(crate) fn mark_started(&self) -> bool {
        !self.started.swap(true, Ordering::SeqCst)
    }

    pub fn cancel_requested(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub(crate) fn request_cancel(&self) {
        self.cancel.cancel();
    }

    pub(crate) async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    pub(crate) fn append_log(&self, message: impl Into<String>) {
        self.state().log.push(LogLine::new(message.into()));
    }

    pub(crate) fn set_running(&self) {
        let mut state = self.state();
        if state.status == Status::Pending {
            state.status = Status::Running;
        }
    }

    pub(crate) fn set_progress(&self, progress: u8) {
        let mut state = self.state();
        state.progress = state.progress.max(progress.min(100));
    }

    pub(crate) fn finish_success(&self) {
        let mut state = self.state();
        state.progress = 100;
        state.status = Status::Succeeded;
    }

    pub(crate) fn finish_error(&self, error: JobError) {
        let mut state = self.state();
        state.status = Status::Failed;
        state.error = Some(error);
    }

    pub fn snapshot(&self) -> Snapshot {
        let state = self.state();
        Snapshot {
            id: self.id,
            status: state.status,
            error: state.error.clone(),
            log: state.log.iter().map(LogLine::render).collect(),
            progress: state.progress,
        }
    }

    pub fn summary(&self) -> Summary {
        let state = self.state();
        Summary {
            id: self.id,
            status: state.status,
            error: state.error.clone(),
        }
    }
}
