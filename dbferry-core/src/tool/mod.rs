use serde::{Deserialize, Serialize};
use std::{
    ffi::OsStr,
    io,
    path::{Path, PathBuf},
    process::Stdio,
};
use tokio::process::Command;

pub use process::{ExitStatus, ToolProcess};

mod process;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("external tool '{}' not found on the search path", .0.display())]
    NotFound(PathBuf),
    #[error("failed to start external tool '{}'", .0.display())]
    FailedToStart(PathBuf, #[source] io::Error),
    #[error("error reading from subprocess output")]
    SubprocessIo(#[source] io::Error),
    #[error("error getting subprocess status")]
    SubprocessStatus(#[source] io::Error),
    #[error("error terminating subprocess")]
    SubprocessTerminate(#[source] io::Error),
}

/// Program paths for the external database tools. The defaults assume the
/// stock MongoDB database tools on the search path; `ping` is optional and
/// only used for the pre-flight connectivity check.
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Tools {
    pub dump: PathBuf,
    pub convert: PathBuf,
    pub load: PathBuf,
    pub restore: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ping: Option<PathBuf>,
}

impl Default for Tools {
    fn default() -> Self {
        Tools {
            dump: PathBuf::from("mongodump"),
            convert: PathBuf::from("bsondump"),
            load: PathBuf::from("mongoimport"),
            restore: PathBuf::from("mongorestore"),
            ping: None,
        }
    }
}

/// Starts `program` with `args` passed as an argument vector, never through a
/// shell. Stdout and stderr are captured; stdin is closed.
pub fn spawn(program: &Path, args: &[impl AsRef<OsStr>]) -> Result<ToolProcess, Error> {
    let mut cmd = Command::new(program);
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        // kill-on-drop is a final fallback, normally the process gets terminated gracefully
        .kill_on_drop(true);
    for arg in args {
        cmd.arg(arg.as_ref());
    }

    let child = cmd.spawn().map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => Error::NotFound(program.to_owned()),
        _ => Error::FailedToStart(program.to_owned(), e),
    })?;
    Ok(ToolProcess::new(child))
}
