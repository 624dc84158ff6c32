use crate::{
    config::{DatabaseName, Endpoint},
    tool::{self, ExitStatus, Tools},
};
use serde::{Deserialize, Serialize};
use std::{
    io,
    path::{Path, PathBuf},
};

/// Source and destination of one migration run.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Plan {
    pub source: Endpoint,
    pub destination: Endpoint,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("can't reach the {role} endpoint (database '{database}')")]
    Connect { role: &'static str, database: String },
    #[error(transparent)]
    Tool(#[from] tool::Error),
    #[error("stage '{stage}' failed: {}", .status.message())]
    Stage { stage: Stage, status: ExitStatus },
    #[error("stage '{stage}' failed for {failed} of {total} data units")]
    StageAggregate {
        stage: Stage,
        failed: usize,
        total: usize,
    },
    #[error("Cancelled by user")]
    Cancelled,
    #[error("i/o error in the working area")]
    Workdir(#[source] io::Error),
    #[error("error packing or unpacking the archive")]
    Archive(#[source] io::Error),
}

/// Coarse classification of a failed run, stable enough for callers to
/// branch on (a cancelled job differs from a failed one only by its kind).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    Connect,
    ToolNotFound,
    Launch,
    Stage,
    Cancelled,
    Internal,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Connect { .. } => ErrorKind::Connect,
            Error::Tool(tool::Error::NotFound(_)) => ErrorKind::ToolNotFound,
            Error::Tool(tool::Error::FailedToStart(..)) => ErrorKind::Launch,
            Error::Tool(_) => ErrorKind::Internal,
            Error::Stage { .. } | Error::StageAggregate { .. } => ErrorKind::Stage,
            Error::Cancelled => ErrorKind::Cancelled,
            Error::Workdir(_) | Error::Archive(_) => ErrorKind::Internal,
        }
    }
}

/// What happens when a sub-unit of a multi-unit stage fails.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    /// The first failing sub-unit stops the pipeline immediately.
    #[default]
    AbortOnFirstFailure,
    /// Every sub-unit runs to completion; the stage fails afterwards with the
    /// collected failure count.
    ContinueAndAggregate,
}

/// One external tool run: a program path and its argument vector.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Invocation {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl Invocation {
    pub fn spawn(&self) -> Result<tool::ToolProcess, tool::Error> {
        tool::spawn(&self.program, &self.args)
    }
}

#[derive(Debug, PartialEq, Eq, Hash, Copy, Clone)]
pub enum Stage {
    Dump,
    Convert,
    Load,
    RestoreMetadata,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl Stage {
    pub const ALL: [Stage; 4] = [
        Stage::Dump,
        Stage::Convert,
        Stage::Load,
        Stage::RestoreMetadata,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Stage::Dump => "dump",
            Stage::Convert => "convert",
            Stage::Load => "load",
            Stage::RestoreMetadata => "restore-metadata",
        }
    }

    /// The log line announcing the stage.
    pub fn marker(&self) -> &'static str {
        match self {
            Stage::Dump => "[1/4] Dumping from source...",
            Stage::Convert => "[2/4] Converting BSON to JSON...",
            Stage::Load => "[3/4] Importing data...",
            Stage::RestoreMetadata => "[4/4] Restoring indexes...",
        }
    }

    /// Progress checkpoint reported when the stage starts; completion of the
    /// whole pipeline reports 100.
    pub fn milestone(&self) -> u8 {
        match self {
            Stage::Dump => 10,
            Stage::Convert => 35,
            Stage::Load => 60,
            Stage::RestoreMetadata => 85,
        }
    }

    /// The tool runs this stage needs, one per sub-unit, in deterministic
    /// (name-sorted) order. Multi-unit stages enumerate the dump output on
    /// disk and may legitimately yield nothing.
    pub fn invocations(
        &self,
        tools: &Tools,
        plan: &Plan,
        workdir: &Path,
    ) -> Result<Vec<Invocation>, Error> {
        match self {
            Stage::Dump => Ok(vec![dump_invocation(tools, &plan.source, workdir)]),
            Stage::Convert => {
                let units = data_units(&dump_dir(plan, workdir), "bson")?;
                Ok(units
                    .into_iter()
                    .map(|bson| Invocation {
                        program: tools.convert.clone(),
                        args: vec![
                            format!("--outFile={}", bson.with_extension("json").display()),
                            bson.display().to_string(),
                        ],
                    })
                    .collect())
            }
            Stage::Load => {
                let units = data_units(&dump_dir(plan, workdir), "json")?;
                Ok(units
                    .into_iter()
                    .filter(|json| !has_metadata_suffix(json))
                    .filter_map(|json| {
                        let collection = json.file_stem()?.to_string_lossy().into_owned();
                        Some(Invocation {
                            program: tools.load.clone(),
                            args: vec![
                                format!("--uri={}", plan.destination.locator.0),
                                format!("--db={}", plan.destination.database.0),
                                format!("--collection={}", collection),
                                "--mode=upsert".to_owned(),
                                "--drop".to_owned(),
                                format!("--file={}", json.display()),
                            ],
                        })
                    })
                    .collect())
            }
            Stage::RestoreMetadata => Ok(vec![restore_invocation(
                tools,
                Some(&plan.source.database),
                &plan.destination,
                workdir,
            )]),
        }
    }
}

pub(crate) fn dump_invocation(tools: &Tools, source: &Endpoint, out: &Path) -> Invocation {
    Invocation {
        program: tools.dump.clone(),
        args: vec![
            format!("--uri={}", source.locator.0),
            format!("--db={}", source.database.0),
            format!("--out={}", out.display()),
        ],
    }
}

/// Without `ns_from` the restore relies on the dump tree's own namespace,
/// remapping every database in it to the destination name.
pub(crate) fn restore_invocation(
    tools: &Tools,
    ns_from: Option<&DatabaseName>,
    destination: &Endpoint,
    dir: &Path,
) -> Invocation {
    let mut args = vec![format!("--uri={}", destination.locator.0)];
    if let Some(ns_from) = ns_from {
        args.push(format!("--nsFrom={}.*", ns_from.0));
    }
    args.push(format!("--nsTo={}.*", destination.database.0));
    args.push(dir.display().to_string());
    Invocation {
        program: tools.restore.clone(),
        args,
    }
}

/// The connectivity probe for one endpoint, when a ping tool is configured.
pub fn ping_invocation(tools: &Tools, endpoint: &Endpoint) -> Option<Invocation> {
    tools.ping.as_ref().map(|program| Invocation {
        program: program.clone(),
        args: vec![
            endpoint.locator.0.clone(),
            "--quiet".to_owned(),
            "--eval".to_owned(),
            "db.runCommand({ ping: 1 })".to_owned(),
        ],
    })
}

fn dump_dir(plan: &Plan, workdir: &Path) -> PathBuf {
    workdir.join(&plan.source.database.0)
}

fn has_metadata_suffix(path: &Path) -> bool {
    path.file_name()
        .map(|name| name.to_string_lossy().ends_with(".metadata.json"))
        .unwrap_or(false)
}

fn data_units(dir: &Path, extension: &str) -> Result<Vec<PathBuf>, Error> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        // a dump can legitimately produce no data units
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(Error::Workdir(e)),
    };
    let mut units = Vec::new();
    for entry in entries {
        let path = entry.map_err(Error::Workdir)?.path();
        if path.extension().map(|e| e == extension).unwrap_or(false) {
            units.push(path);
        }
    }
    units.sort();
    Ok(units)
}
