//! Synchronous single-shot export and import. Both run the external tools in
//! the caller's own task: no job, no cancellation, no progress reporting.

use crate::{
    config::Endpoint,
    migrate::{self, Invocation, Stage},
    tool::Tools,
};
use std::{
    fs::File,
    io,
    path::{Path, PathBuf},
};
use zip::{write::FileOptions, ZipArchive, ZipWriter};

/// Dumps `source` into a scoped working directory and packs the dump tree
/// into a zip archive at `archive`.
#[tracing::instrument(skip_all, fields(database = %source.database))]
pub async fn export_database(
    tools: &Tools,
    source: &Endpoint,
    archive: &Path,
) -> Result<(), migrate::Error> {
    let workdir = tempfile::Builder::new()
        .prefix("dbferry-export-")
        .tempdir()
        .map_err(migrate::Error::Workdir)?;

    let invocation = migrate::dump_invocation(tools, source, workdir.path());
    run_logged(&invocation, Stage::Dump).await?;

    pack_archive(workdir.path(), archive)?;
    tracing::info!(archive = %archive.display(), "export finished");
    Ok(())
}

/// Unpacks a dump archive into a scoped working directory and restores it
/// under the destination's database name.
#[tracing::instrument(skip_all, fields(database = %destination.database))]
pub async fn import_database(
    tools: &Tools,
    archive: &Path,
    destination: &Endpoint,
) -> Result<(), migrate::Error> {
    let workdir = tempfile::Builder::new()
        .prefix("dbferry-import-")
        .tempdir()
        .map_err(migrate::Error::Workdir)?;

    unpack_archive(archive, workdir.path())?;

    // the dump tree is directly loadable, so the restore tool covers both
    // the load and the metadata remap in one run
    let invocation = migrate::restore_invocation(tools, None, destination, workdir.path());
    run_logged(&invocation, Stage::RestoreMetadata).await?;
    tracing::info!("import finished");
    Ok(())
}

async fn run_logged(invocation: &Invocation, stage: Stage) -> Result<(), migrate::Error> {
    let mut process = invocation.spawn()?;
    while let Some(line) = process.next_line().await {
        tracing::info!("{}", line?);
    }
    let status = process.wait().await?;
    if !status.success() {
        return Err(migrate::Error::Stage { stage, status });
    }
    Ok(())
}

fn zip_error(e: zip::result::ZipError) -> migrate::Error {
    migrate::Error::Archive(io::Error::new(io::ErrorKind::Other, e))
}

fn pack_archive(dir: &Path, archive: &Path) -> Result<(), migrate::Error> {
    let file = File::create(archive).map_err(migrate::Error::Archive)?;
    let mut zip = ZipWriter::new(file);
    let mut pending = vec![dir.to_owned()];
    while let Some(current) = pending.pop() {
        for entry in sorted_entries(&current)? {
            if entry.is_dir() {
                pending.push(entry);
                continue;
            }
            zip.start_file(archive_name(dir, &entry), FileOptions::default())
                .map_err(zip_error)?;
            let mut contents = File::open(&entry).map_err(migrate::Error::Archive)?;
            io::copy(&mut contents, &mut zip).map_err(migrate::Error::Archive)?;
        }
    }
    zip.finish().map_err(zip_error)?;
    Ok(())
}

fn unpack_archive(archive: &Path, dir: &Path) -> Result<(), migrate::Error> {
    let file = File::open(archive).map_err(migrate::Error::Archive)?;
    let mut zip = ZipArchive::new(file).map_err(zip_error)?;
    zip.extract(dir).map_err(zip_error)?;
    Ok(())
}

fn sorted_entries(dir: &Path) -> Result<Vec<PathBuf>, migrate::Error> {
    let mut entries = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(migrate::Error::Archive)? {
        entries.push(entry.map_err(migrate::Error::Archive)?.path());
    }
    entries.sort();
    Ok(entries)
}

fn archive_name(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
