//! The body of the fake external tool. It impersonates whatever tool it is
//! configured as by reading directive files from the directory it was copied
//! into: `stdout`/`stderr` are replayed verbatim, `exit-status` sets the exit
//! code, `sleep-ms` delays completion, `fail-if-arg` forces a failure for
//! matching invocations, and `touch` creates files standing in for tool
//! output (see `touch_output_files`).

use std::{
    error::Error,
    fs::{File, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};

fn write_args(workdir: &Path) -> std::io::Result<()> {
    let mut file = File::create(workdir.join("args"))?;
    for arg in std::env::args().skip(1) {
        file.write_all(arg.as_bytes())?;
        file.write_all(b"\n")?;
    }
    Ok(())
}

fn append_invocation(workdir: &Path) -> std::io::Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(workdir.join("invocations"))?;
    let line = std::env::args().skip(1).collect::<Vec<_>>().join("\t");
    writeln!(file, "{}", line)
}

/// Each manifest line is `<option>:<relative-path>`: for every `--name=value`
/// argument whose name equals the option, `relative-path` is created (empty)
/// beneath the value; with an empty relative path the value itself is created
/// as a file. This lets one manifest cover a dump run
/// (`--out:<db>/<file>`) and a conversion run (`--outFile:`) alike.
fn touch_output_files(workdir: &Path) -> std::io::Result<()> {
    let manifest = match std::fs::read_to_string(workdir.join("touch")) {
        Ok(manifest) => manifest,
        Err(_) => return Ok(()),
    };
    let args: Vec<String> = std::env::args().skip(1).collect();
    for line in manifest.lines().filter(|l| !l.trim().is_empty()) {
        let Some((option, relative)) = line.split_once(':') else {
            continue;
        };
        for arg in &args {
            let Some((name, value)) = arg.split_once('=') else {
                continue;
            };
            if name != option {
                continue;
            }
            let path = if relative.is_empty() {
                PathBuf::from(value)
            } else {
                Path::new(value).join(relative)
            };
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&path, b"")?;
        }
    }
    Ok(())
}

fn copy_stdout(workdir: &Path) -> std::io::Result<()> {
    let mut file = File::open(workdir.join("stdout"))?;
    std::io::copy(&mut file, &mut std::io::stdout())?;
    Ok(())
}

fn copy_stderr(workdir: &Path) -> std::io::Result<()> {
    let mut file = File::open(workdir.join("stderr"))?;
    std::io::copy(&mut file, &mut std::io::stderr())?;
    Ok(())
}

fn sleep_if_configured(workdir: &Path) {
    if let Ok(contents) = std::fs::read_to_string(workdir.join("sleep-ms")) {
        if let Ok(millis) = contents.trim().parse() {
            std::thread::sleep(std::time::Duration::from_millis(millis));
        }
    }
}

fn should_fail_for_args(workdir: &Path) -> bool {
    match std::fs::read_to_string(workdir.join("fail-if-arg")) {
        Ok(needle) => {
            let needle = needle.trim();
            !needle.is_empty() && std::env::args().skip(1).any(|arg| arg.contains(needle))
        }
        Err(_) => false,
    }
}

fn get_exit_status(workdir: &Path) -> Result<i32, Box<dyn Error>> {
    let exit_status = std::fs::read_to_string(workdir.join("exit-status"))?
        .trim()
        .parse()?;
    Ok(exit_status)
}

pub fn test_binary_main() {
    let workdir = std::env::current_exe()
        .unwrap()
        .parent()
        .unwrap()
        .to_owned();
    let _ = write_args(&workdir);
    let _ = append_invocation(&workdir);
    let _ = touch_output_files(&workdir);
    let _ = copy_stdout(&workdir);
    let _ = copy_stderr(&workdir);
    sleep_if_configured(&workdir);

    if should_fail_for_args(&workdir) {
        std::process::exit(1);
    }
    let exit_status = get_exit_status(&workdir).unwrap_or(0);
    std::process::exit(exit_status);
}
