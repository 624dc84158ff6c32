use std::path::{Path, PathBuf};

mod test_binary;
pub use test_binary::test_binary_main;

fn target_dir() -> PathBuf {
    std::env::current_exe()
        .ok()
        .map(|mut path| {
            path.pop();
            if path.ends_with("deps") {
                path.pop();
            }
            path
        })
        .unwrap()
}

fn exe_name(name: &str) -> String {
    format!("{}{}", name, std::env::consts::EXE_SUFFIX)
}

fn cargo_bin(name: &str) -> PathBuf {
    target_dir().join(exe_name(name))
}

/// A scratch directory holding a private copy of the fake tool binary plus
/// its directive files. Everything the binary records (`args`, `invocations`,
/// `env`) lands in here too.
pub struct Workdir {
    dir: tempfile::TempDir,
}

impl Workdir {
    const TEST_BINARY_NAME: &'static str = "test-binary";

    pub fn new() -> Self {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::copy(
            cargo_bin("integration-tests"),
            dir.path().join(exe_name(Self::TEST_BINARY_NAME)),
        )
        .unwrap();
        Self { dir }
    }

    pub fn with_exit_status(self, exit_status: i32) -> Self {
        std::fs::write(self.path().join("exit-status"), exit_status.to_string()).unwrap();
        self
    }

    pub fn with_stdout(self, stdout: impl AsRef<[u8]>) -> Self {
        std::fs::write(self.path().join("stdout"), stdout.as_ref()).unwrap();
        self
    }

    pub fn with_stderr(self, stderr: impl AsRef<[u8]>) -> Self {
        std::fs::write(self.path().join("stderr"), stderr.as_ref()).unwrap();
        self
    }

    pub fn with_sleep_ms(self, millis: u64) -> Self {
        std::fs::write(self.path().join("sleep-ms"), millis.to_string()).unwrap();
        self
    }

    pub fn with_fail_if_arg(self, needle: &str) -> Self {
        std::fs::write(self.path().join("fail-if-arg"), needle).unwrap();
        self
    }

    pub fn with_touch(self, manifest: &[&str]) -> Self {
        std::fs::write(self.path().join("touch"), manifest.join("\n")).unwrap();
        self
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn bin(&self) -> PathBuf {
        self.dir.path().join(exe_name(Self::TEST_BINARY_NAME))
    }

    pub fn args(&self) -> Args {
        Args::parse(&self.path().join("args")).unwrap()
    }

    /// All argument vectors recorded so far, one per run, in run order.
    pub fn invocations(&self) -> Vec<Vec<String>> {
        match std::fs::read_to_string(self.path().join("invocations")) {
            Ok(contents) => contents
                .lines()
                .map(|line| line.split('\t').map(|s| s.to_owned()).collect())
                .collect(),
            Err(_) => Vec::new(),
        }
    }

}

pub struct Args {
    args: Vec<String>,
}

impl Args {
    fn parse(args_file: &Path) -> std::io::Result<Args> {
        let args = std::fs::read_to_string(args_file)?
            .lines()
            .map(|s| s.to_owned())
            .collect();
        Ok(Args { args })
    }

    pub fn assert_args(&self, args: &[impl AsRef<str>]) -> &Self {
        let args = args.iter().map(|s| s.as_ref()).collect::<Vec<_>>();
        assert_eq!(&self.args, &args);
        self
    }

    pub fn get(&self) -> &[String] {
        &self.args
    }
}
