use std::env;
use std::ffi::OsString;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

/// A fully-formed invocation of the recognition tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineCommand {
    pub program: PathBuf,
    pub args: Vec<OsString>,
}

impl PipelineCommand {
    /// `<tool> pipeline <config> <image>`
    pub fn pipeline(tool: &Path, config: &Path, image: &Path) -> Self {
        Self {
            program: tool.to_path_buf(),
            args: vec![
                OsString::from("pipeline"),
                config.as_os_str().to_os_string(),
                image.as_os_str().to_os_string(),
            ],
        }
    }

    pub fn to_command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.args);
        command
    }
}

impl fmt::Display for PipelineCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {}", arg.to_string_lossy())?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct ProcessOutput {
    /// Exit code; `None` when the process was terminated by a signal.
    pub code: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    pub fn stderr_text(&self) -> String {
        String::from_utf8_lossy(&self.stderr).trim().to_string()
    }
}

/// Runs a command to completion. An `Err` means the command could not be
/// started at all; a started command always yields a `ProcessOutput`.
pub trait ProcessRunner: Send + Sync {
    fn run(&self, command: &PipelineCommand) -> io::Result<ProcessOutput>;
}

impl<T: ProcessRunner + ?Sized> ProcessRunner for Arc<T> {
    fn run(&self, command: &PipelineCommand) -> io::Result<ProcessOutput> {
        (**self).run(command)
    }
}

/// Spawns real child processes and waits for them.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl ProcessRunner for SystemRunner {
    fn run(&self, command: &PipelineCommand) -> io::Result<ProcessOutput> {
        let output = command.to_command().output()?;
        Ok(ProcessOutput {
            code: output.status.code(),
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }
}

pub(crate) fn command_exists(cmd: &Path) -> bool {
    if cmd.components().count() > 1 {
        return is_executable(cmd);
    }

    let path_var = match env::var_os("PATH") {
        Some(value) => value,
        None => return false,
    };

    #[cfg(windows)]
    let candidates = windows_command_candidates(cmd);
    #[cfg(not(windows))]
    let candidates = vec![cmd.as_os_str().to_os_string()];

    for dir in env::split_paths(&path_var) {
        for candidate in &candidates {
            if is_executable(&dir.join(candidate)) {
                return true;
            }
        }
    }
    false
}

fn is_executable(path: &Path) -> bool {
    let metadata = match fs::metadata(path) {
        Ok(value) => value,
        Err(_) => return false,
    };
    if !metadata.is_file() {
        return false;
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        metadata.permissions().mode() & 0o111 != 0
    }
    #[cfg(not(unix))]
    {
        true
    }
}

#[cfg(windows)]
fn windows_command_candidates(cmd: &Path) -> Vec<OsString> {
    if cmd.extension().is_some() {
        return vec![cmd.as_os_str().to_os_string()];
    }
    let pathext = env::var("PATHEXT").unwrap_or_else(|_| ".EXE;.BAT;.CMD".to_string());
    let mut candidates = vec![cmd.as_os_str().to_os_string()];
    for ext in pathext.split(';').filter(|ext| !ext.is_empty()) {
        let mut candidate = cmd.as_os_str().to_os_string();
        candidate.push(ext.to_lowercase());
        candidates.push(candidate);
    }
    candidates
}
