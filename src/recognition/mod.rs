//! Invokes the external recognition pipeline for one image and reads back the
//! artifact it leaves under the output root.

mod locator;
mod process;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info, warn};

pub use locator::{ArtifactKind, ArtifactLocator};
pub use process::{PipelineCommand, ProcessOutput, ProcessRunner, SystemRunner};
pub(crate) use process::command_exists;

#[derive(Debug, Clone)]
pub struct RecognizerConfig {
    pub tool: PathBuf,
    pub pipeline_config: PathBuf,
    pub output_root: PathBuf,
    pub artifact_kind: ArtifactKind,
}

#[derive(Debug, Clone)]
pub struct RecognitionRequest {
    pub image_path: PathBuf,
    /// Overrides the configured artifact kind for this request.
    pub kind: Option<ArtifactKind>,
}

impl RecognitionRequest {
    pub fn new(image_path: impl Into<PathBuf>) -> Self {
        Self {
            image_path: image_path.into(),
            kind: None,
        }
    }

    pub fn with_kind(mut self, kind: ArtifactKind) -> Self {
        self.kind = Some(kind);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecognitionResult {
    pub artifact: PathBuf,
    pub kind: ArtifactKind,
    pub content: String,
}

impl RecognitionResult {
    pub fn into_content(self) -> String {
        self.content
    }
}

#[derive(Debug, Error)]
pub enum RecognitionError {
    #[error("image path has no file name: {}", path.display())]
    InvalidImagePath { path: PathBuf },
    #[error("failed to launch recognition tool '{}': {source}", program.display())]
    Launch {
        program: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("recognition tool exited with {}: {stderr}", describe_code(*code))]
    Process { code: Option<i32>, stderr: String },
    #[error("recognition result not found: {}", path.display())]
    ArtifactMissing { path: PathBuf },
    #[error("failed to read recognition result {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl RecognitionError {
    pub fn kind(&self) -> &'static str {
        match self {
            RecognitionError::InvalidImagePath { .. } => "invalid_image_path",
            RecognitionError::Launch { .. } => "launch_failure",
            RecognitionError::Process { .. } => "process_failure",
            RecognitionError::ArtifactMissing { .. } => "artifact_missing",
            RecognitionError::Io { .. } => "io_failure",
        }
    }
}

fn describe_code(code: Option<i32>) -> String {
    match code {
        Some(code) => format!("status {}", code),
        None => "no status (terminated by signal)".to_string(),
    }
}

/// Stateless between calls; each `run` spawns at most one process.
#[derive(Debug, Clone)]
pub struct RecognitionAdapter<R = SystemRunner> {
    config: RecognizerConfig,
    runner: R,
}

impl RecognitionAdapter<SystemRunner> {
    pub fn new(config: RecognizerConfig) -> Self {
        Self::with_runner(config, SystemRunner)
    }
}

impl<R: ProcessRunner> RecognitionAdapter<R> {
    pub fn with_runner(config: RecognizerConfig, runner: R) -> Self {
        Self { config, runner }
    }

    pub fn config(&self) -> &RecognizerConfig {
        &self.config
    }

    pub fn locate(
        &self,
        image_path: &Path,
        kind: Option<ArtifactKind>,
    ) -> Result<ArtifactLocator, RecognitionError> {
        let kind = kind.unwrap_or(self.config.artifact_kind);
        ArtifactLocator::derive(image_path, &self.config.output_root, kind).ok_or_else(|| {
            RecognitionError::InvalidImagePath {
                path: image_path.to_path_buf(),
            }
        })
    }

    pub fn command_for(&self, image_path: &Path) -> PipelineCommand {
        PipelineCommand::pipeline(&self.config.tool, &self.config.pipeline_config, image_path)
    }

    pub fn tool_available(&self) -> bool {
        command_exists(&self.config.tool)
    }

    pub fn run(&self, request: &RecognitionRequest) -> Result<RecognitionResult, RecognitionError> {
        let locator = self.locate(&request.image_path, request.kind)?;
        let command = self.command_for(&request.image_path);

        info!("running recognition for {}", request.image_path.display());
        debug!("command: {}", command);
        let output = self
            .runner
            .run(&command)
            .map_err(|source| RecognitionError::Launch {
                program: command.program.clone(),
                source,
            })?;
        if !output.stdout.is_empty() {
            debug!("tool stdout: {}", String::from_utf8_lossy(&output.stdout).trim());
        }
        if !output.success() {
            let stderr = output.stderr_text();
            warn!(
                "recognition tool failed for {} ({}): {}",
                request.image_path.display(),
                describe_code(output.code),
                stderr
            );
            return Err(RecognitionError::Process {
                code: output.code,
                stderr,
            });
        }

        let artifact = locator.path();
        let content = match fs::read_to_string(&artifact) {
            Ok(content) => content,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                warn!("recognition result missing at {}", artifact.display());
                return Err(RecognitionError::ArtifactMissing { path: artifact });
            }
            Err(source) => {
                return Err(RecognitionError::Io {
                    path: artifact,
                    source,
                });
            }
        };
        info!(
            "read {} bytes from {}",
            content.len(),
            artifact.display()
        );
        Ok(RecognitionResult {
            artifact,
            kind: locator.kind,
            content,
        })
    }
}
