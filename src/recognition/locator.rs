use anyhow::anyhow;
use serde::Serialize;
use std::ffi::{OsStr, OsString};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Output flavour the recognition tool writes for each image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    #[default]
    Text,
    Json,
}

impl ArtifactKind {
    pub fn extension(self) -> &'static str {
        match self {
            ArtifactKind::Text => "txt",
            ArtifactKind::Json => "json",
        }
    }
}

impl FromStr for ArtifactKind {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "txt" | "text" => Ok(ArtifactKind::Text),
            "json" => Ok(ArtifactKind::Json),
            other => Err(anyhow!(
                "unsupported artifact kind '{}' (expected txt or json)",
                other
            )),
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Where the recognition tool is expected to leave the artifact for one
/// image: `<root>/<parent-basename>/<stem>.<ext>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactLocator {
    pub root: PathBuf,
    /// Base name of the image's parent directory. `None` when the image
    /// sits at a bare name, the filesystem root, or under `.`/`..`.
    pub directory: Option<OsString>,
    pub stem: OsString,
    pub kind: ArtifactKind,
}

impl ArtifactLocator {
    /// Returns `None` when `image_path` has no file name to take a stem from.
    pub fn derive(image_path: &Path, root: &Path, kind: ArtifactKind) -> Option<Self> {
        let stem = image_path.file_stem()?.to_os_string();
        let directory = image_path
            .parent()
            .and_then(Path::file_name)
            .map(OsStr::to_os_string);
        Some(Self {
            root: root.to_path_buf(),
            directory,
            stem,
            kind,
        })
    }

    pub fn path(&self) -> PathBuf {
        let mut file_name = self.stem.clone();
        file_name.push(".");
        file_name.push(self.kind.extension());

        let mut path = self.root.clone();
        if let Some(directory) = &self.directory {
            path.push(directory);
        }
        path.push(file_name);
        path
    }
}
