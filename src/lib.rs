pub mod export;
pub mod logging;
mod paths;
pub mod recognition;
pub mod server;
pub mod settings;
pub mod upload;

pub use export::{ExportFormat, ExportedFile};
pub use recognition::{
    ArtifactKind, ArtifactLocator, RecognitionAdapter, RecognitionError, RecognitionRequest,
    RecognitionResult, RecognizerConfig,
};
pub use settings::Settings;
pub use upload::{StoredUpload, UploadError, UploadStore};
