use anyhow::Result;
use std::sync::Arc;

use crate::export::pdf::PdfExporter;
use crate::recognition::{ProcessRunner, RecognitionAdapter, SystemRunner};
use crate::settings::Settings;
use crate::upload::UploadStore;

pub(crate) type SharedRunner = Arc<dyn ProcessRunner>;

pub(crate) struct ServerState {
    pub(crate) settings: Settings,
    pub(crate) adapter: RecognitionAdapter<SharedRunner>,
    pub(crate) uploads: UploadStore,
    pub(crate) pdf: PdfExporter,
}

impl ServerState {
    pub(crate) fn from_settings(settings: Settings) -> Result<Self> {
        Self::with_runner(settings, Arc::new(SystemRunner))
    }

    pub(crate) fn with_runner(settings: Settings, runner: SharedRunner) -> Result<Self> {
        let adapter = RecognitionAdapter::with_runner(settings.recognizer_config(), runner);
        let uploads = UploadStore::new(settings.upload_root.clone(), settings.upload_limits());
        let pdf = PdfExporter::new(settings.pdf_options()?);
        Ok(Self {
            settings,
            adapter,
            uploads,
            pdf,
        })
    }
}
