use anyhow::{Context, Result};
use tera::{Context as TeraContext, Tera};

use crate::export::ExportFormat;

use super::state::ServerState;

const INDEX_TEMPLATE: &str = include_str!("templates/index.html.tera");

pub(crate) fn render_index(state: &ServerState) -> Result<String> {
    let limits = state.uploads.limits();
    let mut context = TeraContext::new();
    context.insert("title", "FORSETE");
    context.insert("accept", &limits.allowed.join(","));
    context.insert("max_upload_bytes", &limits.max_bytes);
    context.insert("artifact_kind", &state.settings.artifact_kind.to_string());
    context.insert(
        "export_formats",
        &ExportFormat::all()
            .iter()
            .map(|format| format.as_str())
            .collect::<Vec<_>>(),
    );
    Tera::one_off(INDEX_TEMPLATE, &context, false).with_context(|| "failed to render index page")
}
