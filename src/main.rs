use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};

use forsete_htr::export::{self, ExportFormat, pdf::PdfExporter};
use forsete_htr::{ArtifactKind, RecognitionAdapter, RecognitionRequest, Settings};

#[derive(Parser, Debug)]
#[command(
    name = "forsete-htr",
    version,
    about = "Run a handwriting-recognition pipeline on uploaded images and export the result"
)]
struct Cli {
    /// Read extra settings from a local TOML file
    #[arg(short = 'r', long = "read-settings", global = true)]
    read_settings: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(long = "verbose", global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the recognition pipeline on an image and print the result
    Recognize {
        /// Image to recognize
        image: PathBuf,

        /// Artifact to read back (txt or json; default from settings)
        #[arg(short = 'k', long = "kind")]
        kind: Option<String>,
    },

    /// Print the artifact path the pipeline is expected to write for an image
    Locate {
        image: PathBuf,

        #[arg(short = 'k', long = "kind")]
        kind: Option<String>,
    },

    /// Export recognized text as json, plain_txt or plain_pdf
    Export {
        /// Recognized text or JSON file
        input: PathBuf,

        #[arg(short = 'f', long = "format", default_value = "plain_pdf")]
        format: String,

        /// Output file (pdf default from settings; other formats print to stdout)
        #[arg(short = 'o', long = "output")]
        output: Option<PathBuf>,
    },

    /// Serve the upload page and HTTP API
    Serve {
        /// Listen address (default from settings)
        #[arg(short = 'a', long = "addr")]
        addr: Option<String>,
    },

    /// Check that the recognition tool and its configuration are in place
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    forsete_htr::logging::init(cli.verbose)?;
    let settings = forsete_htr::settings::load_settings(cli.read_settings.as_deref())?;

    match cli.command {
        Commands::Recognize { image, kind } => recognize(&settings, image, kind.as_deref()),
        Commands::Locate { image, kind } => locate(&settings, &image, kind.as_deref()),
        Commands::Export {
            input,
            format,
            output,
        } => export_file(&settings, &input, &format, output.as_deref()),
        Commands::Serve { addr } => forsete_htr::server::run_server(settings, addr).await,
        Commands::Check => check(&settings),
    }
}

fn parse_kind(kind: Option<&str>) -> Result<Option<ArtifactKind>> {
    kind.map(str::parse::<ArtifactKind>).transpose()
}

fn recognize(settings: &Settings, image: PathBuf, kind: Option<&str>) -> Result<()> {
    if !image.is_file() {
        return Err(anyhow!("image does not exist: {}", image.display()));
    }
    let adapter = RecognitionAdapter::new(settings.recognizer_config());
    let mut request = RecognitionRequest::new(image);
    if let Some(kind) = parse_kind(kind)? {
        request = request.with_kind(kind);
    }
    let result = adapter
        .run(&request)
        .with_context(|| format!("recognition failed for {}", request.image_path.display()))?;
    let mut stdout = io::stdout().lock();
    stdout.write_all(result.content.as_bytes())?;
    stdout.flush()?;
    Ok(())
}

fn locate(settings: &Settings, image: &Path, kind: Option<&str>) -> Result<()> {
    let adapter = RecognitionAdapter::new(settings.recognizer_config());
    let locator = adapter.locate(image, parse_kind(kind)?)?;
    println!("{}", locator.path().display());
    Ok(())
}

fn export_file(settings: &Settings, input: &Path, format: &str, output: Option<&Path>) -> Result<()> {
    let format = format.parse::<ExportFormat>()?;
    let content = fs::read_to_string(input)
        .with_context(|| format!("failed to read input: {}", input.display()))?;
    let kind = match input.extension().and_then(|ext| ext.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("json") => ArtifactKind::Json,
        _ => ArtifactKind::Text,
    };
    let exporter = PdfExporter::new(settings.pdf_options()?);

    if format == ExportFormat::PlainPdf {
        let output = output.unwrap_or(settings.pdf_output.as_path());
        let written = exporter.write(&content, output)?;
        println!("{}", written.display());
        return Ok(());
    }

    let file = export::export(&content, kind, format, &exporter)?;
    match output {
        Some(path) => {
            fs::write(path, &file.bytes)
                .with_context(|| format!("failed to write output: {}", path.display()))?;
            println!("{}", path.display());
        }
        None => {
            let mut stdout = io::stdout().lock();
            stdout.write_all(&file.bytes)?;
            stdout.flush()?;
        }
    }
    Ok(())
}

fn check(settings: &Settings) -> Result<()> {
    let adapter = RecognitionAdapter::new(settings.recognizer_config());
    let config = adapter.config();
    let tool_ok = adapter.tool_available();
    let config_ok = config.pipeline_config.is_file();

    println!("tool:          {} ({})", config.tool.display(), status(tool_ok));
    println!(
        "config:        {} ({})",
        config.pipeline_config.display(),
        status(config_ok)
    );
    println!("output root:   {}", config.output_root.display());
    println!("artifact:      {}", config.artifact_kind);
    println!("upload root:   {}", settings.upload_root.display());

    if !tool_ok || !config_ok {
        return Err(anyhow!("recognition pipeline is not ready"));
    }
    Ok(())
}

fn status(ok: bool) -> &'static str {
    if ok { "found" } else { "missing" }
}
