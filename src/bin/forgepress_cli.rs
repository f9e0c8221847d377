//! ForgePress CLI - Bridge interface for publishing tools
//!
//! Commands: destinations, package, validate, publish
//! Outputs JSON to stdout, logs to stderr
//! Returns 2 on validation failure, 1 on any other error

use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use forgepress_core::{
    collaborators::{InMemoryIdentifierPool, StaticCoverSource},
    telemetry::init_tracing,
    Chapter, ColorProfile, Destination, DestinationRequirements, OutputFormat, PackagedArtifact, PipelineConfig,
    PhaseError, PipelineEvent, PrintHints, PrintSpec, PublicationMetadata, PublishRequest, PublishingPipeline, TrimSize,
    Validator, ENGINE_VERSION,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "forgepress-cli")]
#[command(about = "ForgePress CLI - Publication Production Compiler")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to pipeline configuration (TOML)
    #[arg(short, long, default_value = "forgepress.toml")]
    config: PathBuf,

    /// Log level used when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// List destination requirements
    Destinations,

    /// Build one artifact from a manuscript
    Package {
        /// Manuscript JSON file
        #[arg(short, long)]
        manuscript: PathBuf,

        /// Output format (epub or pdf)
        #[arg(short, long)]
        format: OutputFormat,

        /// Cover image to embed
        #[arg(long)]
        cover: Option<PathBuf>,

        /// Trim size, overriding the manuscript's print settings
        #[arg(long)]
        trim: Option<TrimSize>,

        /// Include bleed, overriding the manuscript's print settings
        #[arg(long)]
        bleed: bool,

        /// Where to write the artifact
        #[arg(short, long)]
        out: PathBuf,
    },

    /// Validate an artifact against a destination
    Validate {
        /// Artifact file (EPUB or PDF)
        #[arg(short, long)]
        artifact: PathBuf,

        /// Destination id
        #[arg(short, long)]
        destination: String,

        /// Metadata JSON file to validate alongside the artifact
        #[arg(long)]
        metadata: Option<PathBuf>,

        /// The PDF was built with bleed
        #[arg(long)]
        bleed: bool,

        /// Color profile the PDF was prepared in
        #[arg(long, default_value = "GRAYSCALE")]
        color_profile: ColorProfile,
    },

    /// Run the full publishing pipeline with local collaborators
    Publish {
        /// Manuscript JSON file
        #[arg(short, long)]
        manuscript: PathBuf,

        /// File with one ISBN-13 per line
        #[arg(short, long)]
        identifiers: PathBuf,

        /// Cover image to embed at packaging time
        #[arg(long)]
        cover: Option<PathBuf>,

        /// Pre-made artwork served as the generated cover
        #[arg(long)]
        cover_art: Option<PathBuf>,

        /// Directory for the produced artifacts
        #[arg(short, long)]
        out_dir: PathBuf,
    },
}

/// Manuscript file layout. Destination ids are resolved leniently.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Manuscript {
    metadata: PublicationMetadata,
    chapters: Vec<Chapter>,
    #[serde(default)]
    formats: Vec<OutputFormat>,
    #[serde(default)]
    destinations: Vec<String>,
    #[serde(default)]
    print: PrintSpec,
    #[serde(default)]
    generate_cover: bool,
    #[serde(default)]
    genre: Option<String>,
    #[serde(default)]
    cover_style: Option<String>,
}

impl Manuscript {
    fn into_request(self) -> PublishRequest {
        let chapters = self
            .chapters
            .into_iter()
            .map(|c| Chapter::new(c.position, c.title, c.body))
            .collect();
        let destinations = self.destinations.iter().map(|id| Destination::lookup(id)).collect();
        PublishRequest {
            print: self.print,
            generate_cover: self.generate_cover,
            genre: self.genre,
            cover_style: self.cover_style,
            ..PublishRequest::new(chapters, self.metadata, self.formats, destinations)
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DestinationListing {
    engine_version: &'static str,
    destinations: Vec<DestinationRequirements>,
}

fn print_json(value: &impl Serialize, pretty: bool) {
    let rendered = if pretty { serde_json::to_string_pretty(value) } else { serde_json::to_string(value) };
    match rendered {
        Ok(s) => println!("{s}"),
        Err(e) => println!(r#"{{"error": "Serialization failed: {e}"}}"#),
    }
}

fn fail(message: impl std::fmt::Display) -> ExitCode {
    print_json(&serde_json::json!({ "success": false, "error": message.to_string() }), false);
    ExitCode::FAILURE
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, String> {
    let raw = std::fs::read_to_string(path).map_err(|e| format!("Failed to read {}: {e}", path.display()))?;
    serde_json::from_str(&raw).map_err(|e| format!("Invalid JSON in {}: {e}", path.display()))
}

fn read_bytes(path: &Path) -> Result<Vec<u8>, String> {
    std::fs::read(path).map_err(|e| format!("Failed to read {}: {e}", path.display()))
}

fn load_config(path: &Path) -> Result<PipelineConfig, String> {
    if !path.exists() {
        info!(path = %path.display(), "no config file; using defaults");
        return Ok(PipelineConfig::default());
    }
    PipelineConfig::load(path).map_err(|e| e.to_string())
}

fn slug(title: &str) -> String {
    let raw: String = title
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
        .collect();
    let joined = raw.split('-').filter(|s| !s.is_empty()).collect::<Vec<_>>().join("-");
    if joined.is_empty() { "book".into() } else { joined }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    let config = match load_config(&cli.config) {
        Ok(c) => c,
        Err(e) => return fail(e),
    };

    match cli.command {
        Commands::Destinations => {
            let listing = DestinationListing {
                engine_version: ENGINE_VERSION,
                destinations: Destination::ALL.iter().map(|d| d.requirements()).collect(),
            };
            print_json(&listing, true);
            ExitCode::SUCCESS
        }

        Commands::Package { manuscript, format, cover, trim, bleed, out } => {
            let manuscript: Manuscript = match read_json(&manuscript) {
                Ok(m) => m,
                Err(e) => return fail(e),
            };
            let cover = match cover.as_deref().map(read_bytes).transpose() {
                Ok(c) => c,
                Err(e) => return fail(e),
            };
            let request = manuscript.into_request();
            let print = PrintSpec {
                trim: trim.unwrap_or(request.print.trim),
                include_bleed: bleed || request.print.include_bleed,
                ..request.print
            };

            let engine = config.packaging_engine();
            let artifact = match engine.build(format, &request.chapters, &request.metadata, cover.as_deref(), &print) {
                Ok(a) => a,
                Err(e) => return fail(e),
            };
            if let Err(e) = std::fs::write(&out, artifact.binary()) {
                return fail(format!("Failed to write {}: {e}", out.display()));
            }

            print_json(&serde_json::json!({ "success": true, "path": out, "artifact": artifact }), true);
            ExitCode::SUCCESS
        }

        Commands::Validate { artifact, destination, metadata, bleed, color_profile } => {
            let binary = match read_bytes(&artifact) {
                Ok(b) => b,
                Err(e) => return fail(e),
            };
            let artifact = match PackagedArtifact::inspect(binary, PrintHints { bleed, color_profile }) {
                Ok(a) => a,
                Err(e) => return fail(e),
            };
            let destination = Destination::lookup(&destination);

            let validator = Validator::new();
            let verdict = match metadata {
                Some(path) => match read_json::<PublicationMetadata>(&path) {
                    Ok(meta) => validator.validate_with_metadata(&artifact, &meta, destination),
                    Err(e) => return fail(e),
                },
                None => validator.validate(&artifact, destination),
            };

            print_json(&verdict, true);
            if verdict.is_passing() {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(2)
            }
        }

        Commands::Publish { manuscript, identifiers, cover, cover_art, out_dir } => {
            let manuscript: Manuscript = match read_json(&manuscript) {
                Ok(m) => m,
                Err(e) => return fail(e),
            };
            let pool = match read_identifiers(&identifiers) {
                Ok(p) => p,
                Err(e) => return fail(e),
            };

            let mut request = manuscript.into_request();
            match cover.as_deref().map(read_bytes).transpose() {
                Ok(c) => request.cover_image = c,
                Err(e) => return fail(e),
            }

            let mut pipeline = PublishingPipeline::new(Arc::new(pool)).with_config(config);
            if let Some(path) = cover_art {
                match read_bytes(&path) {
                    Ok(art) => {
                        pipeline = pipeline.with_cover_source(Arc::new(StaticCoverSource::new(art)));
                        request.generate_cover = true;
                    }
                    Err(e) => return fail(e),
                }
            }

            let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
                Ok(rt) => rt,
                Err(e) => return fail(format!("Failed to start runtime: {e}")),
            };
            runtime.block_on(publish(pipeline, request, out_dir))
        }
    }
}

fn read_identifiers(path: &Path) -> Result<InMemoryIdentifierPool, String> {
    let raw = std::fs::read_to_string(path).map_err(|e| format!("Failed to read {}: {e}", path.display()))?;
    let lines = raw.lines().map(str::trim).filter(|l| !l.is_empty() && !l.starts_with('#'));
    InMemoryIdentifierPool::from_isbn13s(lines).map_err(|e| e.to_string())
}

async fn publish(pipeline: PublishingPipeline, request: PublishRequest, out_dir: PathBuf) -> ExitCode {
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<PipelineEvent>();
    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            print_json(&event, false);
        }
    });

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; cancelling publish");
            interrupt.cancel();
        }
    });

    let title = slug(&request.metadata.title);
    let outcome = pipeline.publish(request, &tx, &cancel).await;
    drop(tx);
    let _ = printer.await;

    let (project, code) = match outcome {
        Ok(project) => (project, ExitCode::SUCCESS),
        Err(failure) => {
            let code = match failure.error {
                PhaseError::ValidationFailed { .. } => ExitCode::from(2),
                _ => ExitCode::FAILURE,
            };
            (*failure.project, code)
        }
    };

    if let Err(e) = std::fs::create_dir_all(&out_dir) {
        return fail(format!("Failed to create {}: {e}", out_dir.display()));
    }
    for artifact in project.artifacts() {
        let path = out_dir.join(format!("{title}.{}", artifact.format().extension()));
        if let Err(e) = std::fs::write(&path, artifact.binary()) {
            return fail(format!("Failed to write {}: {e}", path.display()));
        }
        info!(path = %path.display(), bytes = artifact.byte_size(), "artifact written");
    }
    code
}
