//! ForgePress Core - Publication Production Compiler
//!
//! # The Five Laws (Non-Negotiable)
//! 1. Chapter Order Is Truth
//! 2. Destinations Are Contracts
//! 3. Validation Gates Submission
//! 4. Artifacts Are Superseded, Never Mutated
//! 5. Collaborators Suggest, Engine Enforces

pub mod manuscript;
pub mod image;
pub mod artifact;
pub mod packaging;
pub mod epub;
pub mod print;
pub mod destinations;
pub mod validation;
pub mod collaborators;
pub mod retry;
pub mod events;
pub mod phases;
pub mod project;
pub mod pipeline;
pub mod config;
pub mod hashing;
pub mod telemetry;

pub use manuscript::{Chapter, ManuscriptError, PublicationMetadata};
pub use artifact::{ArtifactDescriptor, EpubVersion, InspectError, OutputFormat, PackagedArtifact, PrintDocument, PrintHints, ReflowableDocument};
pub use packaging::{CoverMode, PackagingEngine, PackagingError};
pub use print::{ColorProfile, PrintSpec, TrimSize};
pub use destinations::{Destination, DestinationRequirements};
pub use validation::{Diagnostic, Severity, ValidationRule, ValidationVerdict, Validator};
pub use collaborators::{CollaboratorError, IsbnPair};
pub use retry::RetryConfig;
pub use events::{EventSink, PipelineEvent};
pub use phases::{PhaseKind, PhaseStatus, PipelineDefinition};
pub use project::{ProjectStatus, PublishRequest, PublishingProject};
pub use pipeline::{PhaseError, PublishFailure, PublishingPipeline};
pub use config::{ConfigError, PipelineConfig};
pub use hashing::{checksum, Fingerprint};

pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");
