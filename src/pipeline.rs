//! Publishing Pipeline - Single Entry Point
//!
//! `publish` runs every phase of the definition in order. Validation always
//! runs before submission and a failing verdict aborts the call; there is no
//! path from packaging to a destination that skips it.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::artifact::{OutputFormat, PackagedArtifact};
use crate::collaborators::{
    CollaboratorError, CoverSource, DedupMetadataOptimizer, DestinationAdapter, IdentifierSource,
    ManualDestinationAdapter, MetadataOptimizer, PreparedRegistration, RegistrationService, SubmissionStatus,
};
use crate::config::PipelineConfig;
use crate::destinations::Destination;
use crate::events::{EventSink, PipelineEvent};
use crate::manuscript::{Chapter, PublicationMetadata};
use crate::packaging::{PackagingEngine, PackagingError};
use crate::phases::{PhaseKind, PhaseRecord, PipelineDefinition};
use crate::print::PrintSpec;
use crate::project::{AssignedIdentifier, CostFlags, PublishRequest, PublishingProject, SubmissionResult};
use crate::retry::with_retry;
use crate::validation::{Severity, ValidationVerdict, Validator};

#[derive(Debug, Error)]
pub enum PhaseError {
    #[error("Collaborator error: {0}")]
    Collaborator(CollaboratorError),

    #[error("Packaging failed: {0}")]
    Packaging(#[from] PackagingError),

    #[error("Packaging task failed: {0}")]
    Task(String),

    #[error("No output formats requested")]
    NothingToPackage,

    #[error("Cover generation requested but no cover source is configured")]
    NoCoverSource,

    #[error("Validation failed for {failing} artifact/destination pair(s): {summary}")]
    ValidationFailed { failing: usize, summary: String },

    #[error("Phase exceeded its deadline of {0:?}")]
    DeadlineExceeded(Duration),

    #[error("Publish cancelled")]
    Cancelled,
}

impl From<CollaboratorError> for PhaseError {
    fn from(err: CollaboratorError) -> Self {
        match err {
            CollaboratorError::Cancelled => Self::Cancelled,
            other => Self::Collaborator(other),
        }
    }
}

/// A publish call that stopped at `phase`. The project is terminal and keeps
/// whatever was produced before the failure.
#[derive(Debug, Error)]
#[error("Phase {phase} failed: {error}")]
pub struct PublishFailure {
    pub phase: PhaseKind,
    #[source]
    pub error: PhaseError,
    pub project: Box<PublishingProject>,
}

/// The publishing pipeline - orchestrates collaborators, packaging and
/// validation for one work at a time. Holds no per-call state, so one
/// pipeline serves concurrent publish calls.
pub struct PublishingPipeline {
    identifiers: Arc<dyn IdentifierSource>,
    registration: Arc<dyn RegistrationService>,
    catalog: Arc<dyn RegistrationService>,
    covers: Option<Arc<dyn CoverSource>>,
    optimizer: Arc<dyn MetadataOptimizer>,
    adapter: Arc<dyn DestinationAdapter>,
    engine: PackagingEngine,
    validator: Validator,
    definition: PipelineDefinition,
    config: PipelineConfig,
}

impl PublishingPipeline {
    /// A pipeline with local collaborators for everything except the
    /// identifier source.
    pub fn new(identifiers: Arc<dyn IdentifierSource>) -> Self {
        let config = PipelineConfig::default();
        Self {
            identifiers,
            registration: Arc::new(PreparedRegistration::copyright()),
            catalog: Arc::new(PreparedRegistration::catalog_number()),
            covers: None,
            optimizer: Arc::new(DedupMetadataOptimizer),
            adapter: Arc::new(ManualDestinationAdapter),
            engine: config.packaging_engine(),
            validator: Validator::new(),
            definition: PipelineDefinition::standard(),
            config,
        }
    }

    pub fn with_config(mut self, config: PipelineConfig) -> Self {
        self.engine = config.packaging_engine();
        self.config = config;
        self
    }

    pub fn with_registration(mut self, service: Arc<dyn RegistrationService>) -> Self {
        self.registration = service;
        self
    }

    pub fn with_catalog(mut self, service: Arc<dyn RegistrationService>) -> Self {
        self.catalog = service;
        self
    }

    pub fn with_cover_source(mut self, source: Arc<dyn CoverSource>) -> Self {
        self.covers = Some(source);
        self
    }

    pub fn with_optimizer(mut self, optimizer: Arc<dyn MetadataOptimizer>) -> Self {
        self.optimizer = optimizer;
        self
    }

    pub fn with_adapter(mut self, adapter: Arc<dyn DestinationAdapter>) -> Self {
        self.adapter = adapter;
        self
    }

    /// Replaces the progress weights. The phase sequence itself is fixed by
    /// [`PipelineDefinition::new`].
    pub fn with_definition(mut self, definition: PipelineDefinition) -> Self {
        self.definition = definition;
        self
    }

    pub fn definition(&self) -> &PipelineDefinition {
        &self.definition
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Publish one work.
    ///
    /// Events go to `sink` only. Returns the published project, or the
    /// failing phase together with the project in its error state.
    pub async fn publish(
        &self,
        request: PublishRequest,
        sink: &dyn EventSink,
        cancel: &CancellationToken,
    ) -> Result<PublishingProject, PublishFailure> {
        let mut project = PublishingProject::new(request.metadata.clone());
        info!(project = %project.id(), title = %request.metadata.title, "publish started");

        if let Err((phase, error)) = self.drive(&request, &mut project, sink, cancel).await {
            project.finish_failed();
            return Err(PublishFailure { phase, error, project: Box::new(project) });
        }

        let cost = self.config.costs.compute(
            request.unique_formats().len(),
            CostFlags {
                cover_generated: request.generate_cover,
                destinations: request.unique_destinations().len(),
            },
        );
        project.finish_published(cost);
        info!(
            project = %project.id(),
            artifacts = project.artifacts().len(),
            submissions = project.submissions().len(),
            "publish completed"
        );
        sink.emit(PipelineEvent::complete(project.clone()));
        Ok(project)
    }

    /// A phase's start event reports the progress already reached (the
    /// previous phase's weight); only completion reports its own weight.
    async fn drive(
        &self,
        request: &PublishRequest,
        project: &mut PublishingProject,
        sink: &dyn EventSink,
        cancel: &CancellationToken,
    ) -> Result<(), (PhaseKind, PhaseError)> {
        let mut reached = 0u8;

        for descriptor in self.definition.phases() {
            let kind = descriptor.kind;
            let mut record = PhaseRecord::pending(*descriptor);
            record.start();
            project.phases_mut().push(record);
            let index = project.phases().len() - 1;

            debug!(phase = %kind, weight = descriptor.weight, "phase started");
            sink.emit(PipelineEvent::progress(kind, reached, format!("Starting {kind}")));

            let outcome = self.guarded(cancel, self.run_phase(kind, request, project, cancel)).await;

            let record = &mut project.phases_mut()[index];
            match outcome {
                Ok(()) => {
                    record.complete();
                    reached = descriptor.weight;
                    info!(phase = %kind, progress = reached, "phase completed");
                    sink.emit(PipelineEvent::progress(kind, reached, format!("Completed {kind}")));
                }
                Err(err) => {
                    let message = err.to_string();
                    record.fail(message.clone());
                    error!(phase = %kind, error = %message, "phase failed");
                    sink.emit(PipelineEvent::error(kind, message));
                    return Err((kind, err));
                }
            }
        }

        Ok(())
    }

    /// Races a phase body against the phase deadline and cancellation.
    async fn guarded<F>(&self, cancel: &CancellationToken, body: F) -> Result<(), PhaseError>
    where
        F: std::future::Future<Output = Result<(), PhaseError>>,
    {
        let bounded = async {
            match self.config.phase_deadline() {
                Some(limit) => tokio::time::timeout(limit, body)
                    .await
                    .unwrap_or(Err(PhaseError::DeadlineExceeded(limit))),
                None => body.await,
            }
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(PhaseError::Cancelled),
            result = bounded => result,
        }
    }

    async fn run_phase(
        &self,
        kind: PhaseKind,
        request: &PublishRequest,
        project: &mut PublishingProject,
        cancel: &CancellationToken,
    ) -> Result<(), PhaseError> {
        match kind {
            PhaseKind::IdentifierAcquisition => self.acquire_identifiers(request, project, cancel).await,
            PhaseKind::Registration => {
                let metadata = project.metadata();
                let service = self.registration.as_ref();
                let handle = with_retry(&self.config.retry, cancel, "registration", move || service.register(metadata)).await?;
                project.set_registration(handle);
                Ok(())
            }
            PhaseKind::CatalogNumber => {
                let metadata = project.metadata();
                let service = self.catalog.as_ref();
                let handle = with_retry(&self.config.retry, cancel, "catalog-number", move || service.register(metadata)).await?;
                project.set_catalog(handle);
                Ok(())
            }
            PhaseKind::Packaging => self.package_all(request, project).await,
            PhaseKind::Cover => self.cover(request, project, cancel).await,
            PhaseKind::MetadataOptimization => {
                let metadata = project.metadata();
                let optimizer = self.optimizer.as_ref();
                let optimized =
                    with_retry(&self.config.retry, cancel, "metadata-optimization", move || optimizer.optimize(metadata)).await?;
                project.set_metadata(optimized);
                Ok(())
            }
            PhaseKind::Validation => self.validate_all(request, project),
            PhaseKind::DestinationSubmission => self.submit_all(request, project, cancel).await,
        }
    }

    /// One identifier per requested format, claimed concurrently.
    async fn acquire_identifiers(
        &self,
        request: &PublishRequest,
        project: &mut PublishingProject,
        cancel: &CancellationToken,
    ) -> Result<(), PhaseError> {
        let formats = request.unique_formats();
        if formats.is_empty() {
            return Err(PhaseError::NothingToPackage);
        }

        let source = self.identifiers.as_ref();
        let retry = &self.config.retry;
        let claims = join_all(formats.iter().map(|&format| async move {
            with_retry(retry, cancel, "identifier-acquisition", move || source.acquire(format))
                .await
                .map(|isbn| AssignedIdentifier { format, isbn })
        }))
        .await;

        let identifiers = claims.into_iter().collect::<Result<Vec<_>, _>>()?;
        for id in &identifiers {
            info!(format = %id.format, isbn = %id.isbn.isbn13, "identifier assigned");
        }
        project.set_identifiers(identifiers);
        Ok(())
    }

    /// Builds every format; all must succeed.
    async fn package_all(&self, request: &PublishRequest, project: &mut PublishingProject) -> Result<(), PhaseError> {
        let chapters = Arc::new(request.chapters.clone());
        let cover = Arc::new(request.cover_image.clone());

        let builds = request.unique_formats().into_iter().map(|format| {
            let metadata = metadata_for(project, format);
            self.package(format, Arc::clone(&chapters), metadata, Arc::clone(&cover), request.print)
        });
        let artifacts = join_all(builds).await.into_iter().collect::<Result<Vec<_>, _>>()?;

        if let Some(image) = &request.cover_image {
            project.set_cover_image(image.clone());
        }
        for artifact in artifacts {
            project.supersede_artifact(artifact);
        }
        Ok(())
    }

    /// Packaging is CPU-bound and runs off the async workers.
    async fn package(
        &self,
        format: OutputFormat,
        chapters: Arc<Vec<Chapter>>,
        metadata: PublicationMetadata,
        cover: Arc<Option<Vec<u8>>>,
        print: PrintSpec,
    ) -> Result<PackagedArtifact, PhaseError> {
        let engine = self.engine;
        let artifact = tokio::task::spawn_blocking(move || {
            engine.build(format, &chapters, &metadata, cover.as_deref(), &print)
        })
        .await
        .map_err(|e| PhaseError::Task(e.to_string()))??;
        Ok(artifact)
    }

    /// Generates artwork when asked and re-packages a coverless e-book with it.
    async fn cover(
        &self,
        request: &PublishRequest,
        project: &mut PublishingProject,
        cancel: &CancellationToken,
    ) -> Result<(), PhaseError> {
        if !request.generate_cover {
            debug!("cover generation not requested");
            return Ok(());
        }
        let source = self.covers.as_deref().ok_or(PhaseError::NoCoverSource)?;

        let brief = request.cover_brief();
        let brief = &brief;
        let image = with_retry(&self.config.retry, cancel, "cover", move || source.generate(brief)).await?;
        info!(bytes = image.len(), "cover generated");

        let needs_cover = project
            .artifact(OutputFormat::Epub)
            .and_then(PackagedArtifact::as_reflowable)
            .is_some_and(|doc| !doc.has_cover);

        if needs_cover {
            let metadata = metadata_for(project, OutputFormat::Epub);
            let rebuilt = self
                .package(
                    OutputFormat::Epub,
                    Arc::new(request.chapters.clone()),
                    metadata,
                    Arc::new(Some(image.clone())),
                    request.print,
                )
                .await?;
            info!(checksum = %rebuilt.checksum(), "e-book re-packaged with generated cover");
            project.supersede_artifact(rebuilt);
        }

        project.set_cover_image(image);
        Ok(())
    }

    /// Every artifact against every requested destination that takes its
    /// format. A destination that takes none of the produced formats is
    /// judged against all of them so the mismatch surfaces as a diagnostic.
    fn validate_all(&self, request: &PublishRequest, project: &mut PublishingProject) -> Result<(), PhaseError> {
        let metadata = project.metadata();
        let mut verdicts: Vec<ValidationVerdict> = vec![];

        for destination in request.unique_destinations() {
            let requirements = destination.requirements();
            let accepted: Vec<&PackagedArtifact> =
                project.artifacts().iter().filter(|a| requirements.accepts(a.format())).collect();
            let targets = if accepted.is_empty() { project.artifacts().iter().collect() } else { accepted };

            for artifact in targets {
                let verdict = self.validator.validate_with_metadata(artifact, metadata, destination);
                debug!(
                    %destination,
                    format = %artifact.format(),
                    score = verdict.score,
                    warnings = verdict.count(Severity::Warning),
                    "artifact validated"
                );
                verdicts.push(verdict);
            }
        }

        let failing: Vec<String> = verdicts
            .iter()
            .filter(|v| !v.is_passing())
            .map(|v| {
                let codes: Vec<&str> = v.critical().map(|d| d.code.as_str()).collect();
                let format = v.format.map(|f| f.to_string()).unwrap_or_else(|| "metadata".into());
                format!("{} {}: {}", v.destination, format, codes.join(", "))
            })
            .collect();

        project.set_verdicts(verdicts);

        if failing.is_empty() {
            Ok(())
        } else {
            Err(PhaseError::ValidationFailed { failing: failing.len(), summary: failing.join("; ") })
        }
    }

    /// Per-destination results; one failing destination never undoes another.
    async fn submit_all(
        &self,
        request: &PublishRequest,
        project: &mut PublishingProject,
        cancel: &CancellationToken,
    ) -> Result<(), PhaseError> {
        let metadata = project.metadata();
        let artifacts = project.artifacts();
        let adapter = self.adapter.as_ref();
        let retry = &self.config.retry;

        let jobs: Vec<(Destination, &PackagedArtifact)> = request
            .unique_destinations()
            .into_iter()
            .flat_map(move |destination| {
                let requirements = destination.requirements();
                artifacts
                    .iter()
                    .filter(move |a| requirements.accepts(a.format()))
                    .map(move |a| (destination, a))
            })
            .collect();

        let results = join_all(jobs.into_iter().map(|(destination, artifact)| async move {
            let format = artifact.format();
            match with_retry(retry, cancel, "destination-submission", move || {
                adapter.submit(artifact, metadata, destination)
            })
            .await
            {
                Ok(receipt) => SubmissionResult {
                    destination,
                    format,
                    status: receipt.status,
                    instructions: receipt.instructions,
                    reference: receipt.reference,
                    error: None,
                },
                Err(err) => {
                    warn!(%destination, %format, error = %err, "submission failed");
                    SubmissionResult {
                        destination,
                        format,
                        status: SubmissionStatus::Failed,
                        instructions: None,
                        reference: None,
                        error: Some(err.to_string()),
                    }
                }
            }
        }))
        .await;

        project.set_submissions(results);
        Ok(())
    }
}

/// Project metadata carrying the identifier assigned to `format`.
fn metadata_for(project: &PublishingProject, format: OutputFormat) -> PublicationMetadata {
    let mut metadata = project.metadata().clone();
    if let Some(id) = project.identifiers().iter().find(|id| id.format == format) {
        metadata.isbn = Some(id.isbn.isbn13.clone());
    }
    metadata
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::InMemoryIdentifierPool;
    use crate::events::RecordingSink;
    use crate::project::ProjectStatus;
    use chrono::NaiveDate;

    fn request(formats: Vec<OutputFormat>) -> PublishRequest {
        let mut metadata = PublicationMetadata::new("Tidewater", "R. Vale", NaiveDate::from_ymd_opt(2026, 3, 1).unwrap());
        metadata.description = "A coastal mystery told across three long, salt-stained summers.".into();
        metadata.categories = vec!["FIC022000".into()];
        metadata.keywords = vec!["mystery".into()];
        PublishRequest::new(
            vec![Chapter::new(1, "One", "First."), Chapter::new(2, "Two", "Second.")],
            metadata,
            formats,
            vec![],
        )
    }

    fn pool(n: usize) -> Arc<InMemoryIdentifierPool> {
        let raw = ["9780306406157", "9781861972712", "9780262033848"];
        Arc::new(InMemoryIdentifierPool::from_isbn13s(&raw[..n]).unwrap())
    }

    #[test]
    fn test_cancelled_collaborator_maps_to_cancelled_phase() {
        assert!(matches!(PhaseError::from(CollaboratorError::Cancelled), PhaseError::Cancelled));
        assert!(matches!(
            PhaseError::from(CollaboratorError::Rejected("x".into())),
            PhaseError::Collaborator(CollaboratorError::Rejected(_))
        ));
    }

    #[tokio::test]
    async fn test_identifiers_follow_formats_into_metadata() {
        let pipeline = PublishingPipeline::new(pool(2));
        let project = pipeline
            .publish(request(vec![OutputFormat::Epub, OutputFormat::Pdf]), &RecordingSink::new(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(project.status(), ProjectStatus::Published);
        assert_eq!(project.identifiers().len(), 2);
        assert_eq!(project.metadata().isbn.as_deref(), Some("9780306406157"));
        assert!(project.registration().unwrap().reference.starts_with("REG-"));
        assert!(project.catalog().unwrap().reference.starts_with("CAT-"));
        assert!(project.manifest_hash().is_some());
    }

    #[tokio::test]
    async fn test_no_formats_fails_first_phase() {
        let pipeline = PublishingPipeline::new(pool(1));
        let failure = pipeline
            .publish(request(vec![]), &RecordingSink::new(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(failure.phase, PhaseKind::IdentifierAcquisition);
        assert!(matches!(failure.error, PhaseError::NothingToPackage));
        assert_eq!(failure.project.status(), ProjectStatus::Error);
    }

    #[tokio::test]
    async fn test_cover_requested_without_source() {
        let mut req = request(vec![OutputFormat::Epub]);
        req.generate_cover = true;
        let failure = PublishingPipeline::new(pool(1))
            .publish(req, &RecordingSink::new(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(failure.phase, PhaseKind::Cover);
        assert!(matches!(failure.error, PhaseError::NoCoverSource));
        assert!(failure.project.artifact(OutputFormat::Epub).is_some());
    }
}
