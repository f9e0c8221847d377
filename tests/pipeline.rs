//! Orchestrator behaviour with in-test collaborators.

mod common;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use forgepress_core::{
    collaborators::{
        CoverBrief, CoverSource, DestinationAdapter, IdentifierSource, InMemoryIdentifierPool, RegistrationHandle,
        RegistrationService, StaticCoverSource, SubmissionReceipt, SubmissionStatus,
    },
    events::RecordingSink,
    phases::PhaseDescriptor,
    CollaboratorError, Destination, IsbnPair, OutputFormat, PackagedArtifact, PhaseError, PhaseKind, PhaseStatus,
    PipelineConfig, PipelineDefinition, PipelineEvent, ProjectStatus, PublicationMetadata, PublishRequest, PublishingPipeline,
    RetryConfig,
};
use tokio_util::sync::CancellationToken;

const ISBNS: [&str; 4] = ["9780306406157", "9781861972712", "9780262033848", "9780131103627"];

fn pool(n: usize) -> Arc<InMemoryIdentifierPool> {
    Arc::new(InMemoryIdentifierPool::from_isbn13s(&ISBNS[..n]).unwrap())
}

fn request(formats: Vec<OutputFormat>, destinations: Vec<Destination>) -> PublishRequest {
    let mut req = PublishRequest::new(common::chapters(3), common::metadata(), formats, destinations);
    req.cover_image = Some(common::full_cover());
    req
}

fn fast_config() -> PipelineConfig {
    PipelineConfig {
        retry: RetryConfig {
            max_attempts: 3,
            initial_backoff_ms: 1,
            max_backoff_ms: 2,
            backoff_multiplier: 2.0,
            attempt_timeout_ms: Some(2_000),
        },
        ..PipelineConfig::default()
    }
}

fn completed_weights(events: &[PipelineEvent]) -> Vec<u8> {
    events
        .iter()
        .filter_map(|e| match e {
            PipelineEvent::Progress { progress, message, .. } if message.starts_with("Completed") => Some(*progress),
            _ => None,
        })
        .collect()
}

fn progress_values(events: &[PipelineEvent]) -> Vec<u8> {
    events
        .iter()
        .filter_map(|e| match e {
            PipelineEvent::Progress { progress, .. } => Some(*progress),
            _ => None,
        })
        .collect()
}

/// Counts submissions and rejects the listed destinations.
#[derive(Default)]
struct ScriptedAdapter {
    reject: Vec<Destination>,
    calls: AtomicU32,
}

#[async_trait]
impl DestinationAdapter for ScriptedAdapter {
    async fn submit(
        &self,
        artifact: &PackagedArtifact,
        _metadata: &PublicationMetadata,
        destination: Destination,
    ) -> Result<SubmissionReceipt, CollaboratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.reject.contains(&destination) {
            return Err(CollaboratorError::Rejected(format!("{destination} refused {}", artifact.format())));
        }
        Ok(SubmissionReceipt {
            status: SubmissionStatus::Submitted,
            instructions: None,
            reference: Some(format!("{destination}-{}", artifact.format())),
        })
    }
}

/// Fails with a transient error a fixed number of times before delegating.
struct FlakySource {
    inner: InMemoryIdentifierPool,
    failures_left: AtomicU32,
    calls: AtomicU32,
}

#[async_trait]
impl IdentifierSource for FlakySource {
    async fn acquire(&self, format: OutputFormat) -> Result<IsbnPair, CollaboratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failures_left.load(Ordering::SeqCst) > 0 {
            self.failures_left.fetch_sub(1, Ordering::SeqCst);
            return Err(CollaboratorError::Unavailable("registry busy".into()));
        }
        self.inner.acquire(format).await
    }
}

/// Never answers.
struct Stalled;

#[async_trait]
impl RegistrationService for Stalled {
    async fn register(&self, _metadata: &PublicationMetadata) -> Result<RegistrationHandle, CollaboratorError> {
        std::future::pending().await
    }
}

/// Cancels the publish from inside the cover phase, then hangs.
struct CancelOnCall(CancellationToken);

#[async_trait]
impl CoverSource for CancelOnCall {
    async fn generate(&self, _brief: &CoverBrief) -> Result<Vec<u8>, CollaboratorError> {
        self.0.cancel();
        std::future::pending().await
    }
}

#[tokio::test]
async fn test_happy_path_reports_every_phase_in_order() {
    let adapter = Arc::new(ScriptedAdapter::default());
    let pipeline = PublishingPipeline::new(pool(2))
        .with_config(fast_config())
        .with_adapter(adapter.clone());
    let sink = RecordingSink::new();

    let project = pipeline
        .publish(
            request(vec![OutputFormat::Epub, OutputFormat::Pdf], vec![Destination::Generic]),
            &sink,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    let events = sink.events();
    assert_eq!(completed_weights(&events), vec![10, 20, 30, 50, 65, 75, 85, 100]);
    let progress = progress_values(&events);
    assert!(progress.windows(2).all(|w| w[0] <= w[1]));
    assert!(matches!(events.last(), Some(PipelineEvent::Complete { .. })));
    assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);

    assert_eq!(project.status(), ProjectStatus::Published);
    assert_eq!(project.progress(), 100);
    assert!(project.phases().iter().all(|p| p.status == PhaseStatus::Completed));
    assert_eq!(project.artifacts().len(), 2);
    assert_eq!(project.verdicts().len(), 2);
    assert!(project.verdicts().iter().all(|v| v.valid));
    assert_eq!(project.submissions().len(), 2);
    assert!(project.submissions().iter().all(|s| s.status == SubmissionStatus::Submitted));
    assert_eq!(adapter.calls.load(Ordering::SeqCst), 2);
    assert!(project.cost().unwrap().total.0 > 0);
    assert!(project.completed_at().is_some());
}

#[tokio::test]
async fn test_identifier_exhaustion_stops_at_first_phase() {
    let adapter = Arc::new(ScriptedAdapter::default());
    let pipeline = PublishingPipeline::new(pool(1))
        .with_config(fast_config())
        .with_adapter(adapter.clone());
    let sink = RecordingSink::new();

    let failure = pipeline
        .publish(
            request(vec![OutputFormat::Epub, OutputFormat::Pdf], vec![Destination::Kobo]),
            &sink,
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

    assert_eq!(failure.phase, PhaseKind::IdentifierAcquisition);
    assert!(matches!(
        failure.error,
        PhaseError::Collaborator(CollaboratorError::OutOfInventory { .. })
    ));

    let events = sink.events();
    let errors: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            PipelineEvent::Error { phase, error, .. } => Some((*phase, error.clone())),
            _ => None,
        })
        .collect();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].0, PhaseKind::IdentifierAcquisition);
    assert!(errors[0].1.contains("exhausted"));
    assert!(!events.iter().any(|e| matches!(e, PipelineEvent::Complete { .. })));
    assert!(progress_values(&events).iter().all(|p| *p <= 10));

    let project = failure.project;
    assert_eq!(project.status(), ProjectStatus::Error);
    assert_eq!(project.phases().len(), 1);
    assert_eq!(project.phases()[0].status, PhaseStatus::Failed);
    assert!(project.phases().iter().all(|p| p.status != PhaseStatus::Completed));
    assert_eq!(adapter.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_failing_verdict_blocks_submission() {
    let adapter = Arc::new(ScriptedAdapter::default());
    let pipeline = PublishingPipeline::new(pool(1))
        .with_config(fast_config())
        .with_adapter(adapter.clone());
    let sink = RecordingSink::new();

    // Three short chapters cannot reach the 24-page print minimum.
    let failure = pipeline
        .publish(
            request(vec![OutputFormat::Pdf], vec![Destination::AmazonKdp]),
            &sink,
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

    assert_eq!(failure.phase, PhaseKind::Validation);
    match &failure.error {
        PhaseError::ValidationFailed { failing, summary } => {
            assert_eq!(*failing, 1);
            assert!(summary.contains("PAGE_COUNT_TOO_LOW"), "{summary}");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(adapter.calls.load(Ordering::SeqCst), 0);

    let project = failure.project;
    assert_eq!(project.progress(), 75);
    assert_eq!(project.artifacts().len(), 1);
    assert_eq!(project.verdicts().len(), 1);
    assert!(!project.verdicts()[0].valid);
    assert!(project.submissions().is_empty());
    assert!(progress_values(&sink.events()).iter().all(|p| *p <= 85));
}

#[tokio::test]
async fn test_keyword_overage_blocks_only_hard_limit_destinations() {
    let mut req = request(vec![OutputFormat::Epub], vec![Destination::Kobo]);
    req.metadata.keywords = (0..9).map(|i| format!("keyword {i}")).collect();

    let project = PublishingPipeline::new(pool(1))
        .with_config(fast_config())
        .publish(req.clone(), &RecordingSink::new(), &CancellationToken::new())
        .await
        .unwrap();
    let verdict = &project.verdicts()[0];
    assert!(verdict.valid);
    assert!(verdict.diagnostics.iter().any(|d| d.code == "TOO_MANY_KEYWORDS"));
    assert_eq!(project.metadata().keywords.len(), 9);

    req.destinations = vec![Destination::AmazonKdp];
    let failure = PublishingPipeline::new(pool(1))
        .with_config(fast_config())
        .publish(req, &RecordingSink::new(), &CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(failure.phase, PhaseKind::Validation);
    assert!(failure.error.to_string().contains("TOO_MANY_KEYWORDS"));
}

#[tokio::test]
async fn test_partial_submission_failure_keeps_other_results() {
    let adapter = Arc::new(ScriptedAdapter { reject: vec![Destination::Kobo], ..Default::default() });
    let pipeline = PublishingPipeline::new(pool(1))
        .with_config(fast_config())
        .with_adapter(adapter.clone());

    let project = pipeline
        .publish(
            request(vec![OutputFormat::Epub], vec![Destination::Kobo, Destination::Generic, Destination::AppleBooks]),
            &RecordingSink::new(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(project.status(), ProjectStatus::Published);
    assert_eq!(project.submissions().len(), 3);
    let kobo = project.submissions().iter().find(|s| s.destination == Destination::Kobo).unwrap();
    assert_eq!(kobo.status, SubmissionStatus::Failed);
    assert!(kobo.error.as_deref().unwrap_or_default().contains("refused"));
    let others: Vec<_> = project.submissions().iter().filter(|s| s.destination != Destination::Kobo).collect();
    assert!(others.iter().all(|s| s.status == SubmissionStatus::Submitted && s.error.is_none()));
    // Rejections are permanent and are not retried.
    assert_eq!(adapter.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_transient_identifier_errors_are_retried() {
    let source = Arc::new(FlakySource {
        inner: InMemoryIdentifierPool::from_isbn13s(&ISBNS[..1]).unwrap(),
        failures_left: AtomicU32::new(2),
        calls: AtomicU32::new(0),
    });
    let project = PublishingPipeline::new(source.clone())
        .with_config(fast_config())
        .publish(request(vec![OutputFormat::Epub], vec![]), &RecordingSink::new(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(source.calls.load(Ordering::SeqCst), 3);
    assert_eq!(project.identifiers()[0].isbn.isbn13, ISBNS[0]);
}

#[tokio::test]
async fn test_generated_cover_supersedes_coverless_ebook() {
    let mut req = request(vec![OutputFormat::Epub], vec![Destination::AmazonKdp]);
    req.cover_image = None;
    req.generate_cover = true;

    let project = PublishingPipeline::new(pool(1))
        .with_config(fast_config())
        .with_cover_source(Arc::new(StaticCoverSource::new(common::full_cover())))
        .publish(req, &RecordingSink::new(), &CancellationToken::new())
        .await
        .unwrap();

    let epub = project.artifact(OutputFormat::Epub).unwrap().as_reflowable().unwrap();
    assert!(epub.has_cover);
    assert_eq!(project.artifacts().len(), 1);
    assert_eq!(project.cover_image(), Some(common::full_cover().as_slice()));
    assert!(project.verdicts()[0].valid);
}

#[tokio::test]
async fn test_cancellation_stops_the_running_phase() {
    let cancel = CancellationToken::new();
    let mut req = request(vec![OutputFormat::Epub], vec![]);
    req.generate_cover = true;
    let sink = RecordingSink::new();
    let failure = PublishingPipeline::new(pool(1))
        .with_config(fast_config())
        .with_cover_source(Arc::new(CancelOnCall(cancel.clone())))
        .publish(req, &sink, &cancel)
        .await
        .unwrap_err();

    assert_eq!(failure.phase, PhaseKind::Cover);
    assert!(matches!(failure.error, PhaseError::Cancelled));
    assert_eq!(failure.project.progress(), 50);
    assert!(failure.project.artifact(OutputFormat::Epub).is_some());
    assert!(matches!(sink.events().last(), Some(PipelineEvent::Error { phase: PhaseKind::Cover, .. })));
}

#[tokio::test]
async fn test_phase_deadline_bounds_a_stalled_collaborator() {
    let config = PipelineConfig {
        retry: RetryConfig::none(),
        phase_deadline_secs: Some(1),
        ..PipelineConfig::default()
    };
    let failure = PublishingPipeline::new(pool(1))
        .with_config(config)
        .with_registration(Arc::new(Stalled))
        .publish(request(vec![OutputFormat::Epub], vec![]), &RecordingSink::new(), &CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(failure.phase, PhaseKind::Registration);
    assert!(matches!(failure.error, PhaseError::DeadlineExceeded(d) if d == Duration::from_secs(1)));
    assert_eq!(failure.project.progress(), 10);
}

#[tokio::test]
async fn test_concurrent_publishes_do_not_share_events_or_identifiers() {
    let pipeline = PublishingPipeline::new(pool(2)).with_config(fast_config());
    let (sink_a, sink_b) = (RecordingSink::new(), RecordingSink::new());
    let cancel = CancellationToken::new();

    let (a, b) = tokio::join!(
        pipeline.publish(request(vec![OutputFormat::Epub], vec![]), &sink_a, &cancel),
        pipeline.publish(request(vec![OutputFormat::Pdf], vec![]), &sink_b, &cancel),
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_ne!(a.identifiers()[0].isbn, b.identifiers()[0].isbn);
    assert_ne!(a.id(), b.id());

    for (sink, project) in [(&sink_a, &a), (&sink_b, &b)] {
        let events = sink.events();
        assert_eq!(completed_weights(&events).len(), 8);
        match events.last() {
            Some(PipelineEvent::Complete { result, .. }) => assert_eq!(result.id(), project.id()),
            other => panic!("expected completion, got {other:?}"),
        }
    }
}

#[tokio::test]
async fn test_reweighted_definition_still_validates_before_submission() {
    let weights = [5, 10, 15, 40, 45, 50, 90, 100];
    let definition = PipelineDefinition::new(
        PhaseKind::SEQUENCE
            .into_iter()
            .zip(weights)
            .map(|(kind, weight)| PhaseDescriptor { kind, weight })
            .collect(),
    )
    .unwrap();
    let adapter = Arc::new(ScriptedAdapter::default());
    let pipeline = PublishingPipeline::new(pool(1))
        .with_config(fast_config())
        .with_definition(definition)
        .with_adapter(adapter.clone());
    let sink = RecordingSink::new();

    let mut req = request(vec![OutputFormat::Epub], vec![Destination::AmazonKdp]);
    req.cover_image = None;
    let failure = pipeline.publish(req, &sink, &CancellationToken::new()).await.unwrap_err();

    assert_eq!(failure.phase, PhaseKind::Validation);
    assert!(failure.error.to_string().contains("MISSING_COVER"));
    assert_eq!(adapter.calls.load(Ordering::SeqCst), 0);
    assert!(failure.project.submissions().is_empty());
    assert_eq!(completed_weights(&sink.events()), vec![5, 10, 15, 40, 45, 50]);
}

#[tokio::test]
async fn test_destination_without_matching_format_is_judged_on_every_artifact() {
    let adapter = Arc::new(ScriptedAdapter::default());
    let pipeline = PublishingPipeline::new(pool(1))
        .with_config(fast_config())
        .with_adapter(adapter.clone());

    let failure = pipeline
        .publish(
            request(vec![OutputFormat::Pdf], vec![Destination::AppleBooks]),
            &RecordingSink::new(),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

    assert_eq!(failure.phase, PhaseKind::Validation);
    let verdicts = failure.project.verdicts();
    assert_eq!(verdicts.len(), 1);
    assert_eq!(verdicts[0].destination, Destination::AppleBooks);
    assert_eq!(verdicts[0].format, Some(OutputFormat::Pdf));
    assert!(verdicts[0].critical().any(|d| d.code == "UNSUPPORTED_FORMAT"));
    assert_eq!(adapter.calls.load(Ordering::SeqCst), 0);

    // With an accepted format present, only that format is judged.
    let project = PublishingPipeline::new(pool(2))
        .with_config(fast_config())
        .publish(
            request(vec![OutputFormat::Epub, OutputFormat::Pdf], vec![Destination::AppleBooks]),
            &RecordingSink::new(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    assert_eq!(project.verdicts().len(), 1);
    assert_eq!(project.verdicts()[0].format, Some(OutputFormat::Epub));
    assert_eq!(project.submissions().len(), 1);
}
