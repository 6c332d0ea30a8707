//! End-to-end pipeline tests with stub classifiers.

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures_util::StreamExt;
use mockall::mock;
use tokio_test::assert_ok;

use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use vmod_analyzer::{HttpClassifier, HttpClassifierConfig};
use vmod_models::MediaRef;
use vmod_pipeline::{
    AnalysisContext, BackoffPolicy, CancelOutcome, Classifier, ClassifyError, ErrorCategory,
    EventKind, JobEvent, JobId, JobState, ModerationResult, Pipeline, PipelineConfig,
    PipelineError,
};
use vmod_store::{InMemoryJobStore, JobStore, Mutator, StoreResult};

// ---------------------------------------------------------------------------
// Stub classifiers
// ---------------------------------------------------------------------------

/// Answers with a fixed result after a delay.
struct Delayed {
    delay: Duration,
    result: ModerationResult,
    calls: AtomicU32,
}

impl Delayed {
    fn new(delay: Duration, label: &str, confidence: f64) -> Self {
        Self {
            delay,
            result: ModerationResult {
                label: label.to_string(),
                confidence,
            },
            calls: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl Classifier for Delayed {
    async fn classify(
        &self,
        _media_ref: &MediaRef,
        ctx: AnalysisContext,
    ) -> Result<ModerationResult, ClassifyError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::select! {
            _ = tokio::time::sleep(self.delay) => Ok(self.result.clone()),
            _ = ctx.cancel.cancelled() => Err(ClassifyError::Cancelled),
        }
    }
}

/// Never answers; gives up only when cancelled.
#[derive(Default)]
struct Hang {
    calls: AtomicU32,
}

#[async_trait]
impl Classifier for Hang {
    async fn classify(
        &self,
        _media_ref: &MediaRef,
        ctx: AnalysisContext,
    ) -> Result<ModerationResult, ClassifyError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        ctx.cancel.cancelled().await;
        Err(ClassifyError::Cancelled)
    }
}

/// Tracks the highest number of overlapping calls.
#[derive(Default)]
struct Counting {
    current: AtomicUsize,
    peak: AtomicUsize,
    calls: AtomicU32,
}

#[async_trait]
impl Classifier for Counting {
    async fn classify(
        &self,
        _media_ref: &MediaRef,
        _ctx: AnalysisContext,
    ) -> Result<ModerationResult, ClassifyError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(30)).await;
        self.current.fetch_sub(1, Ordering::SeqCst);
        Ok(ModerationResult::new("safe", 0.7).unwrap())
    }
}

/// Reports every percent from 1 to 100, then answers.
struct Milestones;

#[async_trait]
impl Classifier for Milestones {
    async fn classify(
        &self,
        _media_ref: &MediaRef,
        ctx: AnalysisContext,
    ) -> Result<ModerationResult, ClassifyError> {
        for percent in 1..=100u8 {
            ctx.progress.report(percent);
        }
        Ok(ModerationResult::new("flagged", 0.6).unwrap())
    }
}

mock! {
    pub Analyzer {}

    #[async_trait]
    impl Classifier for Analyzer {
        async fn classify(
            &self,
            media_ref: &MediaRef,
            ctx: AnalysisContext,
        ) -> Result<ModerationResult, ClassifyError>;
    }
}

// ---------------------------------------------------------------------------
// Stores
// ---------------------------------------------------------------------------

/// In-memory store whose claims (`Queued -> Running`) take a while.
struct SlowClaimStore {
    inner: InMemoryJobStore,
    delay: Duration,
}

#[async_trait]
impl JobStore for SlowClaimStore {
    async fn create(
        &self,
        media_ref: MediaRef,
        owner: &str,
        max_attempts: u32,
    ) -> StoreResult<JobId> {
        self.inner.create(media_ref, owner, max_attempts).await
    }

    async fn get(&self, id: &JobId) -> StoreResult<vmod_pipeline::Job> {
        self.inner.get(id).await
    }

    async fn transition(
        &self,
        id: &JobId,
        expected: JobState,
        new: JobState,
        mutator: Mutator<'_>,
    ) -> StoreResult<vmod_pipeline::Job> {
        if expected == JobState::Queued && new == JobState::Running {
            tokio::time::sleep(self.delay).await;
        }
        self.inner.transition(id, expected, new, mutator).await
    }

    async fn list_by_owner(&self, owner: &str) -> StoreResult<Vec<vmod_pipeline::Job>> {
        self.inner.list_by_owner(owner).await
    }

    async fn list_by_state(&self, state: JobState) -> StoreResult<Vec<vmod_pipeline::Job>> {
        self.inner.list_by_state(state).await
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn test_config(slots: usize) -> PipelineConfig {
    PipelineConfig {
        analyzer_slots: slots,
        max_attempts: 3,
        analyzer_timeout: Duration::from_secs(5),
        backoff: BackoffPolicy::new(Duration::from_millis(10), Duration::from_millis(100)),
        cancel_grace: Duration::from_millis(50),
        progress_step: 10,
        event_buffer: 64,
        shutdown_timeout: Duration::from_secs(2),
    }
}

async fn start(config: PipelineConfig, classifier: Arc<dyn Classifier>) -> Pipeline {
    Pipeline::start(config, Arc::new(InMemoryJobStore::new()), classifier)
        .await
        .unwrap()
}

/// Follow a job until its terminal event.
async fn follow(pipeline: &Pipeline, id: &JobId) -> Vec<JobEvent> {
    let subscription = pipeline.subscribe(id).await.unwrap();
    tokio::time::timeout(Duration::from_secs(5), subscription.into_stream().collect())
        .await
        .expect("job did not finish in time")
}

async fn wait_for_state(pipeline: &Pipeline, id: &JobId, state: JobState) {
    for _ in 0..200 {
        if pipeline.status(id).await.unwrap().state == state {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("job {} never reached {}", id, state);
}

// ---------------------------------------------------------------------------
// End-to-end scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_single_job_completes() {
    let classifier = Arc::new(Delayed::new(Duration::from_millis(50), "safe", 0.9));
    let pipeline = start(test_config(1), classifier.clone()).await;

    let started = Instant::now();
    let id = pipeline.submit("uploads/cat.mp4", "alice").await.unwrap();
    let events = follow(&pipeline, &id).await;

    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].kind, EventKind::Started { attempt: 1 });
    assert_eq!(
        events[1].kind,
        EventKind::Done {
            result: ModerationResult::new("safe", 0.9).unwrap()
        }
    );
    assert!(events[0].seq < events[1].seq);

    let job = pipeline.status(&id).await.unwrap();
    assert_eq!(job.state, JobState::Done);
    assert_eq!(job.attempt, 1);
    assert_eq!(job.result.as_ref().map(|r| r.label.as_str()), Some("safe"));
    assert_ok!(job.check_invariants());
    assert_eq!(classifier.calls.load(Ordering::SeqCst), 1);

    pipeline.shutdown().await;
}

#[tokio::test]
async fn test_timeouts_exhaust_attempts() {
    let classifier = Arc::new(Hang::default());
    let config = PipelineConfig {
        analyzer_timeout: Duration::from_millis(50),
        backoff: BackoffPolicy::new(Duration::from_millis(100), Duration::from_secs(10)),
        ..test_config(1)
    };
    let pipeline = start(config, classifier.clone()).await;

    let started = Instant::now();
    let id = pipeline.submit("uploads/slow.mp4", "bob").await.unwrap();
    let events = follow(&pipeline, &id).await;
    let elapsed = started.elapsed();

    assert_eq!(classifier.calls.load(Ordering::SeqCst), 3);
    assert!(elapsed >= Duration::from_millis(300), "elapsed {:?}", elapsed);
    assert!(elapsed < Duration::from_secs(5), "elapsed {:?}", elapsed);

    let kinds: Vec<EventKind> = events.into_iter().map(|e| e.kind).collect();
    assert_eq!(
        kinds,
        vec![
            EventKind::Started { attempt: 1 },
            EventKind::Retrying {
                attempt: 1,
                delay_ms: 100,
                error: ErrorCategory::Timeout
            },
            EventKind::Started { attempt: 2 },
            EventKind::Retrying {
                attempt: 2,
                delay_ms: 200,
                error: ErrorCategory::Timeout
            },
            EventKind::Started { attempt: 3 },
            EventKind::Failed {
                error: ErrorCategory::Timeout,
                attempts: 3
            },
        ]
    );

    let job = pipeline.status(&id).await.unwrap();
    assert_eq!(job.state, JobState::Failed);
    assert_eq!(job.attempt, job.max_attempts);
    assert_eq!(job.last_error, Some(ErrorCategory::Timeout));
    assert!(job.result.is_none());

    pipeline.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrency_bounded_by_pool() {
    let classifier = Arc::new(Counting::default());
    let pipeline = start(test_config(2), classifier.clone()).await;

    let mut ids = Vec::new();
    for i in 0..10 {
        ids.push(
            pipeline
                .submit(format!("uploads/{}.mp4", i), "carol")
                .await
                .unwrap(),
        );
    }
    for id in &ids {
        let events = follow(&pipeline, id).await;
        assert!(matches!(
            events.last().map(|e| &e.kind),
            Some(EventKind::Done { .. })
        ));
    }

    assert_eq!(classifier.calls.load(Ordering::SeqCst), 10);
    assert!(classifier.peak.load(Ordering::SeqCst) <= 2);

    for job in pipeline.list("carol").await.unwrap() {
        assert_eq!(job.state, JobState::Done);
        assert_ok!(job.check_invariants());
    }

    pipeline.shutdown().await;
}

#[tokio::test]
async fn test_progress_is_coalesced() {
    let config = PipelineConfig {
        progress_step: 25,
        ..test_config(1)
    };
    let pipeline = start(config, Arc::new(Milestones)).await;

    let id = pipeline.submit("uploads/progress.mp4", "dave").await.unwrap();
    let events = follow(&pipeline, &id).await;

    let percents: Vec<u8> = events
        .iter()
        .filter_map(|e| match e.kind {
            EventKind::Progress { percent } => Some(percent),
            _ => None,
        })
        .collect();
    assert_eq!(percents, vec![25, 50, 75, 100]);

    let seqs: Vec<u64> = events.iter().map(|e| e.seq).collect();
    assert!(seqs.windows(2).all(|w| w[0] < w[1]));

    pipeline.shutdown().await;
}

// ---------------------------------------------------------------------------
// Failure handling
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_analysis_errors_fail_after_max_attempts() {
    let mut mock = MockAnalyzer::new();
    mock.expect_classify()
        .times(3)
        .returning(|_, _| Err(ClassifyError::failed("model crashed")));
    let pipeline = start(test_config(1), Arc::new(mock)).await;

    let id = pipeline.submit("uploads/broken.mp4", "erin").await.unwrap();
    let events = follow(&pipeline, &id).await;

    assert_eq!(
        events.last().map(|e| e.kind.clone()),
        Some(EventKind::Failed {
            error: ErrorCategory::Analysis,
            attempts: 3
        })
    );

    pipeline.shutdown().await;
    // Dropping the pipeline drops the mock, which checks the call count.
    drop(pipeline);
}

#[tokio::test]
async fn test_out_of_range_confidence_is_invalid_result() {
    let config = PipelineConfig {
        max_attempts: 2,
        ..test_config(1)
    };
    let classifier = Arc::new(Delayed::new(Duration::from_millis(1), "safe", 1.5));
    let pipeline = start(config, classifier.clone()).await;

    let id = pipeline.submit("uploads/odd.mp4", "frank").await.unwrap();
    follow(&pipeline, &id).await;

    let job = pipeline.status(&id).await.unwrap();
    assert_eq!(job.state, JobState::Failed);
    assert_eq!(job.last_error, Some(ErrorCategory::InvalidResult));
    assert!(job.result.is_none());
    assert_eq!(classifier.calls.load(Ordering::SeqCst), 2);

    pipeline.shutdown().await;
}

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_cancel_running_job() {
    let classifier = Arc::new(Hang::default());
    let pipeline = start(test_config(1), classifier.clone()).await;

    let id = pipeline.submit("uploads/long.mp4", "gina").await.unwrap();
    let mut subscription = pipeline.subscribe(&id).await.unwrap();

    let first = subscription.recv().await.unwrap();
    assert_eq!(first.kind, EventKind::Started { attempt: 1 });

    assert_eq!(pipeline.cancel(&id).await.unwrap(), CancelOutcome::Cancelled);

    let last = tokio::time::timeout(Duration::from_secs(2), subscription.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(last.kind, EventKind::Cancelled);
    assert!(subscription.recv().await.is_none());

    let job = pipeline.status(&id).await.unwrap();
    assert_eq!(job.state, JobState::Cancelled);
    assert!(job.result.is_none());
    assert_eq!(classifier.calls.load(Ordering::SeqCst), 1);

    // The slot comes back for the next job.
    let next = pipeline.submit("uploads/next.mp4", "gina").await.unwrap();
    wait_for_state(&pipeline, &next, JobState::Running).await;
    assert_eq!(pipeline.cancel(&next).await.unwrap(), CancelOutcome::Cancelled);

    pipeline.shutdown().await;
}

#[tokio::test]
async fn test_cancel_queued_job_never_runs() {
    let classifier = Arc::new(Hang::default());
    let pipeline = start(test_config(1), classifier.clone()).await;

    let blocker = pipeline.submit("uploads/blocker.mp4", "hank").await.unwrap();
    wait_for_state(&pipeline, &blocker, JobState::Running).await;

    let queued = pipeline.submit("uploads/queued.mp4", "hank").await.unwrap();
    assert_eq!(pipeline.cancel(&queued).await.unwrap(), CancelOutcome::Cancelled);
    assert_eq!(pipeline.cancel(&blocker).await.unwrap(), CancelOutcome::Cancelled);

    // Give the dispatcher a chance to pick up the cancelled job.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let job = pipeline.status(&queued).await.unwrap();
    assert_eq!(job.state, JobState::Cancelled);
    assert_eq!(job.attempt, 0);
    assert_eq!(classifier.calls.load(Ordering::SeqCst), 1);

    pipeline.shutdown().await;
}

#[tokio::test]
async fn test_cancel_finished_job_is_already_terminal() {
    let pipeline = start(
        test_config(1),
        Arc::new(Delayed::new(Duration::from_millis(5), "safe", 0.8)),
    )
    .await;

    let id = pipeline.submit("uploads/done.mp4", "ivy").await.unwrap();
    follow(&pipeline, &id).await;

    assert_eq!(
        pipeline.cancel(&id).await.unwrap(),
        CancelOutcome::AlreadyTerminal(JobState::Done)
    );
    assert_eq!(pipeline.status(&id).await.unwrap().state, JobState::Done);

    pipeline.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cancel_races_completion() {
    let pipeline = Arc::new(
        start(
            test_config(4),
            Arc::new(Delayed::new(Duration::from_millis(5), "safe", 0.5)),
        )
        .await,
    );

    for i in 0..30u64 {
        let id = pipeline
            .submit(format!("uploads/race-{}.mp4", i), "jack")
            .await
            .unwrap();
        let subscription = pipeline.subscribe(&id).await.unwrap();

        let canceller = {
            let pipeline = Arc::clone(&pipeline);
            let id = id.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(i % 10)).await;
                pipeline.cancel(&id).await
            })
        };

        let events: Vec<JobEvent> =
            tokio::time::timeout(Duration::from_secs(5), subscription.into_stream().collect())
                .await
                .unwrap();
        let outcome = canceller.await.unwrap().unwrap();
        let job = pipeline.status(&id).await.unwrap();

        assert_ok!(job.check_invariants());
        assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
        match outcome {
            CancelOutcome::Cancelled => {
                assert_eq!(job.state, JobState::Cancelled);
                assert!(job.result.is_none());
                assert_eq!(events.last().map(|e| e.kind.clone()), Some(EventKind::Cancelled));
            }
            CancelOutcome::AlreadyTerminal(state) => {
                assert_eq!(state, JobState::Done);
                assert_eq!(job.state, JobState::Done);
                assert!(job.result.is_some());
            }
        }
    }

    pipeline.shutdown().await;
}

// ---------------------------------------------------------------------------
// Facade behaviour
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_subscribe_after_terminal_replays_outcome() {
    let pipeline = start(
        test_config(1),
        Arc::new(Delayed::new(Duration::from_millis(5), "flagged", 0.95)),
    )
    .await;

    let id = pipeline.submit("uploads/late.mp4", "kim").await.unwrap();
    follow(&pipeline, &id).await;

    let events = follow(&pipeline, &id).await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].seq, 0);
    assert_eq!(
        events[0].kind,
        EventKind::Done {
            result: ModerationResult::new("flagged", 0.95).unwrap()
        }
    );

    pipeline.shutdown().await;
}

#[tokio::test]
async fn test_unknown_job_is_not_found() {
    let pipeline = start(test_config(1), Arc::new(Hang::default())).await;
    let id = JobId::from_string("does-not-exist");

    assert!(matches!(pipeline.status(&id).await, Err(PipelineError::NotFound(_))));
    assert!(matches!(pipeline.cancel(&id).await, Err(PipelineError::NotFound(_))));
    assert!(matches!(pipeline.subscribe(&id).await, Err(PipelineError::NotFound(_))));
    assert_eq!(pipeline.events().subscriber_count(&id), 0);

    pipeline.shutdown().await;
}

#[tokio::test]
async fn test_submit_rejects_blank_input() {
    let pipeline = start(test_config(1), Arc::new(Hang::default())).await;

    assert!(matches!(
        pipeline.submit("  ", "lee").await,
        Err(PipelineError::InvalidRequest(_))
    ));
    assert!(matches!(
        pipeline.submit("uploads/a.mp4", "").await,
        Err(PipelineError::InvalidRequest(_))
    ));
    assert!(pipeline.list("lee").await.unwrap().is_empty());

    pipeline.shutdown().await;
}

#[tokio::test]
async fn test_list_newest_first() {
    let pipeline = start(
        test_config(1),
        Arc::new(Delayed::new(Duration::from_millis(1), "safe", 0.9)),
    )
    .await;

    let first = pipeline.submit("uploads/1.mp4", "mia").await.unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;
    let second = pipeline.submit("uploads/2.mp4", "mia").await.unwrap();
    pipeline.submit("uploads/other.mp4", "ned").await.unwrap();

    let jobs = pipeline.list("mia").await.unwrap();
    let ids: Vec<&JobId> = jobs.iter().map(|j| &j.id).collect();
    assert_eq!(ids, vec![&second, &first]);

    pipeline.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_drains_in_flight_and_rejects_new_work() {
    let pipeline = start(
        test_config(1),
        Arc::new(Delayed::new(Duration::from_millis(100), "safe", 0.9)),
    )
    .await;

    let id = pipeline.submit("uploads/drain.mp4", "olga").await.unwrap();
    wait_for_state(&pipeline, &id, JobState::Running).await;

    pipeline.shutdown().await;

    assert_eq!(pipeline.status(&id).await.unwrap().state, JobState::Done);
    assert!(matches!(
        pipeline.submit("uploads/late.mp4", "olga").await,
        Err(PipelineError::ShuttingDown)
    ));
}

#[tokio::test]
async fn test_shutdown_waits_for_claim_in_progress() {
    let store = Arc::new(SlowClaimStore {
        inner: InMemoryJobStore::new(),
        delay: Duration::from_millis(200),
    });
    let pipeline = Pipeline::start(
        test_config(1),
        store,
        Arc::new(Delayed::new(Duration::from_millis(20), "safe", 0.9)),
    )
    .await
    .unwrap();

    let id = pipeline.submit("uploads/slow-claim.mp4", "quinn").await.unwrap();
    // Shut down while the claim is still in the store.
    tokio::time::sleep(Duration::from_millis(50)).await;
    pipeline.shutdown().await;

    let job = pipeline.status(&id).await.unwrap();
    assert_eq!(job.state, JobState::Done);
    assert_eq!(job.attempt, 1);
}

#[tokio::test]
async fn test_http_out_of_range_confidence_is_invalid_result() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/classify"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "label": "unsafe",
            "confidence": 1.7
        })))
        .expect(1)
        .mount(&server)
        .await;

    let classifier = assert_ok!(HttpClassifier::new(HttpClassifierConfig {
        base_url: server.uri(),
        timeout: Duration::from_secs(5),
    }));
    let config = PipelineConfig {
        max_attempts: 1,
        ..test_config(1)
    };
    let pipeline = start(config, Arc::new(classifier)).await;

    let id = pipeline.submit("uploads/remote.mp4", "rosa").await.unwrap();
    let events = follow(&pipeline, &id).await;

    assert_eq!(
        events.last().map(|e| e.kind.clone()),
        Some(EventKind::Failed {
            error: ErrorCategory::InvalidResult,
            attempts: 1
        })
    );
    let job = pipeline.status(&id).await.unwrap();
    assert_eq!(job.state, JobState::Failed);
    assert_eq!(job.last_error, Some(ErrorCategory::InvalidResult));
    assert!(job.result.is_none());

    pipeline.shutdown().await;
}

#[tokio::test]
async fn test_start_recovers_unfinished_jobs() {
    let store = Arc::new(InMemoryJobStore::new());
    let claim = |j: &mut vmod_pipeline::Job| j.attempt += 1;

    let queued = store
        .create(MediaRef::new("uploads/q.mp4").unwrap(), "pat", 3)
        .await
        .unwrap();

    let orphaned = store
        .create(MediaRef::new("uploads/r.mp4").unwrap(), "pat", 3)
        .await
        .unwrap();
    store
        .transition(&orphaned, JobState::Queued, JobState::Running, &claim)
        .await
        .unwrap();

    let exhausted = store
        .create(MediaRef::new("uploads/x.mp4").unwrap(), "pat", 1)
        .await
        .unwrap();
    store
        .transition(&exhausted, JobState::Queued, JobState::Running, &claim)
        .await
        .unwrap();

    let pipeline = Pipeline::start(
        test_config(2),
        store.clone(),
        Arc::new(Delayed::new(Duration::from_millis(5), "safe", 0.9)),
    )
    .await
    .unwrap();

    follow(&pipeline, &queued).await;
    follow(&pipeline, &orphaned).await;

    let job = pipeline.status(&queued).await.unwrap();
    assert_eq!(job.state, JobState::Done);
    assert_eq!(job.attempt, 1);

    let job = pipeline.status(&orphaned).await.unwrap();
    assert_eq!(job.state, JobState::Done);
    assert_eq!(job.attempt, 2);

    let job = pipeline.status(&exhausted).await.unwrap();
    assert_eq!(job.state, JobState::Failed);
    assert_eq!(job.last_error, Some(ErrorCategory::Interrupted));

    let events = follow(&pipeline, &exhausted).await;
    assert_eq!(
        events.last().map(|e| e.kind.clone()),
        Some(EventKind::Failed {
            error: ErrorCategory::Interrupted,
            attempts: 1
        })
    );

    pipeline.shutdown().await;
}
