//! Job dispatcher.
//!
//! Moves jobs through their state machine: claims queued jobs once an
//! analyzer slot is free, runs the analyzer, and commits the outcome.
//! Every state change goes through [`JobStore::transition`]; whoever loses a
//! compare-and-set race backs off silently.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn, Instrument};

use vmod_analyzer::{AnalysisContext, AnalyzerError, AnalyzerPool, ProgressReporter, Slot};
use vmod_events::EventBus;
use vmod_models::{ErrorCategory, EventKind, Job, JobId, JobState, ModerationResult};
use vmod_store::{unchanged, JobStore, StoreError, StoreResult};

use crate::config::PipelineConfig;
use crate::error::{CancelOutcome, PipelineError, PipelineResult};
use crate::logging::JobLogger;
use crate::metrics;

/// Failed claims logged per store outage before the loop goes quiet.
const MAX_LOGGED_CLAIM_FAILURES: u32 = 3;

/// Tracks a run of claims that failed because the store was unreachable,
/// so an outage produces a few warnings instead of one per job.
#[derive(Debug, Default)]
struct StoreOutage {
    since: Option<Instant>,
    failed_claims: u32,
}

impl StoreOutage {
    /// Returns `true` if this failure should be logged.
    fn claim_failed(&mut self) -> bool {
        self.since.get_or_insert_with(Instant::now);
        self.failed_claims += 1;

        if self.failed_claims == MAX_LOGGED_CLAIM_FAILURES + 1 {
            warn!(
                failed_claims = self.failed_claims,
                "Store still unavailable, muting claim failures until it recovers"
            );
        }
        self.failed_claims <= MAX_LOGGED_CLAIM_FAILURES
    }

    fn claim_succeeded(&mut self) {
        if let Some(since) = self.since.take() {
            info!(
                failed_claims = self.failed_claims,
                outage_ms = u64::try_from(since.elapsed().as_millis()).unwrap_or(u64::MAX),
                "Store reachable again"
            );
        }
        self.failed_claims = 0;
    }

    fn is_ongoing(&self) -> bool {
        self.since.is_some()
    }
}

pub(crate) struct Dispatcher {
    store: Arc<dyn JobStore>,
    pool: Arc<AnalyzerPool>,
    bus: EventBus,
    config: PipelineConfig,
    ready: mpsc::UnboundedSender<JobId>,
    /// Cancellation handles of claimed jobs, keyed by job id
    inflight: Mutex<HashMap<JobId, CancellationToken>>,
    /// Attempts and retry timers
    tasks: TaskTracker,
    /// Stops claiming new work
    stop: CancellationToken,
    /// Interrupts in-flight attempts; parent of every attempt token
    halt: CancellationToken,
}

impl Dispatcher {
    pub(crate) fn new(
        config: PipelineConfig,
        store: Arc<dyn JobStore>,
        pool: Arc<AnalyzerPool>,
        bus: EventBus,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<JobId>) {
        let (ready, ready_rx) = mpsc::unbounded_channel();
        let dispatcher = Arc::new(Self {
            store,
            pool,
            bus,
            config,
            ready,
            inflight: Mutex::new(HashMap::new()),
            tasks: TaskTracker::new(),
            stop: CancellationToken::new(),
            halt: CancellationToken::new(),
        });
        (dispatcher, ready_rx)
    }

    pub(crate) fn is_stopping(&self) -> bool {
        self.stop.is_cancelled()
    }

    /// Make a queued job eligible for dispatch.
    pub(crate) fn enqueue(&self, id: JobId) {
        if self.ready.send(id).is_err() {
            debug!("Dispatch queue closed, job left queued");
        }
    }

    /// Enqueue `id` after `delay`, unless the dispatcher stops first.
    fn enqueue_after(&self, id: JobId, delay: Duration) {
        let ready = self.ready.clone();
        let stop = self.stop.clone();
        self.tasks.spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {
                    let _ = ready.send(id);
                }
                _ = stop.cancelled() => {}
            }
        });
    }

    /// Pick up jobs left behind by a previous process.
    ///
    /// Queued jobs are enqueued again. Running jobs were orphaned mid-attempt:
    /// they return to the queue if they have attempts left and fail with
    /// [`ErrorCategory::Interrupted`] otherwise. Returns the number of jobs
    /// recovered.
    pub(crate) async fn recover(&self) -> StoreResult<usize> {
        let mut recovered = 0;

        for job in self.store.list_by_state(JobState::Queued).await? {
            self.enqueue(job.id);
            recovered += 1;
        }

        let set_interrupted = |j: &mut Job| j.last_error = Some(ErrorCategory::Interrupted);
        for job in self.store.list_by_state(JobState::Running).await? {
            let next = if job.has_attempts_left() {
                JobState::Queued
            } else {
                JobState::Failed
            };

            match self
                .store
                .transition(&job.id, JobState::Running, next, &set_interrupted)
                .await
            {
                Ok(updated) if next == JobState::Queued => {
                    info!(job_id = %job.id, attempt = updated.attempt, "Requeued interrupted job");
                    self.enqueue(updated.id);
                }
                Ok(updated) => {
                    warn!(job_id = %job.id, attempts = updated.attempt, "Interrupted job has no attempts left");
                    metrics::record_job_failed(ErrorCategory::Interrupted.as_str());
                    self.bus.publish(
                        &updated.id,
                        EventKind::Failed {
                            error: ErrorCategory::Interrupted,
                            attempts: updated.attempt,
                        },
                    );
                }
                Err(e) if e.is_conflict() => {
                    debug!(job_id = %job.id, "Interrupted job changed state during recovery");
                    continue;
                }
                Err(e) => return Err(e),
            }
            recovered += 1;
        }

        Ok(recovered)
    }

    /// Dispatch loop: one slot, then one claim, until stopped.
    pub(crate) async fn run(self: Arc<Self>, mut ready: mpsc::UnboundedReceiver<JobId>) {
        let mut outage = StoreOutage::default();
        info!(slots = self.pool.slots(), "Dispatch loop started");

        loop {
            let id = tokio::select! {
                biased;
                _ = self.stop.cancelled() => break,
                next = ready.recv() => match next {
                    Some(id) => id,
                    None => break,
                },
            };

            let slot = tokio::select! {
                biased;
                _ = self.stop.cancelled() => break,
                slot = self.pool.acquire() => match slot {
                    Ok(slot) => slot,
                    Err(e) => {
                        debug!("Stopping dispatch: {}", e);
                        break;
                    }
                },
            };

            self.claim(id, slot, &mut outage).await;
        }

        info!("Dispatch loop stopped");
    }

    async fn claim(self: &Arc<Self>, id: JobId, slot: Slot, outage: &mut StoreOutage) {
        let token = match self.inflight.lock().entry(id.clone()) {
            Entry::Occupied(_) => {
                debug!(job_id = %id, "Job already in flight, skipping duplicate dispatch");
                return;
            }
            Entry::Vacant(entry) => entry.insert(self.halt.child_token()).clone(),
        };

        let claimed = self
            .store
            .transition(&id, JobState::Queued, JobState::Running, &|job: &mut Job| job.attempt += 1)
            .await;

        match claimed {
            Ok(job) => {
                outage.claim_succeeded();
                let this = Arc::clone(self);
                self.tasks.spawn(async move { this.run_attempt(job, slot, token).await });
            }
            Err(e) => {
                self.inflight.lock().remove(&id);
                self.pool.release(slot);

                if e.is_storage() {
                    if outage.claim_failed() {
                        warn!(job_id = %id, "Failed to claim job, retrying later: {}", e);
                    }
                    self.enqueue_after(id, self.config.backoff.base());
                } else {
                    debug!(job_id = %id, "Job not claimable: {}", e);
                }
            }
        }
    }

    async fn run_attempt(self: Arc<Self>, job: Job, slot: Slot, token: CancellationToken) {
        let logger = JobLogger::new(&job.id, job.attempt);
        let span = logger.create_span();

        async {
            logger.log_start(job.media_ref.as_str());
            self.bus.publish(&job.id, EventKind::Started { attempt: job.attempt });

            let ctx = AnalysisContext::new(job.id.clone(), job.attempt, self.config.analyzer_timeout)
                .with_cancel(token.clone())
                .with_progress(self.progress_reporter(&job.id, &token, &logger));

            metrics::set_analyzer_gauges(self.pool.in_flight(), self.pool.quarantined());
            let started = Instant::now();
            let outcome = self.pool.run(slot, job.media_ref.clone(), ctx).await;
            let elapsed = started.elapsed().as_secs_f64();

            self.inflight.lock().remove(&job.id);
            metrics::set_analyzer_gauges(self.pool.in_flight(), self.pool.quarantined());

            match outcome {
                Ok(result) => match result.validate() {
                    Ok(()) => {
                        metrics::record_analyzer_duration("ok", elapsed);
                        self.complete(&job, result, &logger).await;
                    }
                    Err(e) => {
                        metrics::record_analyzer_duration(ErrorCategory::InvalidResult.as_str(), elapsed);
                        logger.log_warning(&format!("Analyzer returned an invalid result: {}", e));
                        self.fail_attempt(&job, ErrorCategory::InvalidResult, &logger).await;
                    }
                },
                Err(AnalyzerError::Timeout { after }) => {
                    metrics::record_analyzer_duration(ErrorCategory::Timeout.as_str(), elapsed);
                    logger.log_warning(&format!("Analyzer timed out after {:?}", after));
                    self.fail_attempt(&job, ErrorCategory::Timeout, &logger).await;
                }
                Err(AnalyzerError::Cancelled) if self.halt.is_cancelled() => {
                    logger.log_warning("Attempt interrupted by shutdown, job left for recovery");
                }
                Err(AnalyzerError::Cancelled) if token.is_cancelled() => {
                    // The cancel request already committed the state change.
                    debug!(job_id = %job.id, "Attempt cancelled");
                }
                Err(e) => {
                    metrics::record_analyzer_duration(ErrorCategory::Analysis.as_str(), elapsed);
                    logger.log_warning(&format!("Analyzer failed: {}", e));
                    self.fail_attempt(&job, ErrorCategory::Analysis, &logger).await;
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Reporter that turns analyzer milestones into coalesced progress events.
    fn progress_reporter(
        &self,
        id: &JobId,
        token: &CancellationToken,
        logger: &JobLogger,
    ) -> ProgressReporter {
        let bus = self.bus.clone();
        let id = id.clone();
        let token = token.clone();
        let logger = logger.clone();
        let step = self.config.progress_step;
        let last = AtomicU8::new(0);

        ProgressReporter::new(move |percent| {
            if token.is_cancelled() {
                return;
            }
            let advanced = last
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |prev| {
                    let due = percent >= prev.saturating_add(step) || (percent == 100 && prev < 100);
                    due.then_some(percent)
                })
                .is_ok();
            if advanced {
                logger.log_progress(percent);
                bus.publish(&id, EventKind::progress(percent));
            }
        })
    }

    async fn complete(&self, job: &Job, result: ModerationResult, logger: &JobLogger) {
        let stored = result.clone();
        let committed = self
            .store
            .transition(&job.id, JobState::Running, JobState::Done, &move |j: &mut Job| {
                j.result = Some(stored.clone());
                j.last_error = None;
            })
            .await;

        match committed {
            Ok(_) => {
                logger.log_completion(&format!("{} ({:.2})", result.label, result.confidence));
                metrics::record_job_completed(&result.label);
                self.bus.publish(&job.id, EventKind::Done { result });
            }
            Err(e) => self.commit_failed(&job.id, e, logger),
        }
    }

    async fn fail_attempt(&self, job: &Job, category: ErrorCategory, logger: &JobLogger) {
        let set_error = move |j: &mut Job| j.last_error = Some(category);

        if job.has_attempts_left() {
            let delay = self.config.backoff.delay_for_attempt(job.attempt);
            match self
                .store
                .transition(&job.id, JobState::Running, JobState::Queued, &set_error)
                .await
            {
                Ok(_) => {
                    logger.log_warning(&format!(
                        "Attempt {}/{} failed ({}), retrying in {:?}",
                        job.attempt, job.max_attempts, category, delay
                    ));
                    metrics::record_job_retry(category.as_str());
                    self.bus.publish(
                        &job.id,
                        EventKind::Retrying {
                            attempt: job.attempt,
                            delay_ms: u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                            error: category,
                        },
                    );
                    self.enqueue_after(job.id.clone(), delay);
                }
                Err(e) => self.commit_failed(&job.id, e, logger),
            }
        } else {
            match self
                .store
                .transition(&job.id, JobState::Running, JobState::Failed, &set_error)
                .await
            {
                Ok(updated) => {
                    logger.log_error(&format!(
                        "Giving up after {} attempts ({})",
                        updated.attempt, category
                    ));
                    metrics::record_job_failed(category.as_str());
                    self.bus.publish(
                        &job.id,
                        EventKind::Failed {
                            error: category,
                            attempts: updated.attempt,
                        },
                    );
                }
                Err(e) => self.commit_failed(&job.id, e, logger),
            }
        }
    }

    fn commit_failed(&self, id: &JobId, err: StoreError, logger: &JobLogger) {
        if err.is_conflict() {
            debug!(job_id = %id, "Outcome dropped, job changed state: {}", err);
        } else {
            logger.log_error(&format!("Failed to record outcome: {}", err));
        }
    }

    /// Cancel a queued or running job.
    pub(crate) async fn cancel(&self, id: &JobId) -> PipelineResult<CancelOutcome> {
        loop {
            let job = self
                .store
                .get(id)
                .await
                .map_err(|e| PipelineError::from_store(id, e))?;

            if job.is_terminal() {
                debug!(job_id = %id, state = %job.state, "Cancel requested for finished job");
                return Ok(CancelOutcome::AlreadyTerminal(job.state));
            }

            match self
                .store
                .transition(id, job.state, JobState::Cancelled, &unchanged)
                .await
            {
                Ok(_) => {
                    let token = self.inflight.lock().get(id).cloned();
                    if let Some(token) = token {
                        token.cancel();
                    }
                    info!(job_id = %id, from = %job.state, "Job cancelled");
                    metrics::record_job_cancelled();
                    self.bus.publish(id, EventKind::Cancelled);
                    return Ok(CancelOutcome::Cancelled);
                }
                Err(e) if e.is_conflict() => {
                    debug!(job_id = %id, "Job moved while cancelling, re-reading");
                }
                Err(e) => return Err(PipelineError::from_store(id, e)),
            }
        }
    }

    /// Stop claiming, drain in-flight attempts, close the pool.
    ///
    /// The dispatch loop is awaited before draining so a claim that was
    /// already under way has spawned its attempt by the time the tracker is
    /// closed. Attempts still running after `shutdown_timeout` are
    /// interrupted and their jobs stay `Running` until the next start
    /// recovers them.
    pub(crate) async fn shutdown(&self, dispatch_loop: Option<JoinHandle<()>>) {
        self.stop.cancel();
        if let Some(handle) = dispatch_loop {
            if let Err(e) = handle.await {
                warn!("Dispatch loop ended abnormally: {}", e);
            }
        }
        self.tasks.close();

        if tokio::time::timeout(self.config.shutdown_timeout, self.tasks.wait())
            .await
            .is_err()
        {
            warn!(
                remaining = self.tasks.len(),
                "Shutdown timeout reached, interrupting in-flight jobs"
            );
            self.halt.cancel();
            let _ = tokio::time::timeout(self.config.cancel_grace.saturating_mul(2), self.tasks.wait()).await;
        }

        self.pool.close();
        metrics::set_analyzer_gauges(self.pool.in_flight(), self.pool.quarantined());
    }
}
