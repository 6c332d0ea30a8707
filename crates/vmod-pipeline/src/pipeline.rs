//! Pipeline facade.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use vmod_analyzer::{AnalyzerPool, Classifier, PoolConfig};
use vmod_events::{EventBus, Subscription};
use vmod_models::{EventKind, Job, JobId, MediaRef};
use vmod_store::JobStore;

use crate::config::PipelineConfig;
use crate::dispatcher::Dispatcher;
use crate::error::{CancelOutcome, PipelineError, PipelineResult};
use crate::metrics;

/// Entry point for submitting and observing moderation jobs.
///
/// Owns the event bus, the analyzer pool and the dispatch loop. Nothing is
/// global: two pipelines over two stores are fully independent.
pub struct Pipeline {
    config: PipelineConfig,
    store: Arc<dyn JobStore>,
    bus: EventBus,
    dispatcher: Arc<Dispatcher>,
    dispatch_loop: Mutex<Option<JoinHandle<()>>>,
}

impl Pipeline {
    /// Build the pipeline, recover unfinished jobs and start dispatching.
    pub async fn start(
        config: PipelineConfig,
        store: Arc<dyn JobStore>,
        classifier: Arc<dyn Classifier>,
    ) -> PipelineResult<Self> {
        let config = config.normalized();
        let bus = EventBus::new(config.event_buffer);
        let pool = Arc::new(AnalyzerPool::new(
            classifier,
            PoolConfig {
                slots: config.analyzer_slots,
                cancel_grace: config.cancel_grace,
            },
        ));

        let (dispatcher, ready) =
            Dispatcher::new(config.clone(), Arc::clone(&store), pool, bus.clone());

        let recovered = dispatcher.recover().await.map_err(PipelineError::Storage)?;
        if recovered > 0 {
            info!(recovered = recovered, "Recovered unfinished jobs");
        }

        let dispatch_loop = tokio::spawn(Arc::clone(&dispatcher).run(ready));
        info!(
            slots = config.analyzer_slots,
            max_attempts = config.max_attempts,
            "Pipeline started"
        );

        Ok(Self {
            config,
            store,
            bus,
            dispatcher,
            dispatch_loop: Mutex::new(Some(dispatch_loop)),
        })
    }

    /// Submit media for moderation.
    pub async fn submit(&self, media_ref: impl Into<String>, owner: &str) -> PipelineResult<JobId> {
        self.ensure_running()?;

        let media_ref =
            MediaRef::new(media_ref).map_err(|e| PipelineError::invalid_request(e.to_string()))?;
        if owner.trim().is_empty() {
            return Err(PipelineError::invalid_request("owner must not be empty"));
        }

        let id = self
            .store
            .create(media_ref, owner, self.config.max_attempts)
            .await
            .map_err(PipelineError::Storage)?;

        metrics::record_job_submitted();
        info!(job_id = %id, owner = owner, "Job submitted");
        self.dispatcher.enqueue(id.clone());
        Ok(id)
    }

    /// Snapshot of a job.
    pub async fn status(&self, id: &JobId) -> PipelineResult<Job> {
        self.store
            .get(id)
            .await
            .map_err(|e| PipelineError::from_store(id, e))
    }

    /// Jobs submitted by `owner`, newest first.
    pub async fn list(&self, owner: &str) -> PipelineResult<Vec<Job>> {
        self.store
            .list_by_owner(owner)
            .await
            .map_err(PipelineError::Storage)
    }

    /// Cancel a queued or running job.
    ///
    /// Cancelling a finished job is not an error; the outcome reports the
    /// state it finished in.
    pub async fn cancel(&self, id: &JobId) -> PipelineResult<CancelOutcome> {
        let outcome = self.dispatcher.cancel(id).await?;
        if let CancelOutcome::AlreadyTerminal(state) = outcome {
            warn!(job_id = %id, state = %state, "Cancel ignored, job already finished");
        }
        Ok(outcome)
    }

    /// Follow a job's events until it reaches a terminal state.
    ///
    /// A job that is already terminal yields its terminal event and ends.
    pub async fn subscribe(&self, id: &JobId) -> PipelineResult<Subscription> {
        self.ensure_running()?;

        // Subscribe before reading so a terminal event published in between
        // is either buffered or reflected in the snapshot.
        let subscription = self.bus.subscribe(id);
        let job = self.status(id).await?;

        if let Some(kind) = EventKind::terminal_for(
            job.state,
            job.result.as_ref(),
            job.last_error,
            job.attempt,
        ) {
            subscription.ensure_terminal(kind);
        }
        Ok(subscription)
    }

    /// The pipeline's event bus.
    pub fn events(&self) -> &EventBus {
        &self.bus
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Stop dispatching and wait for in-flight jobs.
    ///
    /// Jobs still queued stay queued in the store and are picked up by the
    /// next pipeline started over it.
    pub async fn shutdown(&self) {
        if self.dispatcher.is_stopping() {
            return;
        }
        info!("Pipeline shutting down");

        let dispatch_loop = self.dispatch_loop.lock().take();
        self.dispatcher.shutdown(dispatch_loop).await;
        self.bus.close();

        info!("Pipeline shutdown complete");
    }

    fn ensure_running(&self) -> PipelineResult<()> {
        if self.dispatcher.is_stopping() {
            Err(PipelineError::ShuttingDown)
        } else {
            Ok(())
        }
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        if let Some(handle) = self.dispatch_loop.get_mut().take() {
            handle.abort();
        }
    }
}
