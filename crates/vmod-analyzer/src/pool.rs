//! Bounded pool of analyzer slots.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tracing::{debug, info, warn};

use vmod_models::{MediaRef, ModerationResult};

use crate::classifier::{AnalysisContext, Classifier};
use crate::error::{AnalyzerError, AnalyzerResult, ClassifyError};

/// Pool configuration.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Concurrent classifier calls allowed
    pub slots: usize,
    /// How long a cancelled or timed-out call may take to wind down before
    /// it is abandoned
    pub cancel_grace: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            slots: 2,
            cancel_grace: Duration::from_secs(2),
        }
    }
}

/// Permission to run one classifier call.
///
/// Dropping the slot releases it.
#[derive(Debug)]
pub struct Slot {
    _permit: OwnedSemaphorePermit,
}

enum Interrupt {
    Timeout,
    Cancelled,
}

/// Runs classifier calls, never more than `slots` at a time.
///
/// Every call runs in its own task that owns the slot. A call that ignores
/// cancellation keeps its slot until it returns, so an abandoned call can
/// never be overbooked by new work.
pub struct AnalyzerPool {
    classifier: Arc<dyn Classifier>,
    semaphore: Arc<Semaphore>,
    config: PoolConfig,
    quarantined: Arc<AtomicUsize>,
}

impl AnalyzerPool {
    pub fn new(classifier: Arc<dyn Classifier>, config: PoolConfig) -> Self {
        let slots = config.slots.max(1);
        Self {
            classifier,
            semaphore: Arc::new(Semaphore::new(slots)),
            config: PoolConfig { slots, ..config },
            quarantined: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Wait for a free slot.
    pub async fn acquire(&self) -> AnalyzerResult<Slot> {
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| AnalyzerError::PoolClosed)?;
        Ok(Slot { _permit: permit })
    }

    /// Take a free slot without waiting.
    pub fn try_acquire(&self) -> AnalyzerResult<Slot> {
        match Arc::clone(&self.semaphore).try_acquire_owned() {
            Ok(permit) => Ok(Slot { _permit: permit }),
            Err(TryAcquireError::NoPermits) => Err(AnalyzerError::Busy),
            Err(TryAcquireError::Closed) => Err(AnalyzerError::PoolClosed),
        }
    }

    /// Give a slot back without using it.
    pub fn release(&self, slot: Slot) {
        drop(slot);
    }

    /// Run the classifier for `media_ref` in `slot`.
    ///
    /// `ctx.cancel` is cancelled by the pool when the call times out, so it
    /// should be a token private to this attempt.
    pub async fn run(
        &self,
        slot: Slot,
        media_ref: MediaRef,
        ctx: AnalysisContext,
    ) -> AnalyzerResult<ModerationResult> {
        let classifier = Arc::clone(&self.classifier);
        let cancel = ctx.cancel.clone();
        let timeout = ctx.timeout;
        let job_id = ctx.job_id.clone();
        let started = Instant::now();

        let mut call = tokio::spawn(async move {
            let _slot = slot;
            classifier.classify(&media_ref, ctx).await
        });

        let interrupt = tokio::select! {
            joined = &mut call => {
                return match joined {
                    Ok(Ok(result)) => Ok(result),
                    Ok(Err(ClassifyError::Failed(msg))) => Err(AnalyzerError::Analysis(msg)),
                    Ok(Err(ClassifyError::Timeout)) => Err(AnalyzerError::Timeout { after: started.elapsed() }),
                    Ok(Err(ClassifyError::Cancelled)) => Err(AnalyzerError::Cancelled),
                    Err(e) => Err(AnalyzerError::analysis(format!("analyzer task failed: {}", e))),
                };
            }
            _ = tokio::time::sleep(timeout) => Interrupt::Timeout,
            _ = cancel.cancelled() => Interrupt::Cancelled,
        };

        cancel.cancel();
        if tokio::time::timeout(self.config.cancel_grace, &mut call).await.is_err() {
            let quarantined = self.quarantined.fetch_add(1, Ordering::SeqCst) + 1;
            warn!(
                job_id = %job_id,
                quarantined = quarantined,
                "Analyzer ignored cancellation, slot held until it returns"
            );
            let counter = Arc::clone(&self.quarantined);
            tokio::spawn(async move {
                let _ = call.await;
                counter.fetch_sub(1, Ordering::SeqCst);
                info!(job_id = %job_id, "Abandoned analyzer call returned, slot released");
            });
        } else {
            debug!(job_id = %job_id, "Interrupted analyzer call wound down");
        }

        Err(match interrupt {
            Interrupt::Timeout => AnalyzerError::Timeout { after: timeout },
            Interrupt::Cancelled => AnalyzerError::Cancelled,
        })
    }

    /// Refuse new acquisitions; pending `acquire` calls fail.
    pub fn close(&self) {
        self.semaphore.close();
    }

    pub fn slots(&self) -> usize {
        self.config.slots
    }

    /// Free slots.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Slots held, including quarantined ones.
    pub fn in_flight(&self) -> usize {
        self.config.slots.saturating_sub(self.available())
    }

    /// Slots held by abandoned calls.
    pub fn quarantined(&self) -> usize {
        self.quarantined.load(Ordering::SeqCst)
    }
}
