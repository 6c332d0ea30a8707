//! Job store contract.

use async_trait::async_trait;

use vmod_models::{Job, JobId, JobState, MediaRef};

use crate::error::{StoreError, StoreResult};

/// Field updates applied together with a state change.
///
/// Backends may call it more than once when they retry internally, so it
/// must only depend on the job it is given.
pub type Mutator<'a> = &'a (dyn Fn(&mut Job) + Send + Sync);

/// Mutator that only changes the state.
pub fn unchanged(_: &mut Job) {}

/// Durable record of moderation jobs.
///
/// `transition` is the only way to change a stored job and must be
/// linearizable per job id.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Create a queued job.
    async fn create(&self, media_ref: MediaRef, owner: &str, max_attempts: u32)
        -> StoreResult<JobId>;

    /// Fetch a snapshot of a job.
    async fn get(&self, id: &JobId) -> StoreResult<Job>;

    /// Compare-and-set the job state, applying `mutator` on success.
    ///
    /// Fails with [`StoreError::Conflict`] when the stored state is not
    /// `expected`. Returns the updated snapshot.
    async fn transition(
        &self,
        id: &JobId,
        expected: JobState,
        new: JobState,
        mutator: Mutator<'_>,
    ) -> StoreResult<Job>;

    /// Jobs submitted by `owner`, newest first.
    async fn list_by_owner(&self, owner: &str) -> StoreResult<Vec<Job>>;

    /// Jobs currently in `state`, oldest first.
    async fn list_by_state(&self, state: JobState) -> StoreResult<Vec<Job>>;
}

/// Validate a transition against `current` and build the next record.
///
/// Nothing is written by this function; the caller commits the returned
/// job atomically.
pub(crate) fn apply_transition(
    current: &Job,
    expected: JobState,
    new: JobState,
    mutator: Mutator<'_>,
) -> StoreResult<Job> {
    if !expected.can_transition_to(new) {
        return Err(StoreError::InvalidTransition {
            from: expected,
            to: new,
        });
    }
    if current.state != expected {
        return Err(StoreError::conflict(&current.id, expected, current.state));
    }

    let mut next = current.clone();
    mutator(&mut next);
    // The mutator may not touch identity or state.
    next.id = current.id.clone();
    next.state = new;
    next.created_at = current.created_at;
    next.touch();
    next.check_invariants()?;

    Ok(next)
}

/// Sort newest first, breaking timestamp ties by id for a stable order.
pub(crate) fn sort_newest_first(jobs: &mut [Job]) {
    jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
}
