//! In-process job store.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tracing::debug;

use vmod_models::{Job, JobId, JobState, MediaRef};

use crate::error::{StoreError, StoreResult};
use crate::store::{apply_transition, sort_newest_first, JobStore, Mutator};

#[derive(Default)]
struct Tables {
    jobs: HashMap<JobId, Arc<Mutex<Job>>>,
    by_owner: HashMap<String, Vec<JobId>>,
}

/// Job store kept in memory.
///
/// Each job sits behind its own mutex; the table lock is only held to look
/// up or insert entries, so transitions on different jobs never contend.
#[derive(Default)]
pub struct InMemoryJobStore {
    tables: RwLock<Tables>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, id: &JobId) -> StoreResult<Arc<Mutex<Job>>> {
        self.tables
            .read()
            .jobs
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.clone()))
    }

    pub fn len(&self) -> usize {
        self.tables.read().jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn create(
        &self,
        media_ref: MediaRef,
        owner: &str,
        max_attempts: u32,
    ) -> StoreResult<JobId> {
        let job = Job::new(media_ref, owner, max_attempts);
        job.check_invariants()?;
        let id = job.id.clone();

        let mut tables = self.tables.write();
        if tables.jobs.contains_key(&id) {
            return Err(StoreError::unavailable(format!("duplicate job id {}", id)));
        }
        tables.jobs.insert(id.clone(), Arc::new(Mutex::new(job)));
        tables
            .by_owner
            .entry(owner.to_string())
            .or_default()
            .push(id.clone());

        debug!(job_id = %id, owner = owner, "Created job");
        Ok(id)
    }

    async fn get(&self, id: &JobId) -> StoreResult<Job> {
        let entry = self.entry(id)?;
        let job = entry.lock().clone();
        Ok(job)
    }

    async fn transition(
        &self,
        id: &JobId,
        expected: JobState,
        new: JobState,
        mutator: Mutator<'_>,
    ) -> StoreResult<Job> {
        let entry = self.entry(id)?;
        let mut job = entry.lock();
        let next = apply_transition(&job, expected, new, mutator)?;
        *job = next.clone();
        Ok(next)
    }

    async fn list_by_owner(&self, owner: &str) -> StoreResult<Vec<Job>> {
        let entries: Vec<_> = {
            let tables = self.tables.read();
            tables
                .by_owner
                .get(owner)
                .map(|ids| ids.iter().filter_map(|id| tables.jobs.get(id).cloned()).collect())
                .unwrap_or_default()
        };

        let mut jobs: Vec<Job> = entries.iter().map(|entry| entry.lock().clone()).collect();
        sort_newest_first(&mut jobs);
        Ok(jobs)
    }

    async fn list_by_state(&self, state: JobState) -> StoreResult<Vec<Job>> {
        let entries: Vec<_> = self.tables.read().jobs.values().cloned().collect();

        let mut jobs: Vec<Job> = entries
            .iter()
            .map(|entry| entry.lock().clone())
            .filter(|job| job.state == state)
            .collect();
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(jobs)
    }
}
