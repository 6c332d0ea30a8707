//! Per-job publish/subscribe.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use futures_util::Stream;
use parking_lot::Mutex;
use tracing::{debug, trace};

use vmod_models::{EventKind, JobEvent, JobId};

use crate::queue::{PushOutcome, SubscriberQueue};

/// Counter for progress events lost to full subscriber buffers.
pub const EVENTS_DROPPED_TOTAL: &str = "vmod_events_dropped_total";

/// Default per-subscriber buffer size.
pub const DEFAULT_CAPACITY: usize = 64;

#[derive(Default)]
struct JobChannel {
    next_seq: u64,
    subscribers: Vec<(u64, Arc<SubscriberQueue>)>,
}

struct BusInner {
    capacity: usize,
    channels: Mutex<HashMap<JobId, JobChannel>>,
    next_subscriber: AtomicU64,
    dropped: AtomicU64,
}

/// Event bus delivering job events to subscribers.
///
/// `publish` never blocks on slow subscribers: each subscriber has its own
/// bounded buffer. Once a terminal event is published for a job, the job's
/// current subscribers are retired.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("capacity", &self.inner.capacity)
            .field("dropped", &self.dropped_events())
            .finish()
    }
}

impl EventBus {
    /// Create a bus with the given per-subscriber buffer size.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(BusInner {
                capacity: capacity.max(1),
                channels: Mutex::new(HashMap::new()),
                next_subscriber: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
            }),
        }
    }

    /// Publish an event for a job.
    ///
    /// Returns the number of subscribers that accepted it.
    pub fn publish(&self, job_id: &JobId, kind: EventKind) -> usize {
        let terminal = kind.is_terminal();
        let mut channels = self.inner.channels.lock();

        let Some(channel) = channels.get_mut(job_id) else {
            trace!(job_id = %job_id, kind = kind.as_str(), "No subscribers for event");
            return 0;
        };

        let event = JobEvent::new(job_id.clone(), channel.next_seq, kind);
        channel.next_seq += 1;

        let mut delivered = 0;
        for (_, queue) in &channel.subscribers {
            match queue.push(event.clone()) {
                PushOutcome::Enqueued => delivered += 1,
                PushOutcome::EvictedOldest => {
                    delivered += 1;
                    self.record_drop(job_id);
                }
                PushOutcome::Dropped => self.record_drop(job_id),
                PushOutcome::Ignored => {}
            }
        }

        if terminal {
            channels.remove(job_id);
            debug!(job_id = %job_id, delivered = delivered, "Published terminal event");
        }

        delivered
    }

    /// Subscribe to a job's events.
    pub fn subscribe(&self, job_id: &JobId) -> Subscription {
        let id = self.inner.next_subscriber.fetch_add(1, Ordering::Relaxed);
        let queue = Arc::new(SubscriberQueue::new(self.inner.capacity));

        self.inner
            .channels
            .lock()
            .entry(job_id.clone())
            .or_default()
            .subscribers
            .push((id, Arc::clone(&queue)));

        Subscription {
            job_id: job_id.clone(),
            id,
            queue,
            bus: Arc::downgrade(&self.inner),
            done: false,
        }
    }

    /// Number of live subscribers for a job.
    pub fn subscriber_count(&self, job_id: &JobId) -> usize {
        self.inner
            .channels
            .lock()
            .get(job_id)
            .map(|c| c.subscribers.len())
            .unwrap_or(0)
    }

    /// Progress events lost to full buffers since the bus was created.
    pub fn dropped_events(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }

    /// End every open subscription.
    pub fn close(&self) {
        let channels = std::mem::take(&mut *self.inner.channels.lock());
        for (_, channel) in channels {
            for (_, queue) in channel.subscribers {
                queue.close();
            }
        }
    }

    fn record_drop(&self, job_id: &JobId) {
        self.inner.dropped.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(EVENTS_DROPPED_TOTAL).increment(1);
        trace!(job_id = %job_id, "Dropped progress event for slow subscriber");
    }
}

/// Stream of one job's events.
///
/// Ends after the terminal event, on [`Subscription::unsubscribe`], or when
/// the bus closes. Dropping it unsubscribes.
pub struct Subscription {
    job_id: JobId,
    id: u64,
    queue: Arc<SubscriberQueue>,
    bus: Weak<BusInner>,
    done: bool,
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("job_id", &self.job_id)
            .field("id", &self.id)
            .field("done", &self.done)
            .finish()
    }
}

impl Subscription {
    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    /// Wait for the next event. `None` once the stream has ended.
    pub async fn recv(&mut self) -> Option<JobEvent> {
        if self.done {
            return None;
        }
        match self.queue.pop().await {
            Some(event) => {
                if event.is_terminal() {
                    self.finish();
                }
                Some(event)
            }
            None => {
                self.finish();
                None
            }
        }
    }

    /// Make sure this subscription ends with a terminal event.
    ///
    /// Used when the job was already terminal at subscribe time and its
    /// terminal event may have been published before this subscriber
    /// registered. Does nothing if a terminal event is already buffered.
    /// Replayed events carry sequence number 0.
    pub fn ensure_terminal(&self, kind: EventKind) {
        if kind.is_terminal() && !self.queue.is_finished() {
            self.queue.push(JobEvent::new(self.job_id.clone(), 0, kind));
        }
    }

    /// Stop receiving events.
    pub fn unsubscribe(mut self) {
        self.finish();
    }

    /// Consume the subscription as a `Stream`.
    pub fn into_stream(self) -> impl Stream<Item = JobEvent> + Send {
        futures_util::stream::unfold(self, |mut sub| async move {
            sub.recv().await.map(|event| (event, sub))
        })
    }

    fn finish(&mut self) {
        if self.done {
            return;
        }
        self.done = true;
        self.queue.close();
        if let Some(bus) = self.bus.upgrade() {
            let mut channels = bus.channels.lock();
            if let Some(channel) = channels.get_mut(&self.job_id) {
                channel.subscribers.retain(|(id, _)| *id != self.id);
                if channel.subscribers.is_empty() {
                    channels.remove(&self.job_id);
                }
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.finish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vmod_models::{ErrorCategory, ModerationResult};

    #[tokio::test]
    async fn test_events_delivered_in_order() {
        let bus = EventBus::new(16);
        let job = JobId::new();
        let mut sub = bus.subscribe(&job);

        bus.publish(&job, EventKind::Started { attempt: 1 });
        bus.publish(&job, EventKind::progress(50));
        bus.publish(
            &job,
            EventKind::Done {
                result: ModerationResult::new("safe", 0.9).unwrap(),
            },
        );

        let mut seqs = Vec::new();
        while let Some(event) = sub.recv().await {
            seqs.push(event.seq);
        }
        assert_eq!(seqs, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_terminal_retires_subscribers() {
        let bus = EventBus::new(4);
        let job = JobId::new();
        let _a = bus.subscribe(&job);
        let _b = bus.subscribe(&job);
        assert_eq!(bus.subscriber_count(&job), 2);

        let delivered = bus.publish(
            &job,
            EventKind::Failed {
                error: ErrorCategory::Timeout,
                attempts: 3,
            },
        );
        assert_eq!(delivered, 2);
        assert_eq!(bus.subscriber_count(&job), 0);
    }

    #[tokio::test]
    async fn test_other_jobs_not_delivered() {
        let bus = EventBus::new(4);
        let job = JobId::new();
        let other = JobId::new();
        let mut sub = bus.subscribe(&job);

        assert_eq!(bus.publish(&other, EventKind::progress(10)), 0);
        bus.publish(&job, EventKind::Cancelled);

        assert_eq!(sub.recv().await.unwrap().kind, EventKind::Cancelled);
        assert!(sub.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_drop_unsubscribes() {
        let bus = EventBus::new(4);
        let job = JobId::new();
        let sub = bus.subscribe(&job);
        assert_eq!(bus.subscriber_count(&job), 1);

        drop(sub);
        assert_eq!(bus.subscriber_count(&job), 0);
        assert_eq!(bus.publish(&job, EventKind::progress(5)), 0);
    }

    #[tokio::test]
    async fn test_ensure_terminal_without_duplicate() {
        let bus = EventBus::new(4);
        let job = JobId::new();

        let mut late = bus.subscribe(&job);
        late.ensure_terminal(EventKind::Cancelled);
        assert_eq!(late.recv().await.unwrap().seq, 0);
        assert!(late.recv().await.is_none());

        let mut raced = bus.subscribe(&job);
        bus.publish(&job, EventKind::progress(90));
        bus.publish(&job, EventKind::Cancelled);
        raced.ensure_terminal(EventKind::Cancelled);

        let mut terminals = 0;
        while let Some(event) = raced.recv().await {
            if event.is_terminal() {
                terminals += 1;
            }
        }
        assert_eq!(terminals, 1);
    }

    #[tokio::test]
    async fn test_close_ends_streams() {
        let bus = EventBus::new(4);
        let job = JobId::new();
        let mut sub = bus.subscribe(&job);

        bus.close();
        assert!(sub.recv().await.is_none());
    }
}
