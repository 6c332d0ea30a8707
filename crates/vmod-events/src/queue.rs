//! Bounded per-subscriber event buffer.

use std::collections::VecDeque;

use parking_lot::Mutex;
use tokio::sync::Notify;

use vmod_models::JobEvent;

/// What happened to an event offered to a subscriber queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// Appended without loss
    Enqueued,
    /// Appended after evicting the oldest buffered progress event
    EvictedOldest,
    /// The new progress event was discarded
    Dropped,
    /// The subscriber is closed or already holds its terminal event
    Ignored,
}

#[derive(Debug, Default)]
struct QueueState {
    events: VecDeque<JobEvent>,
    /// A terminal event has been enqueued; nothing follows it.
    finished: bool,
    /// The subscriber went away or the bus shut down.
    closed: bool,
}

/// Buffer between the bus and one subscriber.
///
/// Progress events are best effort; a terminal event is always accepted,
/// evicting the oldest progress event when the buffer is full.
#[derive(Debug)]
pub(crate) struct SubscriberQueue {
    capacity: usize,
    state: Mutex<QueueState>,
    notify: Notify,
}

impl SubscriberQueue {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
        }
    }

    pub(crate) fn push(&self, event: JobEvent) -> PushOutcome {
        let outcome = {
            let mut state = self.state.lock();
            if state.closed || state.finished {
                return PushOutcome::Ignored;
            }

            let mut outcome = PushOutcome::Enqueued;
            if state.events.len() >= self.capacity {
                match state.events.iter().position(|e| !e.is_terminal()) {
                    Some(oldest) => {
                        state.events.remove(oldest);
                        outcome = PushOutcome::EvictedOldest;
                    }
                    None if !event.is_terminal() => return PushOutcome::Dropped,
                    None => {}
                }
            }

            if event.is_terminal() {
                state.finished = true;
            }
            state.events.push_back(event);
            outcome
        };

        self.notify.notify_one();
        outcome
    }

    /// Next buffered event, or `None` once the queue is closed and drained.
    pub(crate) async fn pop(&self) -> Option<JobEvent> {
        loop {
            {
                let mut state = self.state.lock();
                if let Some(event) = state.events.pop_front() {
                    return Some(event);
                }
                if state.closed {
                    return None;
                }
            }
            self.notify.notified().await;
        }
    }

    #[cfg(test)]
    pub(crate) fn try_pop(&self) -> Option<JobEvent> {
        self.state.lock().events.pop_front()
    }

    pub(crate) fn close(&self) {
        self.state.lock().closed = true;
        self.notify.notify_one();
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.state.lock().finished
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.state.lock().events.len()
    }
}
