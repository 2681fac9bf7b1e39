/// Per-user event buffers
///
/// Each user gets an ordered FIFO queue of pending notification events.
/// Queues are capped: when one is full the oldest event is evicted so a user
/// who never polls cannot grow the process without bound. Draining never
/// mutates a queue; the client acknowledges delivery by advancing the
/// `lastEventId` cursor on its next poll, and explicit removal goes through
/// `clear`.
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::models::{Event, EventId};

#[derive(Clone)]
pub struct EventQueue {
    capacity: usize,
    queues: Arc<RwLock<HashMap<Uuid, VecDeque<Event>>>>,
}

impl EventQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            queues: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Append an event to its recipient's queue.
    ///
    /// Returns the evicted event when the queue was at capacity.
    pub async fn push(&self, event: Event) -> Option<Event> {
        let mut queues = self.queues.write().await;
        let queue = queues.entry(event.user_id).or_default();
        let evicted = if queue.len() >= self.capacity {
            queue.pop_front()
        } else {
            None
        };
        queue.push_back(event);
        evicted
    }

    /// All events for `user_id` with an id strictly greater than `after`
    /// (all events when `after` is absent), in arrival order.
    ///
    /// Unknown users yield an empty vec, not an error. Does not mutate.
    pub async fn drain(&self, user_id: Uuid, after: Option<EventId>) -> Vec<Event> {
        let queues = self.queues.read().await;
        match queues.get(&user_id) {
            Some(queue) => queue
                .iter()
                .filter(|event| after.map_or(true, |last| event.id > last))
                .cloned()
                .collect(),
            None => Vec::new(),
        }
    }

    /// Empty the queue for `user_id`; returns whether anything was removed.
    pub async fn clear(&self, user_id: Uuid) -> bool {
        let mut queues = self.queues.write().await;
        queues.remove(&user_id).map(|q| !q.is_empty()).unwrap_or(false)
    }

    pub async fn queued_count(&self, user_id: Uuid) -> usize {
        let queues = self.queues.read().await;
        queues.get(&user_id).map(|q| q.len()).unwrap_or(0)
    }

    pub async fn total_queued(&self) -> usize {
        let queues = self.queues.read().await;
        queues.values().map(|q| q.len()).sum()
    }

    pub async fn users_with_events(&self) -> usize {
        let queues = self.queues.read().await;
        queues.values().filter(|q| !q.is_empty()).count()
    }
}
