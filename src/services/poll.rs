/// Poll coordinator
///
/// Ties the per-user event queues to the connection registry. A poll request
/// either drains pending events immediately or parks until a matching event
/// arrives, a newer poll replaces it, the client disconnects, or the wait
/// window elapses. Producers publish through this service; a publish either
/// resolves a parked poll directly (bypassing the queue) or lands in the
/// recipient's buffer.
use std::collections::HashSet;
use std::time::Duration;

use tokio::time::timeout;
use uuid::Uuid;

use super::queue::EventQueue;
use super::registry::{ConnectionRegistry, PollOutcome, RegistryStats};
use crate::config::PollConfig;
use crate::metrics;
use crate::models::{Event, EventId, EventIdGenerator, EventKind};

/// Options accompanying a poll request
#[derive(Debug, Clone, Default)]
pub struct PollOptions {
    /// Newest event id the client has already seen
    pub last_event_id: Option<EventId>,
    /// Teams the caller wants events for; membership is validated upstream
    pub team_ids: HashSet<Uuid>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct PollServiceStats {
    pub active_connections: usize,
    pub per_team_counts: std::collections::HashMap<Uuid, usize>,
    pub queued_events: usize,
    pub users_with_events: usize,
}

pub struct PollService {
    queue: EventQueue,
    registry: ConnectionRegistry,
    ids: EventIdGenerator,
    wait: Duration,
}

impl PollService {
    pub fn new(config: &PollConfig) -> Self {
        Self {
            queue: EventQueue::new(config.queue_capacity),
            registry: ConnectionRegistry::new(),
            ids: EventIdGenerator::new(),
            wait: config.wait(),
        }
    }

    /// Publish an event addressed to `user_id`, scoped to `team_id`.
    ///
    /// Delivered straight to a parked poll whose filter and cursor match,
    /// queued otherwise. Returns the event with its assigned id.
    pub async fn publish(
        &self,
        user_id: Uuid,
        team_id: Uuid,
        kind: EventKind,
        payload: serde_json::Value,
    ) -> Event {
        let event = Event::new(self.ids.next_id(), user_id, team_id, kind, payload);

        if let Some(sender) = self.registry.take_matching(&event).await {
            if sender.send(PollOutcome::Events(vec![event.clone()])).is_ok() {
                tracing::debug!(
                    user_id = %event.user_id,
                    event_id = %event.id,
                    kind = event.kind.as_str(),
                    "delivered event to parked poll"
                );
                metrics::observe_events_delivered(1);
                metrics::set_parked_connections(self.registry.active_connections().await);
                return event;
            }
            // Client vanished between match and send; fall through and queue
            // so the event survives for the next poll.
            tracing::debug!(user_id = %event.user_id, "parked poll gone, queueing event instead");
        }

        if let Some(evicted) = self.queue.push(event.clone()).await {
            metrics::observe_event_evicted();
            tracing::warn!(
                user_id = %event.user_id,
                evicted_id = %evicted.id,
                "event queue at capacity, dropped oldest event"
            );
        }
        metrics::set_queued_events(self.queue.total_queued().await);
        event
    }

    /// Long poll for `user_id`.
    ///
    /// Pending queued events matching the filter are returned immediately;
    /// otherwise the request parks until resolved or until the wait window
    /// elapses, which yields the `Timeout` heartbeat outcome.
    pub async fn poll(&self, user_id: Uuid, options: PollOptions) -> PollOutcome {
        let pending = self.drain_filtered(user_id, &options).await;
        if !pending.is_empty() {
            metrics::observe_events_delivered(pending.len() as u64);
            return PollOutcome::Events(pending);
        }

        let (connection_id, mut receiver) = self
            .registry
            .register(user_id, options.team_ids.clone(), options.last_event_id)
            .await;
        metrics::set_parked_connections(self.registry.active_connections().await);

        // An event published between the drain above and the registration saw
        // no parked connection and went to the queue; check once more before
        // waiting.
        let mut pending = self.drain_filtered(user_id, &options).await;
        if !pending.is_empty() {
            self.registry.deregister(user_id, connection_id).await;
            // A concurrent publish may have already resolved the channel
            // while the queue was re-checked; fold any direct delivery in so
            // it is not lost with the receiver. Closing first makes any send
            // that has not landed yet fail, so its publish falls back to the
            // queue; an outcome sent before the close is still readable.
            receiver.close();
            if let Ok(PollOutcome::Events(direct)) = receiver.try_recv() {
                pending.extend(direct);
                pending.sort_by_key(|event| event.id);
            }
            metrics::set_parked_connections(self.registry.active_connections().await);
            metrics::observe_events_delivered(pending.len() as u64);
            return PollOutcome::Events(pending);
        }

        let outcome = match timeout(self.wait, receiver).await {
            Ok(Ok(outcome)) => outcome,
            // Sender dropped without resolving; treat as a disconnect.
            Ok(Err(_)) => {
                self.registry.deregister(user_id, connection_id).await;
                PollOutcome::Disconnected
            }
            Err(_) => {
                self.registry.deregister(user_id, connection_id).await;
                PollOutcome::Timeout
            }
        };
        metrics::set_parked_connections(self.registry.active_connections().await);
        outcome
    }

    /// Resolve the caller's parked poll, if any, with `Disconnected`.
    pub async fn disconnect(&self, user_id: Uuid) -> bool {
        let found = self.registry.complete(user_id, PollOutcome::Disconnected).await;
        metrics::set_parked_connections(self.registry.active_connections().await);
        found
    }

    /// Drop every queued event for `user_id`; returns whether any existed.
    pub async fn clear_events(&self, user_id: Uuid) -> bool {
        let cleared = self.queue.clear(user_id).await;
        metrics::set_queued_events(self.queue.total_queued().await);
        cleared
    }

    pub async fn stats(&self) -> PollServiceStats {
        let RegistryStats {
            active_connections,
            per_team_counts,
        } = self.registry.stats().await;
        PollServiceStats {
            active_connections,
            per_team_counts,
            queued_events: self.queue.total_queued().await,
            users_with_events: self.queue.users_with_events().await,
        }
    }

    async fn drain_filtered(&self, user_id: Uuid, options: &PollOptions) -> Vec<Event> {
        self.queue
            .drain(user_id, options.last_event_id)
            .await
            .into_iter()
            .filter(|event| options.team_ids.contains(&event.team_id))
            .collect()
    }
}
