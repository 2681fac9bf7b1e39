/// Long-poll connection registry
///
/// Tracks the single parked poll request each user may have open. The
/// coordinator owns the HTTP side; the registry only holds the completion
/// channel, the team filter and the client's event cursor. Precise removal
/// uses connection ids so a timed-out request can never tear down a newer
/// poll from the same user.
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{oneshot, RwLock};
use uuid::Uuid;

use crate::models::{Event, EventId};

/// Why a parked long poll completed
#[derive(Debug, PartialEq)]
pub enum PollOutcome {
    /// Events to deliver, in order
    Events(Vec<Event>),
    /// Wait window elapsed with nothing new; the client should re-poll
    Timeout,
    /// A newer poll from the same user superseded this one
    Replaced,
    /// The client asked to disconnect
    Disconnected,
}

/// Identifies one parked poll request for precise cleanup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

struct ParkedConnection {
    id: ConnectionId,
    sender: oneshot::Sender<PollOutcome>,
    team_ids: HashSet<Uuid>,
    last_event_id: Option<EventId>,
    registered_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct RegistryStats {
    pub active_connections: usize,
    pub per_team_counts: HashMap<Uuid, usize>,
}

#[derive(Default, Clone)]
pub struct ConnectionRegistry {
    inner: Arc<RwLock<HashMap<Uuid, ParkedConnection>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Park a poll request for `user_id`, replacing any prior one.
    ///
    /// The at-most-one-connection policy: a previous parked poll for the same
    /// user is resolved with `Replaced` so its request completes immediately.
    pub async fn register(
        &self,
        user_id: Uuid,
        team_ids: HashSet<Uuid>,
        last_event_id: Option<EventId>,
    ) -> (ConnectionId, oneshot::Receiver<PollOutcome>) {
        let (tx, rx) = oneshot::channel();
        let connection = ParkedConnection {
            id: ConnectionId::new(),
            sender: tx,
            team_ids,
            last_event_id,
            registered_at: Utc::now(),
        };
        let connection_id = connection.id;

        let mut guard = self.inner.write().await;
        if let Some(prev) = guard.insert(user_id, connection) {
            tracing::debug!(
                user_id = %user_id,
                parked_since = %prev.registered_at,
                "replacing parked poll connection"
            );
            if prev.sender.send(PollOutcome::Replaced).is_err() {
                tracing::debug!(user_id = %user_id, "previous poll receiver already gone");
            }
        }

        (connection_id, rx)
    }

    /// Resolve and remove the parked connection for `user_id`, if any.
    ///
    /// Returns whether a connection was found. A failed send means the client
    /// went away between lookup and delivery; that is logged, not an error.
    pub async fn complete(&self, user_id: Uuid, outcome: PollOutcome) -> bool {
        let mut guard = self.inner.write().await;
        match guard.remove(&user_id) {
            Some(connection) => {
                if connection.sender.send(outcome).is_err() {
                    tracing::debug!(user_id = %user_id, "poll receiver dropped before completion");
                }
                true
            }
            None => false,
        }
    }

    /// Take the completion handle for `event`'s recipient when the parked
    /// connection's team filter covers the event and its cursor is older than
    /// the event id. Leaves the connection parked otherwise.
    pub async fn take_matching(&self, event: &Event) -> Option<oneshot::Sender<PollOutcome>> {
        let mut guard = self.inner.write().await;
        let matches = guard.get(&event.user_id).map_or(false, |connection| {
            connection.team_ids.contains(&event.team_id)
                && connection.last_event_id.map_or(true, |last| event.id > last)
        });
        if !matches {
            return None;
        }
        guard.remove(&event.user_id).map(|connection| connection.sender)
    }

    /// Remove without resolving; only removes the exact connection named by
    /// `connection_id`. Idempotent.
    pub async fn deregister(&self, user_id: Uuid, connection_id: ConnectionId) {
        let mut guard = self.inner.write().await;
        if guard.get(&user_id).map_or(false, |c| c.id == connection_id) {
            guard.remove(&user_id);
        }
    }

    pub async fn is_parked(&self, user_id: Uuid) -> bool {
        let guard = self.inner.read().await;
        guard.contains_key(&user_id)
    }

    pub async fn active_connections(&self) -> usize {
        let guard = self.inner.read().await;
        guard.len()
    }

    pub async fn stats(&self) -> RegistryStats {
        let guard = self.inner.read().await;
        let mut per_team_counts: HashMap<Uuid, usize> = HashMap::new();
        for connection in guard.values() {
            for team_id in &connection.team_ids {
                *per_team_counts.entry(*team_id).or_insert(0) += 1;
            }
        }
        RegistryStats {
            active_connections: guard.len(),
            per_team_counts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EventIdGenerator, EventKind};

    fn teams(ids: &[Uuid]) -> HashSet<Uuid> {
        ids.iter().copied().collect()
    }

    fn event_for(gen: &EventIdGenerator, user_id: Uuid, team_id: Uuid) -> Event {
        Event::new(
            gen.next_id(),
            user_id,
            team_id,
            EventKind::Message,
            serde_json::json!({}),
        )
    }

    #[tokio::test]
    async fn test_register_and_complete() {
        let registry = ConnectionRegistry::new();
        let user_id = Uuid::new_v4();
        let team_id = Uuid::new_v4();

        let (_, rx) = registry.register(user_id, teams(&[team_id]), None).await;
        assert!(registry.is_parked(user_id).await);

        assert!(registry.complete(user_id, PollOutcome::Disconnected).await);
        assert_eq!(rx.await.unwrap(), PollOutcome::Disconnected);
        assert!(!registry.is_parked(user_id).await);
    }

    #[tokio::test]
    async fn test_complete_without_connection_is_false() {
        let registry = ConnectionRegistry::new();
        assert!(!registry.complete(Uuid::new_v4(), PollOutcome::Timeout).await);
    }

    #[tokio::test]
    async fn test_reregister_resolves_old_connection_as_replaced() {
        let registry = ConnectionRegistry::new();
        let user_id = Uuid::new_v4();
        let team_id = Uuid::new_v4();

        let (_, old_rx) = registry.register(user_id, teams(&[team_id]), None).await;
        let (_, _new_rx) = registry.register(user_id, teams(&[team_id]), None).await;

        assert_eq!(old_rx.await.unwrap(), PollOutcome::Replaced);
        assert_eq!(registry.active_connections().await, 1);
    }

    #[tokio::test]
    async fn test_take_matching_honors_team_filter() {
        let registry = ConnectionRegistry::new();
        let gen = EventIdGenerator::new();
        let user_id = Uuid::new_v4();
        let subscribed = Uuid::new_v4();
        let other = Uuid::new_v4();

        let (_, _rx) = registry.register(user_id, teams(&[subscribed]), None).await;

        let mismatched = event_for(&gen, user_id, other);
        assert!(registry.take_matching(&mismatched).await.is_none());
        assert!(registry.is_parked(user_id).await);

        let matched = event_for(&gen, user_id, subscribed);
        assert!(registry.take_matching(&matched).await.is_some());
        assert!(!registry.is_parked(user_id).await);
    }

    #[tokio::test]
    async fn test_take_matching_honors_cursor() {
        let registry = ConnectionRegistry::new();
        let gen = EventIdGenerator::new();
        let user_id = Uuid::new_v4();
        let team_id = Uuid::new_v4();

        let stale = event_for(&gen, user_id, team_id);
        let (_, _rx) = registry
            .register(user_id, teams(&[team_id]), Some(stale.id))
            .await;

        // An event at or before the cursor must not be delivered
        assert!(registry.take_matching(&stale).await.is_none());

        let fresh = event_for(&gen, user_id, team_id);
        assert!(registry.take_matching(&fresh).await.is_some());
    }

    #[tokio::test]
    async fn test_take_matching_wrong_user_leaves_connection() {
        let registry = ConnectionRegistry::new();
        let gen = EventIdGenerator::new();
        let user_a = Uuid::new_v4();
        let user_b = Uuid::new_v4();
        let team_id = Uuid::new_v4();

        let (_, _rx) = registry.register(user_b, teams(&[team_id]), None).await;

        let for_a = event_for(&gen, user_a, team_id);
        assert!(registry.take_matching(&for_a).await.is_none());
        assert!(registry.is_parked(user_b).await);
    }

    #[tokio::test]
    async fn test_outcome_sent_before_close_remains_readable() {
        let registry = ConnectionRegistry::new();
        let gen = EventIdGenerator::new();
        let user_id = Uuid::new_v4();
        let team_id = Uuid::new_v4();

        let (_, mut rx) = registry.register(user_id, teams(&[team_id]), None).await;

        let event = event_for(&gen, user_id, team_id);
        let sender = registry.take_matching(&event).await.unwrap();
        assert!(sender.send(PollOutcome::Events(vec![event.clone()])).is_ok());

        // The poll side closes the channel before draining it; a delivery
        // that landed first must still come out.
        rx.close();
        assert_eq!(rx.try_recv().unwrap(), PollOutcome::Events(vec![event]));
    }

    #[tokio::test]
    async fn test_send_after_close_fails() {
        let registry = ConnectionRegistry::new();
        let gen = EventIdGenerator::new();
        let user_id = Uuid::new_v4();
        let team_id = Uuid::new_v4();

        let (_, mut rx) = registry.register(user_id, teams(&[team_id]), None).await;
        rx.close();

        let event = event_for(&gen, user_id, team_id);
        let sender = registry.take_matching(&event).await.unwrap();
        assert!(sender.send(PollOutcome::Events(vec![event])).is_err());
    }

    #[tokio::test]
    async fn test_deregister_is_precise_and_idempotent() {
        let registry = ConnectionRegistry::new();
        let user_id = Uuid::new_v4();
        let team_id = Uuid::new_v4();

        let (stale_id, _rx1) = registry.register(user_id, teams(&[team_id]), None).await;
        let (_, _rx2) = registry.register(user_id, teams(&[team_id]), None).await;

        // Deregistering with the superseded connection id must not touch the
        // newer connection
        registry.deregister(user_id, stale_id).await;
        assert!(registry.is_parked(user_id).await);

        registry.deregister(user_id, stale_id).await;
        assert!(registry.is_parked(user_id).await);
    }

    #[tokio::test]
    async fn test_stats_counts_per_team() {
        let registry = ConnectionRegistry::new();
        let team_a = Uuid::new_v4();
        let team_b = Uuid::new_v4();

        let (_, _rx1) = registry
            .register(Uuid::new_v4(), teams(&[team_a, team_b]), None)
            .await;
        let (_, _rx2) = registry.register(Uuid::new_v4(), teams(&[team_a]), None).await;

        let stats = registry.stats().await;
        assert_eq!(stats.active_connections, 2);
        assert_eq!(stats.per_team_counts.get(&team_a), Some(&2));
        assert_eq!(stats.per_team_counts.get(&team_b), Some(&1));
    }
}
