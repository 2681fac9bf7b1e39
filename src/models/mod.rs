use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;
use uuid::Uuid;

/// Kind of notification event carried to a polling client
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    /// New chat message in a team channel
    Message,
    /// Schedule entry created
    ScheduleCreated,
    /// Schedule entry updated
    ScheduleUpdated,
    /// Schedule entry deleted
    ScheduleDeleted,
    /// Server-originated announcement
    System,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Message => "message",
            EventKind::ScheduleCreated => "schedule_created",
            EventKind::ScheduleUpdated => "schedule_updated",
            EventKind::ScheduleDeleted => "schedule_deleted",
            EventKind::System => "system",
        }
    }
}

/// Event identifier, opaque to clients.
///
/// Encoded on the wire as `"{unix_millis}-{seq}"`. Ordering is numeric on
/// `(millis, seq)`; comparing the encoded strings lexicographically is NOT
/// safe across millisecond values with different digit counts, which is why
/// both parts are parsed out. `seq` comes from a process-wide counter and
/// disambiguates ids minted in the same millisecond.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EventId {
    millis: i64,
    seq: u64,
}

impl EventId {
    pub fn new(millis: i64, seq: u64) -> Self {
        Self { millis, seq }
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.millis, self.seq)
    }
}

#[derive(Debug, Error, Clone)]
#[error("malformed event id: {0:?}")]
pub struct ParseEventIdError(String);

impl FromStr for EventId {
    type Err = ParseEventIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (millis, seq) = s
            .split_once('-')
            .ok_or_else(|| ParseEventIdError(s.to_string()))?;
        let millis = millis
            .parse::<i64>()
            .map_err(|_| ParseEventIdError(s.to_string()))?;
        let seq = seq
            .parse::<u64>()
            .map_err(|_| ParseEventIdError(s.to_string()))?;
        Ok(EventId { millis, seq })
    }
}

impl Serialize for EventId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for EventId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(D::Error::custom)
    }
}

/// Process-wide source of monotonically increasing event ids
#[derive(Debug, Default)]
pub struct EventIdGenerator {
    seq: AtomicU64,
    last_millis: AtomicI64,
}

impl EventIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&self) -> EventId {
        self.next_id_at(Utc::now().timestamp_millis())
    }

    /// The timestamp is clamped to never decrease below the newest one
    /// already issued, so a wall-clock step backwards (NTP correction)
    /// cannot mint an id that sorts before an earlier event and slip under
    /// a client's cursor.
    fn next_id_at(&self, now: i64) -> EventId {
        let prev = self.last_millis.fetch_max(now, Ordering::Relaxed);
        EventId {
            millis: prev.max(now),
            seq: self.seq.fetch_add(1, Ordering::Relaxed),
        }
    }
}

/// A notification event addressed to one user, scoped to one team.
/// Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    pub id: EventId,
    pub user_id: Uuid,
    pub team_id: Uuid,
    pub kind: EventKind,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl Event {
    pub fn new(
        id: EventId,
        user_id: Uuid,
        team_id: Uuid,
        kind: EventKind,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id,
            user_id,
            team_id,
            kind,
            payload,
            created_at: Utc::now(),
        }
    }
}
