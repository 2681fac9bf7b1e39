/// Long-poll endpoints
///
/// `GET /api/poll` holds the request open until an event arrives or the wait
/// window elapses. The companion routes cover explicit disconnect, queue
/// clearing and a stats snapshot for debugging.
use std::collections::HashSet;
use std::sync::Arc;

use actix_web::{web, HttpResponse};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::ApiResponse;
use crate::error::AppError;
use crate::middleware::{JwtAuth, UserId};
use crate::models::{Event, EventId};
use crate::services::{PollOptions, PollOutcome, PollService, TeamDirectory};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollQuery {
    pub last_event_id: Option<String>,
    pub team_ids: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PollResponse {
    /// "events", "timeout", "replaced" or "disconnected"
    pub status: &'static str,
    pub events: Vec<Event>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_event_id: Option<EventId>,
}

/// Long poll for new events
///
/// GET /api/poll?lastEventId=&teamIds=
pub async fn poll(
    user: UserId,
    query: web::Query<PollQuery>,
    service: web::Data<Arc<PollService>>,
    teams: web::Data<Arc<dyn TeamDirectory>>,
) -> Result<HttpResponse, AppError> {
    let last_event_id = parse_last_event_id(query.last_event_id.as_deref())?;
    let requested = parse_team_ids(query.team_ids.as_deref())?;

    let memberships = teams.member_team_ids(user.0).await?;
    let team_ids = effective_filter(user.0, requested, memberships)?;

    let outcome = service
        .poll(
            user.0,
            PollOptions {
                last_event_id,
                team_ids,
            },
        )
        .await;

    let response = match outcome {
        PollOutcome::Events(events) => {
            let last_event_id = events.last().map(|e| e.id);
            PollResponse {
                status: "events",
                events,
                last_event_id,
            }
        }
        PollOutcome::Timeout => PollResponse {
            status: "timeout",
            events: Vec::new(),
            last_event_id,
        },
        PollOutcome::Replaced => PollResponse {
            status: "replaced",
            events: Vec::new(),
            last_event_id,
        },
        PollOutcome::Disconnected => PollResponse {
            status: "disconnected",
            events: Vec::new(),
            last_event_id,
        },
    };

    Ok(HttpResponse::Ok().json(response))
}

/// Explicitly resolve the caller's parked poll
///
/// POST /api/poll/disconnect
pub async fn disconnect(
    user: UserId,
    service: web::Data<Arc<PollService>>,
) -> Result<HttpResponse, AppError> {
    let disconnected = service.disconnect(user.0).await;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(serde_json::json!({
        "disconnected": disconnected
    }))))
}

/// Connection and queue counts, for debugging
///
/// GET /api/poll/stats
pub async fn stats(service: web::Data<Arc<PollService>>) -> Result<HttpResponse, AppError> {
    let stats = service.stats().await;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(stats)))
}

/// Drop the caller's queued events, for debugging
///
/// DELETE /api/poll/events
pub async fn clear_events(
    user: UserId,
    service: web::Data<Arc<PollService>>,
) -> Result<HttpResponse, AppError> {
    let cleared = service.clear_events(user.0).await;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(serde_json::json!({
        "cleared": cleared
    }))))
}

fn parse_last_event_id(raw: Option<&str>) -> Result<Option<EventId>, AppError> {
    match raw {
        None => Ok(None),
        Some("") => Ok(None),
        Some(s) => s
            .parse()
            .map(Some)
            .map_err(|_| AppError::validation("lastEventId", "malformed event id")),
    }
}

/// Parse the comma-separated `teamIds` parameter. Absent or empty means
/// "all teams the caller belongs to".
fn parse_team_ids(raw: Option<&str>) -> Result<Option<HashSet<Uuid>>, AppError> {
    let Some(raw) = raw.filter(|s| !s.is_empty()) else {
        return Ok(None);
    };

    let mut team_ids = HashSet::new();
    for part in raw.split(',') {
        let part = part.trim();
        let team_id = part
            .parse::<Uuid>()
            .map_err(|_| AppError::validation("teamIds", format!("malformed team id: {:?}", part)))?;
        team_ids.insert(team_id);
    }
    Ok(Some(team_ids))
}

/// Intersect the requested teams with the caller's memberships.
///
/// Unauthorized team ids are dropped with a warning, not rejected; an empty
/// surviving filter is a validation error so a poll can never wait on
/// nothing.
fn effective_filter(
    user_id: Uuid,
    requested: Option<HashSet<Uuid>>,
    memberships: HashSet<Uuid>,
) -> Result<HashSet<Uuid>, AppError> {
    let filter = match requested {
        Some(requested) => {
            let (allowed, dropped): (HashSet<Uuid>, HashSet<Uuid>) = requested
                .into_iter()
                .partition(|team_id| memberships.contains(team_id));
            if !dropped.is_empty() {
                tracing::warn!(
                    user_id = %user_id,
                    dropped = ?dropped,
                    "dropping team ids the caller is not a member of"
                );
            }
            allowed
        }
        None => memberships,
    };

    if filter.is_empty() {
        return Err(AppError::validation(
            "teamIds",
            "no accessible teams requested",
        ));
    }
    Ok(filter)
}

pub fn register_routes(cfg: &mut web::ServiceConfig, auth: JwtAuth) {
    cfg.service(
        web::scope("/api/poll")
            .wrap(auth)
            .route("", web::get().to(poll))
            .route("/disconnect", web::post().to(disconnect))
            .route("/stats", web::get().to(stats))
            .route("/events", web::delete().to(clear_events)),
    );
}
