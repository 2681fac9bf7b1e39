/// Producer endpoint
///
/// CalTalk's message-send and schedule-change handlers publish their
/// notification events here.
use std::sync::Arc;

use actix_web::{web, HttpResponse};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::ApiResponse;
use crate::error::AppError;
use crate::middleware::JwtAuth;
use crate::models::EventKind;
use crate::services::PollService;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishEventPayload {
    pub recipient_id: Uuid,
    pub team_id: Uuid,
    pub kind: EventKind,
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// Publish an event for one recipient
///
/// POST /internal/events
pub async fn publish_event(
    service: web::Data<Arc<PollService>>,
    req: web::Json<PublishEventPayload>,
) -> Result<HttpResponse, AppError> {
    let event = service
        .publish(req.recipient_id, req.team_id, req.kind, req.payload.clone())
        .await;

    tracing::debug!(
        user_id = %event.user_id,
        team_id = %event.team_id,
        event_id = %event.id,
        kind = event.kind.as_str(),
        "event published"
    );

    Ok(HttpResponse::Ok().json(ApiResponse::ok(event)))
}

pub fn register_routes(cfg: &mut web::ServiceConfig, auth: JwtAuth) {
    cfg.service(
        web::scope("/internal")
            .wrap(auth)
            .route("/events", web::post().to(publish_event)),
    );
}
