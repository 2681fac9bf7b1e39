/// Team membership lookup
///
/// The poll service does not own team data; membership is re-validated
/// against the CalTalk team service on every poll so a revoked member stops
/// receiving that team's events on their next request.
use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use crate::config::TeamServiceConfig;
use crate::error::{AppError, AppResult};

/// Source of truth for which teams a user belongs to
#[async_trait]
pub trait TeamDirectory: Send + Sync {
    async fn member_team_ids(&self, user_id: Uuid) -> AppResult<HashSet<Uuid>>;
}

/// HTTP client for the CalTalk team service
#[derive(Clone)]
pub struct TeamServiceClient {
    http: reqwest::Client,
    base_url: String,
}

#[derive(Debug, serde::Deserialize)]
struct MembershipsResponse {
    team_ids: Vec<Uuid>,
}

impl TeamServiceClient {
    pub fn new(config: &TeamServiceConfig) -> AppResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| AppError::Config(format!("failed to build team service client: {}", e)))?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl TeamDirectory for TeamServiceClient {
    async fn member_team_ids(&self, user_id: Uuid) -> AppResult<HashSet<Uuid>> {
        let url = format!("{}/api/v1/users/{}/teams", self.base_url, user_id);

        let response = self.http.get(&url).send().await.map_err(|e| {
            tracing::error!(user_id = %user_id, error = %e, "team membership lookup failed");
            AppError::TeamService(format!("membership lookup failed: {}", e))
        })?;

        if !response.status().is_success() {
            tracing::error!(
                user_id = %user_id,
                status = %response.status(),
                "team service returned an error status"
            );
            return Err(AppError::TeamService(format!(
                "membership lookup returned {}",
                response.status()
            )));
        }

        let body: MembershipsResponse = response
            .json()
            .await
            .map_err(|e| AppError::TeamService(format!("malformed membership response: {}", e)))?;

        Ok(body.team_ids.into_iter().collect())
    }
}

/// Fixed membership table, for tests and local development
#[derive(Debug, Default, Clone)]
pub struct StaticTeamDirectory {
    members: HashMap<Uuid, HashSet<Uuid>>,
}

impl StaticTeamDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_member(mut self, user_id: Uuid, team_ids: &[Uuid]) -> Self {
        self.members
            .entry(user_id)
            .or_default()
            .extend(team_ids.iter().copied());
        self
    }
}

#[async_trait]
impl TeamDirectory for StaticTeamDirectory {
    async fn member_team_ids(&self, user_id: Uuid) -> AppResult<HashSet<Uuid>> {
        Ok(self.members.get(&user_id).cloned().unwrap_or_default())
    }
}
