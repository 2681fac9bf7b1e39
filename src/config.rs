use std::time::Duration;

use crate::error::AppError;

#[derive(Debug, Clone)]
pub struct Config {
    pub app: AppConfig,
    pub poll: PollConfig,
    pub teams: TeamServiceConfig,
    pub auth: AuthConfig,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub env: String,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct PollConfig {
    /// How long a poll request is held open before replying with a heartbeat.
    pub wait_secs: u64,
    /// Per-user queue capacity; the oldest event is evicted on overflow.
    pub queue_capacity: usize,
}

impl PollConfig {
    pub fn wait(&self) -> Duration {
        Duration::from_secs(self.wait_secs)
    }
}

#[derive(Debug, Clone)]
pub struct TeamServiceConfig {
    pub base_url: String,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        Ok(Config {
            app: AppConfig {
                env: std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
                port: parse_var("APP_PORT", "8000")?,
            },
            poll: PollConfig {
                wait_secs: parse_var("POLL_WAIT_SECS", "25")?,
                queue_capacity: parse_var("POLL_QUEUE_CAPACITY", "256")?,
            },
            teams: TeamServiceConfig {
                base_url: std::env::var("TEAM_SERVICE_URL")
                    .unwrap_or_else(|_| "http://localhost:8001".to_string()),
                request_timeout_secs: parse_var("TEAM_SERVICE_TIMEOUT_SECS", "5")?,
            },
            auth: AuthConfig {
                jwt_secret: std::env::var("JWT_SECRET").map_err(|_| {
                    AppError::Config("JWT_SECRET must be set".to_string())
                })?,
            },
        })
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, default: &str) -> Result<T, AppError> {
    std::env::var(name)
        .unwrap_or_else(|_| default.to_string())
        .parse()
        .map_err(|_| AppError::Config(format!("invalid value for {}", name)))
}
