use actix_web::{middleware, web, App, HttpServer};
use anyhow::Context;
use poll_service::{
    handlers, metrics,
    middleware::JwtAuth,
    services::{PollService, TeamDirectory, TeamServiceClient},
    Config,
};
use std::sync::Arc;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    poll_service::logging::init_tracing();

    tracing::info!("Starting poll service");

    let config = Config::from_env().context("invalid configuration")?;

    let poll_service = Arc::new(PollService::new(&config.poll));
    tracing::info!(
        wait_secs = config.poll.wait_secs,
        queue_capacity = config.poll.queue_capacity,
        "Poll coordinator initialized"
    );

    let teams: Arc<dyn TeamDirectory> = Arc::new(
        TeamServiceClient::new(&config.teams).context("failed to build team service client")?,
    );
    let auth = JwtAuth::new(&config.auth.jwt_secret);

    let addr = format!("0.0.0.0:{}", config.app.port);
    tracing::info!("Starting HTTP server on {}", addr);

    HttpServer::new(move || {
        let auth = auth.clone();
        App::new()
            .app_data(web::Data::new(poll_service.clone()))
            .app_data(web::Data::new(teams.clone()))
            .wrap(middleware::Logger::default())
            .wrap(metrics::MetricsMiddleware)
            .route("/health", web::get().to(|| async { "OK" }))
            .route("/metrics", web::get().to(metrics::serve_metrics))
            .route("/", web::get().to(|| async { "CalTalk Poll Service v1.0" }))
            .configure(|cfg| {
                handlers::register_poll(cfg, auth.clone());
                handlers::register_events(cfg, auth);
            })
    })
    .bind(&addr)
    .with_context(|| format!("failed to bind {}", addr))?
    .run()
    .await?;

    Ok(())
}
