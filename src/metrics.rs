use std::time::Duration;

use actix_web::HttpResponse;
use once_cell::sync::Lazy;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, TextEncoder,
};

static HTTP_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "poll_service_http_requests_total",
            "Total HTTP requests handled by poll-service",
        ),
        &["method", "path", "status"],
    )
    .expect("failed to create poll_service_http_requests_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register poll_service_http_requests_total");
    counter
});

static HTTP_REQUEST_DURATION_SECONDS: Lazy<HistogramVec> = Lazy::new(|| {
    let histogram = HistogramVec::new(
        HistogramOpts::new(
            "poll_service_http_request_duration_seconds",
            "HTTP request latency for poll-service",
        )
        .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.25, 1.0, 5.0, 10.0, 30.0]),
        &["method", "path", "status"],
    )
    .expect("failed to create poll_service_http_request_duration_seconds");
    prometheus::default_registry()
        .register(Box::new(histogram.clone()))
        .expect("failed to register poll_service_http_request_duration_seconds");
    histogram
});

static PARKED_CONNECTIONS: Lazy<IntGauge> = Lazy::new(|| {
    let gauge = IntGauge::new(
        "poll_service_parked_connections",
        "Long-poll requests currently held open",
    )
    .expect("failed to create poll_service_parked_connections");
    prometheus::default_registry()
        .register(Box::new(gauge.clone()))
        .expect("failed to register poll_service_parked_connections");
    gauge
});

static QUEUED_EVENTS: Lazy<IntGauge> = Lazy::new(|| {
    let gauge = IntGauge::new(
        "poll_service_queued_events",
        "Events buffered across all user queues",
    )
    .expect("failed to create poll_service_queued_events");
    prometheus::default_registry()
        .register(Box::new(gauge.clone()))
        .expect("failed to register poll_service_queued_events");
    gauge
});

static EVENTS_DELIVERED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    let counter = IntCounter::new(
        "poll_service_events_delivered_total",
        "Events returned to polling clients",
    )
    .expect("failed to create poll_service_events_delivered_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register poll_service_events_delivered_total");
    counter
});

static EVENTS_EVICTED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    let counter = IntCounter::new(
        "poll_service_events_evicted_total",
        "Events dropped from full per-user queues",
    )
    .expect("failed to create poll_service_events_evicted_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register poll_service_events_evicted_total");
    counter
});

pub fn observe_http_request(method: &str, path: &str, status: u16, elapsed: Duration) {
    let status_label = status.to_string();
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[method, path, &status_label])
        .inc();
    HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&[method, path, &status_label])
        .observe(elapsed.as_secs_f64());
}

pub fn set_parked_connections(count: usize) {
    PARKED_CONNECTIONS.set(count as i64);
}

pub fn set_queued_events(count: usize) {
    QUEUED_EVENTS.set(count as i64);
}

pub fn observe_events_delivered(count: u64) {
    EVENTS_DELIVERED_TOTAL.inc_by(count);
}

pub fn observe_event_evicted() {
    EVENTS_EVICTED_TOTAL.inc();
}

pub async fn serve_metrics() -> HttpResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();

    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
        return HttpResponse::InternalServerError().body(err.to_string());
    }

    HttpResponse::Ok()
        .content_type(encoder.format_type())
        .body(buffer)
}

use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    Error,
};
use futures::future::{ready, LocalBoxFuture, Ready};
use std::rc::Rc;
use std::time::Instant;

pub struct MetricsMiddleware;

impl<S, B> Transform<S, ServiceRequest> for MetricsMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = MetricsMiddlewareService<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(MetricsMiddlewareService {
            service: Rc::new(service),
        }))
    }
}

pub struct MetricsMiddlewareService<S> {
    service: Rc<S>,
}

impl<S, B> Service<ServiceRequest> for MetricsMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = self.service.clone();
        let path = req.path().to_string();
        let method = req.method().to_string();
        let start = Instant::now();

        Box::pin(async move {
            let result = service.call(req).await;
            let elapsed = start.elapsed();
            match &result {
                Ok(response) => {
                    observe_http_request(&method, &path, response.status().as_u16(), elapsed);
                }
                Err(_) => {
                    observe_http_request(&method, &path, 500, elapsed);
                }
            }
            result
        })
    }
}
