use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::IntoResponse;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder,
};
use std::future::Future;
use std::pin::Pin;
use std::sync::OnceLock;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};
use tower::{Layer, Service};

struct Metrics {
    registry: Registry,
    civic_up: IntGaugeVec,
    http_requests_total: IntCounterVec,
    http_request_duration_seconds: HistogramVec,
    auth_success_total: IntCounterVec,
    auth_failure_total: IntCounterVec,
    issues_reported_total: IntCounterVec,
    verifications_submitted_total: IntCounterVec,
    upvote_toggles_total: IntCounterVec,
    chat_messages_total: IntCounterVec,
}

static METRICS: OnceLock<Metrics> = OnceLock::new();

fn counter(name: &str, help: &str, labels: &[&str]) -> IntCounterVec {
    IntCounterVec::new(Opts::new(name, help), labels).expect("counter metric")
}

fn metrics() -> &'static Metrics {
    METRICS.get_or_init(|| {
        let registry = Registry::new();

        let civic_up = IntGaugeVec::new(Opts::new("civic_up", "Service health"), &["service"])
            .expect("civic_up metric");

        let http_requests_total = counter(
            "http_requests_total",
            "HTTP request count",
            &["service", "route", "method", "status"],
        );

        let http_request_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "http_request_duration_seconds",
                "HTTP request duration in seconds",
            )
            .buckets(vec![
                0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
            ]),
            &["service", "route", "method", "status"],
        )
        .expect("http_request_duration_seconds metric");

        let auth_success_total = counter(
            "auth_success_total",
            "Successful token exchanges",
            &["service"],
        );
        let auth_failure_total = counter(
            "auth_failure_total",
            "Rejected token exchanges or bearer tokens",
            &["service"],
        );
        let issues_reported_total = counter(
            "issues_reported_total",
            "Civic issues reported",
            &["service", "category"],
        );
        let verifications_submitted_total = counter(
            "verifications_submitted_total",
            "Peer verifications submitted",
            &["service", "verification_type"],
        );
        let upvote_toggles_total = counter(
            "upvote_toggles_total",
            "Upvote toggles by outcome",
            &["service", "outcome"],
        );
        let chat_messages_total = counter(
            "chat_messages_total",
            "Chat messages answered by assistant topic",
            &["service", "topic"],
        );

        let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
            Box::new(civic_up.clone()),
            Box::new(http_requests_total.clone()),
            Box::new(http_request_duration_seconds.clone()),
            Box::new(auth_success_total.clone()),
            Box::new(auth_failure_total.clone()),
            Box::new(issues_reported_total.clone()),
            Box::new(verifications_submitted_total.clone()),
            Box::new(upvote_toggles_total.clone()),
            Box::new(chat_messages_total.clone()),
        ];
        for collector in collectors {
            registry.register(collector).expect("register metric");
        }

        Metrics {
            registry,
            civic_up,
            http_requests_total,
            http_request_duration_seconds,
            auth_success_total,
            auth_failure_total,
            issues_reported_total,
            verifications_submitted_total,
            upvote_toggles_total,
            chat_messages_total,
        }
    })
}

pub fn init(service_name: &'static str) {
    metrics().civic_up.with_label_values(&[service_name]).set(1);
}

pub fn record_http_request(
    service_name: &'static str,
    method: &str,
    route: &str,
    status: u16,
    duration: Duration,
) {
    let status_str = status.to_string();
    let labels = &[service_name, route, method, status_str.as_str()];
    let metrics = metrics();
    metrics.http_requests_total.with_label_values(labels).inc();
    metrics
        .http_request_duration_seconds
        .with_label_values(labels)
        .observe(duration.as_secs_f64());
}

pub fn inc_auth_success(service_name: &'static str) {
    metrics()
        .auth_success_total
        .with_label_values(&[service_name])
        .inc();
}

pub fn inc_auth_failure(service_name: &'static str) {
    metrics()
        .auth_failure_total
        .with_label_values(&[service_name])
        .inc();
}

pub fn inc_issue_reported(service_name: &'static str, category: &str) {
    metrics()
        .issues_reported_total
        .with_label_values(&[service_name, category])
        .inc();
}

pub fn inc_verification_submitted(service_name: &'static str, verification_type: &str) {
    metrics()
        .verifications_submitted_total
        .with_label_values(&[service_name, verification_type])
        .inc();
}

pub fn inc_upvote_toggle(service_name: &'static str, outcome: &str) {
    metrics()
        .upvote_toggles_total
        .with_label_values(&[service_name, outcome])
        .inc();
}

pub fn inc_chat_message(service_name: &'static str, topic: &str) {
    metrics()
        .chat_messages_total
        .with_label_values(&[service_name, topic])
        .inc();
}

pub fn metrics_response(service_name: &'static str) -> impl IntoResponse {
    init(service_name);
    let metric_families = metrics().registry.gather();
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            HeaderMap::new(),
            "failed to encode metrics".to_string(),
        );
    }

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; version=0.0.4"),
    );
    (
        StatusCode::OK,
        headers,
        String::from_utf8_lossy(&buffer).to_string(),
    )
}

#[derive(Clone)]
pub struct MetricsLayer {
    service_name: &'static str,
}

impl MetricsLayer {
    pub fn new(service_name: &'static str) -> Self {
        Self { service_name }
    }
}

#[derive(Clone)]
pub struct MetricsService<S> {
    inner: S,
    service_name: &'static str,
}

impl<S> Layer<S> for MetricsLayer {
    type Service = MetricsService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        MetricsService {
            inner,
            service_name: self.service_name,
        }
    }
}

impl<S, ReqBody, ResBody> Service<axum::http::Request<ReqBody>> for MetricsService<S>
where
    S: Service<axum::http::Request<ReqBody>, Response = axum::response::Response<ResBody>>
        + Send
        + 'static,
    S::Future: Send + 'static,
    S::Error: Send + 'static,
    ResBody: Send + 'static,
{
    type Response = axum::response::Response<ResBody>;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: axum::http::Request<ReqBody>) -> Self::Future {
        let service_name = self.service_name;
        let method = request.method().to_string();
        // Matched route template keeps label cardinality bounded.
        let route = request
            .extensions()
            .get::<axum::extract::MatchedPath>()
            .map(|path| path.as_str().to_string())
            .unwrap_or_else(|| "unmatched".to_string());
        let start = Instant::now();
        let fut = self.inner.call(request);
        Box::pin(async move {
            match fut.await {
                Ok(response) => {
                    record_http_request(
                        service_name,
                        &method,
                        &route,
                        response.status().as_u16(),
                        start.elapsed(),
                    );
                    Ok(response)
                }
                Err(err) => {
                    record_http_request(service_name, &method, &route, 500, start.elapsed());
                    Err(err)
                }
            }
        })
    }
}
