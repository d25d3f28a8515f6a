//! # Prometheus Metrics
//!
//! One registry shared by the HTTP middleware and the coordination
//! components.
//!
//! HTTP-level metrics (request counts, latency) are recorded in middleware.
//! Domain counters (transitions, lost races, outbound failures, reaction
//! dispositions) are pushed by the coordinator, the notification sink and
//! the reaction adapter. The armed-timer gauge is refreshed from the
//! [`TimerRegistry`](crate::timers::TimerRegistry) on each `/metrics`
//! scrape (pull model), see the handler in `lib.rs`.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::{MatchedPath, Request};
use axum::middleware::Next;
use axum::response::Response;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
    core::Collector,
};

use mm_state::RequestStatus;

/// Shared metrics state backed by a Prometheus registry.
#[derive(Clone)]
pub struct ApiMetrics {
    inner: Arc<Inner>,
}

struct Inner {
    registry: Registry,

    // -- HTTP middleware metrics (push model) --
    http_requests_total: IntCounterVec,
    http_request_duration_seconds: HistogramVec,

    // -- Coordination counters (push model) --
    transitions_total: IntCounterVec,
    races_lost_total: IntCounterVec,
    outbound_failures_total: IntCounterVec,
    reactions_total: IntCounterVec,

    // -- Gauges (pull model, updated on /metrics scrape) --
    timers_armed: IntGauge,
}

impl std::fmt::Debug for ApiMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiMetrics")
            .field("requests", &self.requests())
            .finish()
    }
}

impl ApiMetrics {
    /// Create a new metrics instance with a fresh Prometheus registry.
    pub fn new() -> Self {
        let registry = Registry::new();

        let http_requests_total = IntCounterVec::new(
            Opts::new("mm_http_requests_total", "Total HTTP requests"),
            &["method", "path", "status"],
        )
        .expect("metric can be created");

        let http_request_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "mm_http_request_duration_seconds",
                "HTTP request duration in seconds",
            )
            .buckets(vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]),
            &["method", "path"],
        )
        .expect("metric can be created");

        let transitions_total = IntCounterVec::new(
            Opts::new(
                "mm_transitions_total",
                "Session status transitions applied, by target status",
            ),
            &["to"],
        )
        .expect("metric can be created");

        let races_lost_total = IntCounterVec::new(
            Opts::new(
                "mm_races_lost_total",
                "Resolutions that found the session already resolved",
            ),
            &["op"],
        )
        .expect("metric can be created");

        let outbound_failures_total = IntCounterVec::new(
            Opts::new(
                "mm_outbound_failures_total",
                "Chat platform commands abandoned after their retry",
            ),
            &["command"],
        )
        .expect("metric can be created");

        let reactions_total = IntCounterVec::new(
            Opts::new("mm_reactions_total", "Relayed chat reactions by disposition"),
            &["disposition"],
        )
        .expect("metric can be created");

        let timers_armed = IntGauge::new("mm_timers_armed", "Acceptance timers currently armed")
            .expect("metric can be created");

        registry
            .register(Box::new(http_requests_total.clone()))
            .expect("metric can be registered");
        registry
            .register(Box::new(http_request_duration_seconds.clone()))
            .expect("metric can be registered");
        registry
            .register(Box::new(transitions_total.clone()))
            .expect("metric can be registered");
        registry
            .register(Box::new(races_lost_total.clone()))
            .expect("metric can be registered");
        registry
            .register(Box::new(outbound_failures_total.clone()))
            .expect("metric can be registered");
        registry
            .register(Box::new(reactions_total.clone()))
            .expect("metric can be registered");
        registry
            .register(Box::new(timers_armed.clone()))
            .expect("metric can be registered");

        Self {
            inner: Arc::new(Inner {
                registry,
                http_requests_total,
                http_request_duration_seconds,
                transitions_total,
                races_lost_total,
                outbound_failures_total,
                reactions_total,
                timers_armed,
            }),
        }
    }

    /// Current total request count (sum across all labels).
    pub fn requests(&self) -> u64 {
        let mut total = 0u64;
        for mf in &self.inner.http_requests_total.collect() {
            for m in mf.get_metric() {
                total += m.get_counter().get_value() as u64;
            }
        }
        total
    }

    fn record_request(&self, method: &str, path: &str, status: u16, duration_secs: f64) {
        let status_str = status.to_string();
        self.inner
            .http_requests_total
            .with_label_values(&[method, path, &status_str])
            .inc();
        self.inner
            .http_request_duration_seconds
            .with_label_values(&[method, path])
            .observe(duration_secs);
    }

    // -- Coordination counters --

    pub fn record_transition(&self, to: RequestStatus) {
        self.inner
            .transitions_total
            .with_label_values(&[to.as_str()])
            .inc();
    }

    /// A resolution attempt lost to a concurrent one.
    pub fn record_race_lost(&self, op: &str) {
        self.inner.races_lost_total.with_label_values(&[op]).inc();
    }

    pub fn record_outbound_failure(&self, command: &str) {
        self.inner
            .outbound_failures_total
            .with_label_values(&[command])
            .inc();
    }

    pub fn record_reaction(&self, disposition: &str) {
        self.inner
            .reactions_total
            .with_label_values(&[disposition])
            .inc();
    }

    pub fn transitions(&self, to: RequestStatus) -> u64 {
        self.inner
            .transitions_total
            .with_label_values(&[to.as_str()])
            .get()
    }

    pub fn races_lost(&self, op: &str) -> u64 {
        self.inner.races_lost_total.with_label_values(&[op]).get()
    }

    pub fn outbound_failures(&self, command: &str) -> u64 {
        self.inner
            .outbound_failures_total
            .with_label_values(&[command])
            .get()
    }

    pub fn reactions(&self, disposition: &str) -> u64 {
        self.inner
            .reactions_total
            .with_label_values(&[disposition])
            .get()
    }

    /// Access the armed-timer gauge for updating.
    pub fn timers_armed(&self) -> &IntGauge {
        &self.inner.timers_armed
    }

    /// Gather all metrics and encode to Prometheus text format.
    pub fn gather_and_encode(&self) -> Result<String, String> {
        let encoder = TextEncoder::new();
        let metric_families = self.inner.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|e| format!("failed to encode metrics: {e}"))?;
        String::from_utf8(buffer).map_err(|e| format!("metrics encoding produced invalid UTF-8: {e}"))
    }
}

impl Default for ApiMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Replace UUID segments with `{id}` to bound label cardinality. Used when
/// the request did not match a route.
fn normalize_path(path: &str) -> String {
    path.split('/')
        .map(|segment| {
            if uuid::Uuid::parse_str(segment).is_ok() {
                "{id}"
            } else {
                segment
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Middleware that records HTTP request metrics.
///
/// The path label is the matched route template when available.
pub async fn metrics_middleware(request: Request, next: Next) -> Response {
    let metrics = request.extensions().get::<ApiMetrics>().cloned();
    let method = request.method().to_string();
    let path = match request.extensions().get::<MatchedPath>() {
        Some(matched) => matched.as_str().to_string(),
        None => normalize_path(request.uri().path()),
    };
    let start = Instant::now();

    let response = next.run(request).await;

    if let Some(m) = metrics {
        let duration = start.elapsed().as_secs_f64();
        m.record_request(&method, &path, response.status().as_u16(), duration);
    }

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_at_zero() {
        let m = ApiMetrics::new();
        assert_eq!(m.requests(), 0);
        assert_eq!(m.transitions(RequestStatus::Ready), 0);
        assert_eq!(m.timers_armed().get(), 0);
    }

    #[test]
    fn requests_increment() {
        let m = ApiMetrics::new();
        m.record_request("GET", "/v1/middleman/requests/{id}", 200, 0.01);
        m.record_request("POST", "/v1/chat/reactions", 200, 0.02);
        assert_eq!(m.requests(), 2);
    }

    #[test]
    fn clone_shares_underlying_counters() {
        let m = ApiMetrics::new();
        let clone = m.clone();
        m.record_transition(RequestStatus::Declined);
        clone.record_transition(RequestStatus::Declined);
        assert_eq!(m.transitions(RequestStatus::Declined), 2);
        assert_eq!(m.transitions(RequestStatus::Ready), 0);
    }

    #[test]
    fn labelled_counters_are_independent() {
        let m = ApiMetrics::new();
        m.record_outbound_failure("create_thread");
        m.record_race_lost("timeout");
        m.record_reaction("ignored_emoji");
        m.record_reaction("ignored_emoji");
        assert_eq!(m.outbound_failures("create_thread"), 1);
        assert_eq!(m.outbound_failures("announce_ready"), 0);
        assert_eq!(m.races_lost("timeout"), 1);
        assert_eq!(m.reactions("ignored_emoji"), 2);
    }

    #[test]
    fn gather_and_encode_produces_text() {
        let m = ApiMetrics::new();
        m.record_request("GET", "/health/liveness", 200, 0.001);
        m.record_transition(RequestStatus::AwaitingAcceptance);
        m.timers_armed().set(3);
        let output = m.gather_and_encode().unwrap();
        assert!(output.contains("mm_http_requests_total"));
        assert!(output.contains("mm_transitions_total"));
        assert!(output.contains("mm_timers_armed 3"));
    }

    #[test]
    fn normalize_path_replaces_uuid() {
        let path = "/v1/middleman/requests/550e8400-e29b-41d4-a716-446655440000/accept";
        assert_eq!(normalize_path(path), "/v1/middleman/requests/{id}/accept");
    }

    #[test]
    fn normalize_path_preserves_other_segments() {
        assert_eq!(normalize_path("/v1/chat/reactions"), "/v1/chat/reactions");
    }
}
