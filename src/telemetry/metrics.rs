use axum::{extract::State, http::StatusCode, response::IntoResponse};
use metrics::{counter, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::Duration;
use tracing::warn;

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Handle to the process-wide Prometheus recorder, if one is installed.
#[derive(Clone)]
pub struct MetricsState {
    handle: Option<PrometheusHandle>,
}

impl MetricsState {
    pub fn new(enabled: bool) -> Self {
        if !enabled {
            return Self::disabled();
        }

        if let Some(handle) = PROMETHEUS_HANDLE.get() {
            return Self {
                handle: Some(handle.clone()),
            };
        }

        match PrometheusBuilder::new().install_recorder() {
            Ok(handle) => Self {
                handle: Some(PROMETHEUS_HANDLE.get_or_init(|| handle).clone()),
            },
            Err(e) => {
                warn!(error = %e, "Prometheus recorder unavailable, metrics disabled");
                Self::disabled()
            }
        }
    }

    pub fn disabled() -> Self {
        Self { handle: None }
    }

    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(|h| h.render())
    }

    pub fn is_enabled(&self) -> bool {
        self.handle.is_some()
    }
}

pub async fn metrics_handler(State(state): State<MetricsState>) -> impl IntoResponse {
    match state.render() {
        Some(metrics) => (StatusCode::OK, metrics),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            "Metrics not enabled".to_string(),
        ),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthOutcome {
    Success,
    InvalidCredentials,
    MissingCredentials,
    MalformedToken,
    InvalidToken,
    TokenExpired,
}

impl AuthOutcome {
    fn as_str(&self) -> &'static str {
        match self {
            AuthOutcome::Success => "success",
            AuthOutcome::InvalidCredentials => "invalid_credentials",
            AuthOutcome::MissingCredentials => "missing_credentials",
            AuthOutcome::MalformedToken => "malformed_token",
            AuthOutcome::InvalidToken => "invalid_token",
            AuthOutcome::TokenExpired => "token_expired",
        }
    }
}

pub fn record_auth_attempt(action: &str, outcome: AuthOutcome) {
    counter!(
        "auth_attempts_total",
        "action" => action.to_string(),
        "outcome" => outcome.as_str()
    )
    .increment(1);
}

pub fn record_permission_check(cached: bool, granted: bool, duration: Duration) {
    counter!(
        "permission_checks_total",
        "cached" => cached.to_string(),
        "granted" => granted.to_string()
    )
    .increment(1);

    histogram!(
        "permission_check_duration_seconds",
        "cached" => cached.to_string()
    )
    .record(duration.as_secs_f64());
}

/// `gate` is `"role"` or `"permission"`.
pub fn record_gate_denial(gate: &'static str) {
    counter!("gate_denials_total", "gate" => gate).increment(1);
}

pub fn record_request_latency(method: &str, route: &str, status: u16, duration: Duration) {
    histogram!(
        "http_request_duration_seconds",
        "method" => method.to_string(),
        "route" => route.to_string(),
        "status" => status.to_string()
    )
    .record(duration.as_secs_f64());
}
