//! Observability: structured logs, Prometheus metrics and optional OTLP trace export.

pub mod metrics;
pub mod tracing;

pub use metrics::{
    record_auth_attempt, record_gate_denial, record_permission_check, AuthOutcome, MetricsState,
};
pub use tracing::{init_telemetry, shutdown_telemetry};
