//! Request middleware.

pub mod auth;
pub mod metrics;
pub mod rate_limit;
pub mod request_context;

pub use auth::{authenticate, require_permission, require_role, MatchMode, PermissionGate, RoleGate};
pub use metrics::metrics_middleware;
pub use rate_limit::{auth_rate_limit_middleware, rate_limit_middleware, RateLimitState};
pub use request_context::{request_context_middleware, RequestId, REQUEST_ID_HEADER};
