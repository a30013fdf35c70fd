//! Per-IP rate limiting with governor.
//!
//! Two keyed limiters: a global one for every route and a stricter one in front of
//! login and registration.

use axum::{
    extract::{ConnectInfo, Extension, Request},
    http::HeaderValue,
    middleware::Next,
    response::{IntoResponse, Response},
};
use governor::{
    clock::{Clock, DefaultClock},
    middleware::NoOpMiddleware,
    state::keyed::DashMapStateStore,
    Quota, RateLimiter,
};
use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    num::NonZeroU32,
    sync::Arc,
};
use tracing::warn;

use crate::config::SecurityConfig;
use crate::error::ApiError;

pub type KeyedRateLimiter =
    RateLimiter<IpAddr, DashMapStateStore<IpAddr>, DefaultClock, NoOpMiddleware>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub per_second: u32,
    pub burst: u32,
    pub enabled: bool,
}

impl RateLimitConfig {
    pub fn new(per_second: u32, burst: u32) -> Self {
        Self {
            per_second,
            burst,
            enabled: true,
        }
    }

    pub fn disabled() -> Self {
        Self {
            per_second: 0,
            burst: 0,
            enabled: false,
        }
    }

    /// `None` when disabled or when the rate is zero.
    pub fn create_limiter(&self) -> Option<Arc<KeyedRateLimiter>> {
        if !self.enabled {
            return None;
        }

        let rate = NonZeroU32::new(self.per_second)?;
        let burst = NonZeroU32::new(self.burst.max(1)).unwrap_or(rate);
        let quota = Quota::per_second(rate).allow_burst(burst);

        Some(Arc::new(RateLimiter::dashmap(quota)))
    }
}

#[derive(Clone)]
pub struct RateLimitState {
    pub global_limiter: Option<Arc<KeyedRateLimiter>>,
    pub auth_limiter: Option<Arc<KeyedRateLimiter>>,
    pub global_config: RateLimitConfig,
    pub auth_config: RateLimitConfig,
}

impl RateLimitState {
    pub fn with_config(global: RateLimitConfig, auth: RateLimitConfig) -> Self {
        Self {
            global_limiter: global.create_limiter(),
            auth_limiter: auth.create_limiter(),
            global_config: global,
            auth_config: auth,
        }
    }

    pub fn from_security(security: &SecurityConfig) -> Self {
        if !security.rate_limiting_enabled {
            return Self::disabled();
        }

        Self::with_config(
            RateLimitConfig::new(security.rate_limit_per_second, security.rate_limit_burst),
            RateLimitConfig::new(
                security.auth_rate_limit_per_second,
                security.auth_rate_limit_burst,
            ),
        )
    }

    pub fn disabled() -> Self {
        Self {
            global_limiter: None,
            auth_limiter: None,
            global_config: RateLimitConfig::disabled(),
            auth_config: RateLimitConfig::disabled(),
        }
    }
}

/// 429 in the standard envelope, with `Retry-After`.
#[derive(Debug)]
pub struct RateLimitExceeded {
    pub message: &'static str,
    pub retry_after_secs: u64,
}

impl IntoResponse for RateLimitExceeded {
    fn into_response(self) -> Response {
        let mut response = ApiError::too_many_requests(self.message).into_response();

        if let Ok(value) = HeaderValue::from_str(&self.retry_after_secs.to_string()) {
            response.headers_mut().insert("Retry-After", value.clone());
            response.headers_mut().insert("X-RateLimit-Reset", value);
        }

        response
    }
}

pub fn client_ip(req: &Request) -> IpAddr {
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
}

async fn check(
    limiter: Option<&Arc<KeyedRateLimiter>>,
    config: &RateLimitConfig,
    message: &'static str,
    request: Request,
    next: Next,
) -> Result<Response, RateLimitExceeded> {
    let Some(limiter) = limiter else {
        return Ok(next.run(request).await);
    };

    let ip = client_ip(&request);

    match limiter.check_key(&ip) {
        Ok(_) => {
            let mut response = next.run(request).await;
            // The innermost limiter's header wins, so login reports the auth rate.
            if let Ok(value) = HeaderValue::from_str(&config.per_second.to_string()) {
                response
                    .headers_mut()
                    .entry("X-RateLimit-Limit")
                    .or_insert(value);
            }
            Ok(response)
        }
        Err(not_until) => {
            let retry_after = not_until
                .wait_time_from(DefaultClock::default().now())
                .as_secs()
                .max(1);

            warn!(ip = %ip, retry_after_secs = retry_after, "{}", message);

            Err(RateLimitExceeded {
                message,
                retry_after_secs: retry_after,
            })
        }
    }
}

pub async fn rate_limit_middleware(
    state: Option<Extension<RateLimitState>>,
    request: Request,
    next: Next,
) -> Result<Response, RateLimitExceeded> {
    match state {
        Some(Extension(state)) => {
            check(
                state.global_limiter.as_ref(),
                &state.global_config,
                "Too many requests",
                request,
                next,
            )
            .await
        }
        None => Ok(next.run(request).await),
    }
}

pub async fn auth_rate_limit_middleware(
    state: Option<Extension<RateLimitState>>,
    request: Request,
    next: Next,
) -> Result<Response, RateLimitExceeded> {
    match state {
        Some(Extension(state)) => {
            check(
                state.auth_limiter.as_ref(),
                &state.auth_config,
                "Too many authentication attempts",
                request,
                next,
            )
            .await
        }
        None => Ok(next.run(request).await),
    }
}
