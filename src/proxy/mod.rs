//! Reverse proxy in front of the qBittorrent WebUI
//!
//! Ban requests from PeerBanHelper are intercepted and turned into engine
//! operations; everything else allowed by the request policy is forwarded to
//! the upstream. Peer lists coming back from the upstream are filtered so banned
//! peers disappear from the client's view immediately.
//!
//! - [`handlers`]: Request policy and the ban pre/post handlers
//! - [`forward`]: Upstream client and header rewriting
//! - [`ratelimit`]: Token bucket for POST requests

pub mod forward;
pub mod handlers;
pub mod ratelimit;

use crate::audit::AuditLog;
use crate::config::Config;
use crate::core::engine::BanEngine;
use crate::core::error::Result;
use axum::Router;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use forward::Upstream;
use ratelimit::TokenBucket;
use std::sync::{Arc, Mutex, PoisonError};

/// Request rejections and failures, each mapped to one status code.
///
/// Responses carry no body, matching what qBittorrent clients expect from a
/// refused API call.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("method not allowed")]
    MethodNotAllowed,

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("request body too large")]
    PayloadTooLarge,

    #[error("rate limit exceeded")]
    RateLimited,

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("upstream unreachable")]
    BadGateway,

    #[error("upstream timed out")]
    GatewayTimeout,

    #[error("internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Engine(#[from] crate::core::error::Error),
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::BadGateway => StatusCode::BAD_GATEWAY,
            Self::GatewayTimeout => StatusCode::GATEWAY_TIMEOUT,
            Self::Internal(_) | Self::Engine(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        self.status().into_response()
    }
}

/// Shared state of the proxy handlers.
pub struct ProxyState {
    /// `None` when nftables is disabled; ban requests are then forwarded untouched.
    pub engine: Option<BanEngine>,
    pub upstream: Upstream,
    pub body_limit: usize,
    pub audit: AuditLog,
    limiter: Mutex<TokenBucket>,
}

impl ProxyState {
    pub fn new(
        engine: Option<BanEngine>,
        upstream: Upstream,
        limiter: TokenBucket,
        body_limit: usize,
        audit: AuditLog,
    ) -> Self {
        Self {
            engine,
            upstream,
            body_limit,
            audit,
            limiter: Mutex::new(limiter),
        }
    }

    /// Builds the state from validated configuration.
    ///
    /// # Errors
    ///
    /// Returns `Err` if the upstream client cannot be configured.
    pub fn from_config(config: &Config, engine: Option<BanEngine>) -> Result<Self> {
        let rate = config.rate_limit;
        Ok(Self::new(
            engine,
            Upstream::new(&config.upstream, config.upstream_timeout)?,
            TokenBucket::new(rate.max_tokens, rate.refill_interval, rate.tokens_per_refill),
            config.body_limit,
            AuditLog::new(&config.audit_path),
        ))
    }

    /// Takes one rate-limit token.
    pub fn try_consume(&self) -> bool {
        self.limiter
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .try_consume()
    }
}

/// Every request goes through one fallback handler that applies the policy.
pub fn router(state: Arc<ProxyState>) -> Router {
    Router::new()
        .fallback(handlers::handle)
        .with_state(state)
}
