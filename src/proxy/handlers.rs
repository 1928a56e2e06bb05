//! Request policy and ban handlers
//!
//! Order of checks for every request: method (405), POST path allow-list (403),
//! declared body size (413), POST rate limit (429). Requests that pass are either
//! answered by a pre-handler or forwarded upstream, and the torrent peer list is
//! filtered on the way back.

use super::{ProxyError, ProxyState};
use crate::audit::{AuditEvent, EventType};
use crate::core::engine::BanEngine;
use crate::validators::extract_peer_ip;
use axum::body::{Body, Bytes};
use axum::extract::{Request, State};
use axum::http::{HeaderMap, Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use http_body_util::BodyExt;
use hyper::body::Incoming;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub const BAN_PEERS_PATH: &str = "/api/v2/transfer/banPeers";
pub const SET_PREFERENCES_PATH: &str = "/api/v2/app/setPreferences";
pub const TORRENT_PEERS_PATH: &str = "/api/v2/sync/torrentPeers";

/// The only paths that accept POST.
pub const ALLOWED_POST_PATHS: &[&str] = &[
    "/api/v2/auth/login",
    SET_PREFERENCES_PATH,
    "/api/v2/torrents/addTrackers",
    "/api/v2/torrents/removeTrackers",
    BAN_PEERS_PATH,
];

/// Preferences a client may change through setPreferences.
pub const ALLOWED_PREFERENCE_KEYS: &[&str] = &[
    "enable_multi_connections_from_same_ip",
    "up_limit",
    "dl_limit",
    "alt_up_limit",
    "alt_dl_limit",
    "limit_utp_rate",
    "limit_lan_peers",
    "scheduler_enabled",
    "banned_IPs",
    "listen_port",
];

/// Fallback handler for every request.
pub async fn handle(State(state): State<Arc<ProxyState>>, request: Request) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    match dispatch(&state, request).await {
        Ok(response) => response,
        Err(e) => {
            if matches!(e, ProxyError::Internal(_) | ProxyError::Engine(_)) {
                error!("{method} {path}: {e}");
            }
            e.into_response()
        }
    }
}

async fn dispatch(state: &ProxyState, request: Request) -> Result<Response, ProxyError> {
    let (parts, body) = request.into_parts();
    let path = parts.uri.path();
    let is_post = parts.method == Method::POST;

    check_request(&parts.method, path, &parts.headers, state.body_limit)?;
    if is_post && !state.try_consume() {
        warn!("POST {path}: rate limit exceeded");
        return Err(ProxyError::RateLimited);
    }

    let body = axum::body::to_bytes(body, state.body_limit)
        .await
        .map_err(|e| {
            warn!("{} {path}: failed to read body: {e}", parts.method);
            ProxyError::PayloadTooLarge
        })?;

    if is_post && let Some(response) = pre_handle(state, path, &body).await? {
        return Ok(response);
    }

    let upstream = state
        .upstream
        .send(parts.method.clone(), &parts.uri, &parts.headers, body)
        .await?;

    if parts.method == Method::GET
        && path == TORRENT_PEERS_PATH
        && upstream.status().is_success()
        && let Some(engine) = &state.engine
    {
        return filter_torrent_peers(engine, upstream).await;
    }

    Ok(upstream.map(Body::new))
}

/// Method, path and size policy. Rate limiting is applied separately.
pub fn check_request(
    method: &Method,
    path: &str,
    headers: &HeaderMap,
    body_limit: usize,
) -> Result<(), ProxyError> {
    if *method != Method::GET && *method != Method::POST {
        warn!("{method} {path}: disabled");
        return Err(ProxyError::MethodNotAllowed);
    }

    if *method == Method::POST {
        if !ALLOWED_POST_PATHS.contains(&path) {
            warn!("{method} {path}: disabled");
            return Err(ProxyError::Forbidden(format!("POST {path}")));
        }

        let limit = u64::try_from(body_limit).unwrap_or(u64::MAX);
        if declared_length(headers).is_some_and(|len| len > limit) {
            warn!("{method} {path}: request body too big");
            return Err(ProxyError::PayloadTooLarge);
        }
    }

    Ok(())
}

fn declared_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(header::CONTENT_LENGTH)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}

async fn pre_handle(
    state: &ProxyState,
    path: &str,
    body: &Bytes,
) -> Result<Option<Response>, ProxyError> {
    match path {
        BAN_PEERS_PATH => match &state.engine {
            Some(engine) => ban_peers(state, engine, body).await.map(Some),
            None => Ok(None),
        },
        SET_PREFERENCES_PATH => set_preferences(state, body).await,
        _ => Ok(None),
    }
}

/// Looks up one field of an urlencoded form body.
pub fn form_field(body: &[u8], name: &str) -> Option<String> {
    url::form_urlencoded::parse(body)
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
}

/// Splits a `|`-separated peer list into bare addresses, dropping unusable tokens.
pub fn parse_peer_list(peers: &str) -> Vec<String> {
    peers
        .split('|')
        .filter_map(extract_peer_ip)
        .map(str::to_string)
        .collect()
}

async fn ban_peers(
    state: &ProxyState,
    engine: &BanEngine,
    body: &Bytes,
) -> Result<Response, ProxyError> {
    let Some(peers) = form_field(body, "peers") else {
        warn!("banPeers: no peers field");
        return Err(ProxyError::BadRequest("missing peers field".to_string()));
    };

    let addresses = parse_peer_list(&peers);
    let result = engine.append(&addresses).await;
    state
        .audit
        .record(AuditEvent::from_result(
            EventType::BanPeers,
            serde_json::json!({ "peers": addresses.len() }),
            &result,
        ))
        .await;
    result?;

    info!("banPeers: {} peers banned", addresses.len());
    Ok(StatusCode::NO_CONTENT.into_response())
}

async fn set_preferences(state: &ProxyState, body: &Bytes) -> Result<Option<Response>, ProxyError> {
    let Some(json) = form_field(body, "json") else {
        warn!("setPreferences: disabled for no json");
        return Err(ProxyError::BadRequest("missing json field".to_string()));
    };

    let preferences: serde_json::Map<String, Value> = serde_json::from_str(&json)
        .map_err(|e| ProxyError::Internal(format!("invalid preferences JSON: {e}")))?;

    if let Some(key) = preferences
        .keys()
        .find(|key| !ALLOWED_PREFERENCE_KEYS.contains(&key.as_str()))
    {
        warn!("setPreferences: disabled for key '{key}'");
        return Err(ProxyError::Forbidden(format!("preference '{key}'")));
    }

    let (Some(engine), Some(banned)) = (&state.engine, preferences.get("banned_IPs")) else {
        return Ok(None);
    };
    let banned = banned
        .as_str()
        .ok_or_else(|| ProxyError::Internal("banned_IPs is not a string".to_string()))?;

    let entries: Vec<&str> = banned.split('\n').collect();
    let result = engine.replace(entries.iter().copied()).await;
    state
        .audit
        .record(AuditEvent::from_result(
            EventType::ReplaceBans,
            serde_json::json!({ "entries": entries.len() }),
            &result,
        ))
        .await;
    result?;

    info!("setPreferences: ban list replaced");
    Ok(Some(StatusCode::NO_CONTENT.into_response()))
}

/// Removes every entry of the `peers` object whose address is banned.
/// Returns how many were removed.
pub fn strip_banned_peers(payload: &mut Value, is_banned: impl Fn(&str) -> bool) -> usize {
    let Some(peers) = payload.get_mut("peers").and_then(Value::as_object_mut) else {
        return 0;
    };
    let before = peers.len();
    peers.retain(|key, _| !extract_peer_ip(key).is_some_and(&is_banned));
    before - peers.len()
}

async fn filter_torrent_peers(
    engine: &BanEngine,
    upstream: hyper::Response<Incoming>,
) -> Result<Response, ProxyError> {
    let (mut parts, body) = upstream.into_parts();
    let bytes = body
        .collect()
        .await
        .map_err(|e| ProxyError::Internal(format!("failed to read torrentPeers body: {e}")))?
        .to_bytes();

    let mut payload: Value = serde_json::from_slice(&bytes)
        .map_err(|e| ProxyError::Internal(format!("invalid torrentPeers JSON: {e}")))?;
    let removed = strip_banned_peers(&mut payload, |ip| engine.check(ip));
    if removed > 0 {
        debug!("torrentPeers: hid {removed} banned peers");
    }

    let body = serde_json::to_vec(&payload)
        .map_err(|e| ProxyError::Internal(format!("failed to encode torrentPeers: {e}")))?;
    parts.headers.remove(header::CONTENT_LENGTH);
    parts.status = StatusCode::OK;
    Ok(Response::from_parts(parts, Body::from(body)))
}
