//! Upstream forwarding to the qBittorrent WebUI

use super::ProxyError;
use crate::core::error::{Error, Result};
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, Uri, header};
use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

/// Headers that should not be forwarded between client and upstream (hop-by-hop)
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
];

fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP_HEADERS
        .iter()
        .any(|h| name.as_str().eq_ignore_ascii_case(h))
}

/// Removes hop-by-hop headers in place.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let hop: Vec<HeaderName> = headers
        .keys()
        .filter(|name| is_hop_by_hop(name))
        .cloned()
        .collect();
    for name in hop {
        headers.remove(&name);
    }
}

/// Pooled client bound to one upstream origin.
#[derive(Clone)]
pub struct Upstream {
    client: Client<HttpConnector, Full<Bytes>>,
    origin: String,
    host: HeaderValue,
    origin_header: HeaderValue,
    timeout: Duration,
}

impl Upstream {
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the endpoint has no usable host.
    pub fn new(endpoint: &Url, timeout: Duration) -> Result<Self> {
        let host = endpoint
            .host_str()
            .ok_or_else(|| Error::Config(format!("upstream '{endpoint}' has no host")))?;
        let authority = match endpoint.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };
        let origin = endpoint.origin().ascii_serialization();

        let header = |value: &str| {
            HeaderValue::from_str(value)
                .map_err(|e| Error::Config(format!("invalid upstream '{value}': {e}")))
        };

        Ok(Self {
            client: Client::builder(TokioExecutor::new()).build_http(),
            host: header(&authority)?,
            origin_header: header(&origin)?,
            origin,
            timeout,
        })
    }

    /// Upstream URI for a request: the upstream origin plus the original path and query.
    pub fn target_uri(&self, uri: &Uri) -> std::result::Result<Uri, ProxyError> {
        let path_and_query = uri.path_and_query().map_or("/", |pq| pq.as_str());
        format!("{}{path_and_query}", self.origin)
            .parse::<Uri>()
            .map_err(|e| ProxyError::Internal(format!("failed to build upstream URI: {e}")))
    }

    /// Copies client headers for the upstream request.
    ///
    /// `accept-encoding` is dropped so responses arrive uncompressed and can be
    /// rewritten; `Host`, `Origin` and `Referer` point at the upstream so its CSRF
    /// checks accept the request.
    pub fn upstream_headers(&self, client: &HeaderMap) -> HeaderMap {
        let mut headers = client.clone();
        strip_hop_by_hop(&mut headers);
        headers.remove(header::ACCEPT_ENCODING);
        headers.remove(header::CONTENT_LENGTH);
        headers.insert(header::HOST, self.host.clone());
        headers.insert(header::ORIGIN, self.origin_header.clone());
        headers.insert(header::REFERER, self.origin_header.clone());
        headers
    }

    /// Sends one request upstream with the configured timeout.
    pub async fn send(
        &self,
        method: Method,
        uri: &Uri,
        client_headers: &HeaderMap,
        body: Bytes,
    ) -> std::result::Result<hyper::Response<Incoming>, ProxyError> {
        let target = self.target_uri(uri)?;
        debug!("Forwarding {method} {target}");

        let mut request = hyper::Request::builder()
            .method(method)
            .uri(target)
            .body(Full::new(body))
            .map_err(|e| ProxyError::Internal(format!("failed to build upstream request: {e}")))?;
        *request.headers_mut() = self.upstream_headers(client_headers);

        match tokio::time::timeout(self.timeout, self.client.request(request)).await {
            Ok(Ok(mut response)) => {
                strip_hop_by_hop(response.headers_mut());
                Ok(response)
            }
            Ok(Err(e)) => {
                warn!("Upstream request to {} failed: {e}", self.origin);
                Err(ProxyError::BadGateway)
            }
            Err(_) => {
                warn!("Upstream request to {} timed out", self.origin);
                Err(ProxyError::GatewayTimeout)
            }
        }
    }
}
