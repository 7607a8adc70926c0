//! Model file proxy.
//!
//! Front ends that cannot fetch the storage host directly (CORS, mixed
//! content) request `/proxy?url=<file url>`. Only URLs under the configured
//! storage base are forwarded; responses are marked cacheable for a day.

use crate::server::AppState;
use axum::{
    body::Body,
    extract::{Query, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, warn};
use url::Url;

const CACHE_CONTROL: &str = "public, max-age=86400";

#[derive(Debug, Deserialize)]
pub struct ProxyQuery {
    pub url: Option<String>,
}

/// True if `target` lives under `base` (same origin, path prefix).
pub fn is_allowed(base: &Url, target: &Url) -> bool {
    target.scheme() == base.scheme()
        && target.host_str() == base.host_str()
        && target.port_or_known_default() == base.port_or_known_default()
        && target.path().starts_with(base.path())
}

fn plain(status: StatusCode, message: impl Into<String>) -> Response {
    let mut response = (status, message.into()).into_response();
    response.headers_mut().insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    response
}

/// `GET /proxy?url=...`
pub async fn handle_proxy(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ProxyQuery>,
) -> Response {
    let Some(raw) = query.url else {
        return plain(StatusCode::BAD_REQUEST, "missing url parameter");
    };
    let target = match Url::parse(&raw) {
        Ok(target) => target,
        Err(e) => return plain(StatusCode::BAD_REQUEST, format!("invalid url: {}", e)),
    };
    if !is_allowed(&state.storage_base, &target) {
        warn!("Refusing to proxy {}", target);
        return plain(StatusCode::FORBIDDEN, "url is outside the model storage");
    }

    debug!("Proxying {}", target);
    let upstream = match state.http.get(target.clone()).send().await {
        Ok(upstream) => upstream,
        Err(e) => {
            warn!("Proxy fetch of {} failed: {}", target, e);
            return plain(StatusCode::BAD_GATEWAY, format!("upstream request failed: {}", e));
        }
    };

    let status = StatusCode::from_u16(upstream.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
    if !status.is_success() {
        return plain(status, format!("upstream returned {}", status));
    }

    let content_type = upstream
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| HeaderValue::from_bytes(v.as_bytes()).ok())
        .unwrap_or_else(|| HeaderValue::from_static("application/octet-stream"));
    let content_length = upstream
        .headers()
        .get(reqwest::header::CONTENT_LENGTH)
        .and_then(|v| HeaderValue::from_bytes(v.as_bytes()).ok());

    let mut response = Response::new(Body::from_stream(upstream.bytes_stream()));
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, content_type);
    if let Some(length) = content_length {
        headers.insert(header::CONTENT_LENGTH, length);
    }
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static(CACHE_CONTROL));
    response
}
