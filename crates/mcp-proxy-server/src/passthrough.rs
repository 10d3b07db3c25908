//! Streaming passthrough to URL backends.
//!
//! `/<backend>/<rest>?<query>` is forwarded to `<backend url><rest>?<query>`. The
//! response body is streamed back as it arrives so that SSE streams keep flowing.

use axum::{
    body::Body,
    extract::{Request, State},
    http::{HeaderMap, HeaderName, HeaderValue, header},
    response::Response,
};
use futures::TryStreamExt;
use url::Url;

use crate::error::{Result, ServerError};
use crate::state::BackendState;

/// Largest request body forwarded to a backend.
const MAX_REQUEST_BYTES: usize = 4 * 1024 * 1024;

/// Client headers copied onto the outbound request.
const FORWARDED_REQUEST_HEADERS: &[&str] = &[
    "content-type",
    "accept",
    "mcp-session-id",
    "mcp-protocol-version",
    "last-event-id",
];

/// Upstream response headers that must not be relayed.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "content-length",
];

/// Forward one request to the backend.
pub async fn proxy(State(backend): State<BackendState>, request: Request) -> Result<Response> {
    let (parts, body) = request.into_parts();
    let target = upstream_url(
        &backend.upstream,
        &backend.prefix(),
        parts.uri.path(),
        parts.uri.query(),
    );
    let body = axum::body::to_bytes(body, MAX_REQUEST_BYTES)
        .await
        .map_err(|e| ServerError::BadRequest(format!("Failed to read request body: {e}")))?;

    let mut outbound = backend
        .http
        .request(parts.method.clone(), target)
        .headers(outbound_headers(&parts.headers, &backend));
    if !body.is_empty() {
        outbound = outbound.body(body);
    }
    // A timeout would cut long-lived event streams.
    if let Some(timeout) = backend.backend.request_timeout()
        && !accepts_event_stream(&parts.headers)
    {
        outbound = outbound.timeout(timeout);
    }

    tracing::debug!(backend = %backend.name, method = %parts.method, "Forwarding request");
    let upstream = outbound
        .send()
        .await
        .map_err(|e| ServerError::upstream(&backend.name, e))?;

    let status = upstream.status();
    let headers = relayed_headers(upstream.headers());
    let name = backend.name.clone();
    let stream = upstream.bytes_stream().map_err(move |e| {
        let e = e.without_url();
        tracing::warn!(backend = %name, error = %e, "Backend stream aborted");
        e
    });

    let mut response = Response::new(Body::from_stream(stream));
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    Ok(response)
}

/// Map a proxy path onto the backend URL.
///
/// The query string is appended to any query the backend URL already carries.
fn upstream_url(base: &Url, prefix: &str, path: &str, query: Option<&str>) -> Url {
    let mut url = base.clone();
    let rest = path.strip_prefix(prefix).unwrap_or_default();
    if !rest.is_empty() && rest != "/" {
        let joined = format!("{}{}", base.path().trim_end_matches('/'), rest);
        url.set_path(&joined);
    }
    if let Some(query) = query.filter(|q| !q.is_empty()) {
        let merged = match base.query().filter(|q| !q.is_empty()) {
            Some(existing) => format!("{existing}&{query}"),
            None => query.to_string(),
        };
        url.set_query(Some(&merged));
    }
    url
}

/// MCP headers from the client plus the backend's configured headers.
///
/// The client's `Authorization` header belongs to the proxy and is dropped.
fn outbound_headers(incoming: &HeaderMap, backend: &BackendState) -> HeaderMap {
    let mut out = HeaderMap::new();
    for &name in FORWARDED_REQUEST_HEADERS {
        for value in incoming.get_all(name) {
            out.append(name, value.clone());
        }
    }
    for (name, value) in &backend.backend.headers {
        match (
            HeaderName::try_from(name.as_str()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                out.insert(name, value);
            }
            _ => tracing::warn!(backend = %backend.name, header = %name, "Ignoring invalid configured header"),
        }
    }
    out
}

fn relayed_headers(upstream: &HeaderMap) -> HeaderMap {
    let mut out = upstream.clone();
    for &name in HOP_BY_HOP {
        out.remove(name);
    }
    out
}

fn accepts_event_stream(headers: &HeaderMap) -> bool {
    headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.contains("text/event-stream"))
}
