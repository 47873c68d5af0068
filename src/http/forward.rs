//! Backend forwarding.
//!
//! # Responsibilities
//! - Rewrite the path (strip the matched service prefix)
//! - Strip hop-by-hop and caller-supplied trust headers, then inject the
//!   gateway's own: request id, correlation id, forwarded-for, version
//!   marker, and the verified identity
//! - Classify the outcome for the breaker (<500 success, >=500 failure)
//! - Populate the response cache on 2xx cacheable GETs
//!
//! # Design Decisions
//! - Injected identity headers are the backend's sole signal of caller
//!   identity; inbound copies of those headers are dropped before injection
//!   so callers cannot forge them
//! - A dropped forward future (caller disconnect) records a breaker failure
//!   via [`BreakerOutcomeGuard`], keeping breaker accounting accurate

use std::sync::Arc;
use std::time::Instant;

use axum::body::{Body, Bytes};
use axum::http::response::Parts;
use axum::http::uri::{Authority, PathAndQuery, Scheme};
use axum::http::{header, HeaderValue, Request, Uri};
use axum::response::{IntoResponse, Response};
use futures_util::StreamExt;

use crate::auth::Identity;
use crate::error::{GatewayError, GATEWAY_VERSION};
use crate::http::pipeline::RequestContext;
use crate::http::server::AppState;
use crate::observability::metrics;
use crate::resilience::BreakerRegistry;

/// Cacheable response bodies larger than this are passed through unstored.
const CACHE_BODY_LIMIT: usize = 2 * 1024 * 1024;

/// Hop-by-hop headers, never forwarded.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
];

/// Trust headers owned by the gateway; inbound copies are dropped.
const TRUST_HEADERS: &[&str] = &[
    "x-user-id",
    "x-user-email",
    "x-user-role",
    "x-api-key-id",
    "x-api-key-name",
    "x-api-key-scopes",
    "x-gateway-version",
];

/// Records the breaker outcome exactly once. If the forward future is
/// dropped before an outcome is recorded (caller disconnect), the drop
/// counts as a failure.
pub struct BreakerOutcomeGuard {
    breakers: Arc<BreakerRegistry>,
    service: String,
    armed: bool,
}

impl BreakerOutcomeGuard {
    pub fn new(breakers: Arc<BreakerRegistry>, service: &str) -> Self {
        Self {
            breakers,
            service: service.to_string(),
            armed: true,
        }
    }

    pub fn success(mut self) {
        self.armed = false;
        self.breakers.record_success(&self.service);
    }

    pub fn failure(mut self) {
        self.armed = false;
        self.breakers.record_failure(&self.service);
    }
}

impl Drop for BreakerOutcomeGuard {
    fn drop(&mut self) {
        if self.armed {
            tracing::debug!(service = %self.service, "Forward aborted, recording breaker failure");
            self.breakers.record_failure(&self.service);
        }
    }
}

fn strip_prefix(path: &str, prefix: &str) -> String {
    let rest = path.strip_prefix(prefix).unwrap_or(path);
    if rest.starts_with('/') {
        rest.to_string()
    } else {
        format!("/{rest}")
    }
}

fn backend_uri(ctx: &RequestContext) -> Result<(Uri, String), GatewayError> {
    let target = &ctx.descriptor.target;
    let host = target
        .host_str()
        .ok_or_else(|| GatewayError::Internal("target origin has no host".into()))?;
    let authority = match target.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    };

    let path = strip_prefix(&ctx.path, &ctx.descriptor.path_prefix);
    let path_and_query = match &ctx.query {
        Some(query) => format!("{path}?{query}"),
        None => path,
    };

    let uri = Uri::builder()
        .scheme(
            target
                .scheme()
                .parse::<Scheme>()
                .map_err(|_| GatewayError::Internal("bad target scheme".into()))?,
        )
        .authority(
            authority
                .parse::<Authority>()
                .map_err(|_| GatewayError::Internal("bad target authority".into()))?,
        )
        .path_and_query(
            path_and_query
                .parse::<PathAndQuery>()
                .map_err(|_| GatewayError::Internal("bad rewritten path".into()))?,
        )
        .build()
        .map_err(|e| GatewayError::Internal(format!("backend uri: {e}")))?;

    Ok((uri, authority))
}

fn insert_str(req: &mut Request<Body>, name: &'static str, value: &str) {
    if let Ok(value) = HeaderValue::from_str(value) {
        req.headers_mut().insert(name, value);
    }
}

/// Build the outbound request: copied headers minus hop-by-hop and forged
/// trust headers, plus the gateway's injected ones.
fn build_outbound(
    ctx: &RequestContext,
    body: Body,
    uri: Uri,
    authority: &str,
) -> Result<Request<Body>, GatewayError> {
    let mut outbound = Request::builder()
        .method(ctx.method.clone())
        .uri(uri)
        .body(body)
        .map_err(|e| GatewayError::Internal(format!("outbound request: {e}")))?;

    for (name, value) in ctx.headers.iter() {
        let lower = name.as_str();
        if lower == "host"
            || HOP_BY_HOP.contains(&lower)
            || TRUST_HEADERS.contains(&lower)
        {
            continue;
        }
        outbound.headers_mut().insert(name.clone(), value.clone());
    }

    insert_str(&mut outbound, "host", authority);
    insert_str(&mut outbound, "x-request-id", &ctx.request_id);

    let correlation_id = ctx
        .headers
        .get("x-correlation-id")
        .and_then(|v| v.to_str().ok())
        .unwrap_or(&ctx.request_id)
        .to_string();
    insert_str(&mut outbound, "x-correlation-id", &correlation_id);

    let peer_ip = ctx.peer.ip().to_string();
    let forwarded_for = match ctx
        .headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
    {
        Some(existing) => format!("{existing}, {peer_ip}"),
        None => peer_ip,
    };
    insert_str(&mut outbound, "x-forwarded-for", &forwarded_for);
    insert_str(&mut outbound, "x-gateway-version", GATEWAY_VERSION);

    match &ctx.identity {
        Identity::Anonymous => {}
        Identity::User(user) => {
            insert_str(&mut outbound, "x-user-id", &user.id);
            insert_str(&mut outbound, "x-user-email", &user.email);
            insert_str(&mut outbound, "x-user-role", &user.role);
        }
        Identity::ApiKey(key) => {
            insert_str(&mut outbound, "x-api-key-id", &key.id);
            insert_str(&mut outbound, "x-api-key-name", &key.name);
            insert_str(&mut outbound, "x-api-key-scopes", &key.scopes.join(","));
        }
    }

    Ok(outbound)
}

/// Forward a request whose pipeline admitted it, and answer the caller.
pub async fn forward(state: &AppState, ctx: &RequestContext, body: Body) -> Response {
    let start = Instant::now();
    let service = ctx.descriptor.name.as_str();

    let (uri, authority) = match backend_uri(ctx) {
        Ok(parts) => parts,
        Err(e) => {
            release_unused_probe(state, ctx);
            return e.into_response();
        }
    };
    let outbound = match build_outbound(ctx, body, uri, &authority) {
        Ok(req) => req,
        Err(e) => {
            release_unused_probe(state, ctx);
            return e.into_response();
        }
    };

    let guard = BreakerOutcomeGuard::new(state.breakers.clone(), service);
    let result = tokio::time::timeout(state.backend_timeout, state.client.request(outbound)).await;

    let response = match result {
        Ok(Ok(response)) => response,
        Ok(Err(e)) => {
            tracing::warn!(
                request_id = %ctx.request_id,
                service = %service,
                error = %e,
                "Backend unreachable"
            );
            guard.failure();
            metrics::record_request(service, 503, start);
            return GatewayError::ServiceUnavailable {
                service: service.to_string(),
                retry_after_secs: state.breakers.retry_after_secs(service),
            }
            .into_response();
        }
        Err(_) => {
            tracing::warn!(
                request_id = %ctx.request_id,
                service = %service,
                timeout = ?state.backend_timeout,
                "Backend call timed out"
            );
            guard.failure();
            metrics::record_request(service, 503, start);
            return GatewayError::ServiceUnavailable {
                service: service.to_string(),
                retry_after_secs: state.breakers.retry_after_secs(service),
            }
            .into_response();
        }
    };

    let status = response.status();
    if status.is_server_error() {
        guard.failure();
    } else {
        guard.success();
    }

    tracing::info!(
        request_id = %ctx.request_id,
        service = %service,
        method = %ctx.method,
        path = %ctx.path,
        status = status.as_u16(),
        duration_ms = start.elapsed().as_millis() as u64,
        "Proxied request"
    );
    metrics::record_request(service, status.as_u16(), start);

    let (parts, body) = response.into_parts();

    // Store-on-response for cacheable GET misses.
    if let Some(key) = &ctx.cache_key {
        if status.is_success() {
            return store_and_respond(state, ctx, key, parts, Body::new(body)).await;
        }
    }

    Response::from_parts(parts, Body::new(body))
}

fn release_unused_probe(state: &AppState, ctx: &RequestContext) {
    if ctx.breaker_probe {
        state.breakers.release_probe(&ctx.descriptor.name);
    }
}

/// Buffer a cacheable 2xx body up to [`CACHE_BODY_LIMIT`] and store it.
/// Bodies that declare or turn out to be larger are relayed unstored.
async fn store_and_respond(
    state: &AppState,
    ctx: &RequestContext,
    key: &str,
    parts: Parts,
    body: Body,
) -> Response {
    let declared_len = parts
        .headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok());
    if declared_len.is_some_and(|len| len > CACHE_BODY_LIMIT) {
        tracing::debug!(
            request_id = %ctx.request_id,
            length = declared_len,
            "Cacheable response over size limit, relaying unstored"
        );
        return Response::from_parts(parts, body);
    }

    let mut stream = body.into_data_stream();
    let mut chunks: Vec<Bytes> = Vec::new();
    let mut buffered = 0usize;
    while let Some(chunk) = stream.next().await {
        match chunk {
            Ok(bytes) => {
                buffered += bytes.len();
                chunks.push(bytes);
                if buffered > CACHE_BODY_LIMIT {
                    // Undeclared length ran past the limit: replay what was
                    // read, then relay the rest of the stream unstored.
                    tracing::debug!(
                        request_id = %ctx.request_id,
                        buffered,
                        "Cacheable response over size limit, relaying unstored"
                    );
                    let replay =
                        futures_util::stream::iter(chunks.into_iter().map(Ok::<_, axum::Error>));
                    return Response::from_parts(parts, Body::from_stream(replay.chain(stream)));
                }
            }
            Err(e) => {
                tracing::warn!(request_id = %ctx.request_id, error = %e, "Backend body failed mid-stream");
                return GatewayError::Internal("backend response read failed".into())
                    .into_response();
            }
        }
    }

    let bytes = Bytes::from(chunks.concat());
    state
        .cache
        .store(key.to_string(), parts.status, &parts.headers, bytes.clone());
    let mut stored = Response::from_parts(parts, Body::from(bytes));
    stored
        .headers_mut()
        .insert("x-cache", HeaderValue::from_static("miss"));
    stored
}
