//! WebSocket proxying.
//!
//! # Responsibilities
//! - Dispatch upgrade requests via the registry's ws-path table, outside the
//!   ordinary HTTP prefix routing
//! - Run the owning service's pipeline (breaker, auth, rate limit) against
//!   the handshake before completing the upgrade
//! - Relay frames in both directions until either side closes
//!
//! # Design Decisions
//! - The streamed connection is unpoliced after the handshake; breaker,
//!   limiter and cache apply to the upgrade only
//! - Connect failure to the backend counts as a breaker failure, a
//!   completed relay as a success
//! - Close frames propagate in both directions; ping/pong forwarded as-is

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::FromRequestParts;
use axum::http::Request;
use axum::response::{IntoResponse, Response};
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as BackendMessage;
use url::Url;

use crate::auth::Identity;
use crate::http::forward::BreakerOutcomeGuard;
use crate::http::pipeline::RequestContext;
use crate::http::request::REQUEST_ID_HEADER;
use crate::http::server::AppState;
use crate::registry::ServiceDescriptor;
use crate::resilience::BreakerRegistry;

/// Hands a held probe slot back if the accepted upgrade never completes
/// (the closure below is dropped without running). Releasing after an
/// outcome has been recorded is a no-op.
struct ProbeSlotRelease {
    breakers: Arc<BreakerRegistry>,
    service: String,
}

impl Drop for ProbeSlotRelease {
    fn drop(&mut self) {
        self.breakers.release_probe(&self.service);
    }
}

/// Handle an upgrade request matched in the ws-path table.
pub async fn proxy_upgrade(
    state: AppState,
    descriptor: Arc<ServiceDescriptor>,
    target: Url,
    request: Request<Body>,
    peer: SocketAddr,
) -> Response {
    let (mut parts, _body) = request.into_parts();
    let request_id = parts
        .headers
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
        .to_string();

    // Police the handshake with the owning service's pipeline.
    let mut ctx = RequestContext {
        descriptor: descriptor.clone(),
        peer,
        request_id: request_id.clone(),
        method: parts.method.clone(),
        path: parts.uri.path().to_string(),
        query: parts.uri.query().map(str::to_string),
        headers: parts.headers.clone(),
        identity: Identity::Anonymous,
        cache_key: None,
        breaker_probe: false,
    };
    if let Some(pipeline) = state.pipelines.get(&descriptor.name) {
        match pipeline.run(&mut ctx).await {
            Ok(None) => {}
            Ok(Some(response)) => return response,
            Err(e) => return e.into_response(),
        }
    }

    let upgrade = match WebSocketUpgrade::from_request_parts(&mut parts, &()).await {
        Ok(upgrade) => upgrade,
        Err(rejection) => {
            if ctx.breaker_probe {
                state.breakers.release_probe(&descriptor.name);
            }
            return rejection.into_response();
        }
    };

    let breakers = state.breakers.clone();
    let service = descriptor.name.clone();
    let probe_slot = ctx.breaker_probe.then(|| ProbeSlotRelease {
        breakers: breakers.clone(),
        service: service.clone(),
    });
    upgrade.on_upgrade(move |client| async move {
        let guard = BreakerOutcomeGuard::new(breakers, &service);
        let backend = match connect_async(target.as_str()).await {
            Ok((socket, _)) => socket,
            Err(e) => {
                tracing::warn!(
                    request_id = %request_id,
                    service = %service,
                    error = %e,
                    "WebSocket backend connect failed"
                );
                guard.failure();
                drop(probe_slot);
                return;
            }
        };
        guard.success();
        drop(probe_slot);

        tracing::debug!(request_id = %request_id, service = %service, "WebSocket relay established");
        relay(client, backend).await;
        tracing::debug!(request_id = %request_id, service = %service, "WebSocket relay closed");
    })
}

fn to_backend(msg: Message) -> Option<BackendMessage> {
    match msg {
        Message::Text(text) => Some(BackendMessage::Text(text.as_str().into())),
        Message::Binary(data) => Some(BackendMessage::Binary(data)),
        Message::Ping(data) => Some(BackendMessage::Ping(data)),
        Message::Pong(data) => Some(BackendMessage::Pong(data)),
        Message::Close(_) => Some(BackendMessage::Close(None)),
    }
}

fn to_client(msg: BackendMessage) -> Option<Message> {
    match msg {
        BackendMessage::Text(text) => Some(Message::Text(text.as_str().into())),
        BackendMessage::Binary(data) => Some(Message::Binary(data)),
        BackendMessage::Ping(data) => Some(Message::Ping(data)),
        BackendMessage::Pong(data) => Some(Message::Pong(data)),
        BackendMessage::Close(_) => Some(Message::Close(None)),
        // Raw frames are an internal tungstenite detail.
        BackendMessage::Frame(_) => None,
    }
}

/// Frame-level bidirectional forwarding. Returns when either side closes
/// or errors.
async fn relay(
    client: WebSocket,
    backend: tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
) {
    let (mut client_tx, mut client_rx) = client.split();
    let (mut backend_tx, mut backend_rx) = backend.split();

    loop {
        tokio::select! {
            msg = client_rx.next() => {
                match msg {
                    Some(Ok(msg)) => {
                        let closing = matches!(msg, Message::Close(_));
                        if let Some(msg) = to_backend(msg) {
                            if backend_tx.send(msg).await.is_err() {
                                break;
                            }
                        }
                        if closing {
                            break;
                        }
                    }
                    _ => {
                        let _ = backend_tx.send(BackendMessage::Close(None)).await;
                        break;
                    }
                }
            }
            msg = backend_rx.next() => {
                match msg {
                    Some(Ok(msg)) => {
                        let closing = matches!(msg, BackendMessage::Close(_));
                        if let Some(msg) = to_client(msg) {
                            if client_tx.send(msg).await.is_err() {
                                break;
                            }
                        }
                        if closing {
                            break;
                        }
                    }
                    _ => {
                        let _ = client_tx.send(Message::Close(None)).await;
                        break;
                    }
                }
            }
        }
    }
}
