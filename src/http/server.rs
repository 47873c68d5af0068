//! HTTP server setup and request dispatch.
//!
//! # Responsibilities
//! - Build the axum Router (dispatch wildcard, health, metrics)
//! - Wire up middleware (timeout, request ID, tracing)
//! - Compose per-service pipelines at startup
//! - Dispatch requests: registry resolve → pipeline → forward
//! - Route WebSocket upgrades through the ws-path table
//! - Run background sweepers for limiter and cache state

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{header, HeaderMap, Request},
    response::{IntoResponse, Response},
    routing::{any, get},
    Router,
};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::auth::{is_internal_caller, Authenticator, Identity};
use crate::cache::ResponseCache;
use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::health;
use crate::http::forward::forward;
use crate::http::pipeline::{build_pipelines, PipelineDeps, RequestContext, ServicePipeline};
use crate::http::request::{RequestIdLayer, REQUEST_ID_HEADER};
use crate::http::websocket;
use crate::lifecycle::Shutdown;
use crate::observability::metrics;
use crate::registry::ServiceRegistry;
use crate::resilience::BreakerRegistry;
use crate::security::RateLimiter;

/// Interval between limiter/cache sweeps.
const SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ServiceRegistry>,
    pub pipelines: Arc<HashMap<String, ServicePipeline>>,
    pub breakers: Arc<BreakerRegistry>,
    pub limiter: Arc<RateLimiter>,
    pub cache: Arc<ResponseCache>,
    pub authenticator: Arc<Authenticator>,
    pub client: Client<HttpConnector, Body>,
    pub backend_timeout: Duration,
    pub metrics: Option<PrometheusHandle>,
}

/// The gateway HTTP server.
pub struct GatewayServer {
    router: Router,
    limiter: Arc<RateLimiter>,
    cache: Arc<ResponseCache>,
    service_count: usize,
}

impl GatewayServer {
    /// Build all subsystems and compose per-service pipelines.
    pub fn new(config: GatewayConfig) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let registry = Arc::new(ServiceRegistry::from_config(&config.services)?);
        let breakers = Arc::new(BreakerRegistry::new(&config.breaker));
        let limiter = Arc::new(RateLimiter::new(&config.rate_limit));
        let cache = Arc::new(ResponseCache::new(&config.cache));
        let authenticator = Arc::new(
            Authenticator::new(&config.auth).map_err(|e| format!("authenticator: {e}"))?,
        );

        let deps = PipelineDeps {
            breakers: breakers.clone(),
            authenticator: authenticator.clone(),
            limiter: limiter.clone(),
            cache: cache.clone(),
        };
        let pipelines = Arc::new(build_pipelines(&registry, &deps));

        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());

        // The recorder is process-global; a second server in the same
        // process (tests) keeps running without its own handle.
        let metrics_handle = if config.observability.metrics_enabled {
            match metrics::init_metrics() {
                Ok(handle) => Some(handle),
                Err(e) => {
                    tracing::debug!(error = %e, "Metrics recorder already installed");
                    None
                }
            }
        } else {
            None
        };

        let state = AppState {
            registry: registry.clone(),
            pipelines,
            breakers,
            limiter: limiter.clone(),
            cache: cache.clone(),
            authenticator,
            client,
            backend_timeout: Duration::from_secs(config.timeouts.backend_secs),
            metrics: metrics_handle,
        };

        let router = Self::build_router(&config, state);

        Ok(Self {
            router,
            limiter,
            cache,
            service_count: registry.descriptors().len(),
        })
    }

    fn build_router(config: &GatewayConfig, state: AppState) -> Router {
        Router::new()
            .route("/health/live", get(health::live))
            .route("/health/ready", get(health::ready))
            .route("/metrics", get(metrics_handler))
            .route("/", any(dispatch))
            .route("/{*path}", any(dispatch))
            .with_state(state)
            .layer(TimeoutLayer::new(Duration::from_secs(
                config.timeouts.request_secs,
            )))
            .layer(RequestIdLayer)
            .layer(TraceLayer::new_for_http())
    }

    /// Run the server until the shutdown signal fires.
    pub async fn run(self, listener: TcpListener, shutdown: Shutdown) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            services = self.service_count,
            "Gateway listening"
        );

        spawn_sweeper(self.limiter.clone(), shutdown.clone(), |l| l.sweep());
        spawn_sweeper(self.cache.clone(), shutdown.clone(), |c| c.sweep());

        let mut server_rx = shutdown.subscribe();
        let app = self
            .router
            .into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = server_rx.recv().await;
            })
            .await?;

        tracing::info!("Gateway stopped");
        Ok(())
    }
}

fn spawn_sweeper<T, F>(target: Arc<T>, shutdown: Shutdown, sweep: F)
where
    T: Send + Sync + 'static,
    F: Fn(&T) + Send + 'static,
{
    let mut rx = shutdown.subscribe();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(SWEEP_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = interval.tick() => sweep(&target),
                _ = rx.recv() => break,
            }
        }
    });
}

fn is_websocket_upgrade(headers: &HeaderMap) -> bool {
    headers
        .get(header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("websocket"))
        .unwrap_or(false)
}

/// Main dispatch handler: resolve the service, run its pipeline, forward.
async fn dispatch(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    request: Request<Body>,
) -> Response {
    let start = Instant::now();
    let path = request.uri().path().to_string();

    // WebSocket upgrades dispatch through their own table, outside prefix
    // routing.
    if is_websocket_upgrade(request.headers()) {
        if let Some((descriptor, target)) = state.registry.ws_target(&path) {
            return websocket::proxy_upgrade(state.clone(), descriptor, target, request, peer)
                .await;
        }
    }

    let Some(descriptor) = state.registry.resolve(&path) else {
        tracing::debug!(path = %path, "No service matched");
        metrics::record_request("none", 404, start);
        return GatewayError::NotFound.into_response();
    };

    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
        .to_string();

    let (parts, body) = request.into_parts();
    let mut ctx = RequestContext {
        descriptor: descriptor.clone(),
        peer,
        request_id,
        method: parts.method.clone(),
        path,
        query: parts.uri.query().map(str::to_string),
        headers: parts.headers,
        identity: Identity::Anonymous,
        cache_key: None,
        breaker_probe: false,
    };

    let Some(pipeline) = state.pipelines.get(&descriptor.name) else {
        // Pipelines are composed from the same registry; this is unreachable
        // unless construction was bypassed.
        return GatewayError::Internal(format!("no pipeline for {}", descriptor.name))
            .into_response();
    };

    match pipeline.run(&mut ctx).await {
        Ok(None) => forward(&state, &ctx, body).await,
        Ok(Some(response)) => response,
        Err(e) => {
            metrics::record_request(&descriptor.name, e.status_code().as_u16(), start);
            e.into_response()
        }
    }
}

/// Prometheus exposition, restricted to internal-network callers.
async fn metrics_handler(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Response {
    if !is_internal_caller(peer.ip(), &headers) {
        tracing::warn!(peer = %peer.ip(), "External caller denied /metrics");
        return GatewayError::AuthFailure.into_response();
    }
    match &state.metrics {
        Some(handle) => handle.render().into_response(),
        None => GatewayError::NotFound.into_response(),
    }
}
