//! Per-service request pipelines.
//!
//! Each registered service gets an ordered chain of typed stages, composed
//! once at startup: breaker gate → authentication → rate limit → cache
//! lookup. A stage either lets the request continue, answers it directly
//! (cache hit, short-circuit), or fails it with a [`GatewayError`] that the
//! dispatcher turns into the error envelope. No per-request allocation of
//! middleware lists.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::{HeaderMap, Method};
use axum::response::Response;
use futures_util::future::BoxFuture;

use crate::auth::{Authenticator, Identity};
use crate::cache::ResponseCache;
use crate::error::GatewayError;
use crate::observability::metrics;
use crate::registry::{AuthMode, ServiceDescriptor, ServiceRegistry};
use crate::resilience::{Admission, BreakerRegistry};
use crate::security::RateLimiter;

/// Mutable per-request state threaded through the stages.
pub struct RequestContext {
    pub descriptor: Arc<ServiceDescriptor>,
    pub peer: SocketAddr,
    pub request_id: String,
    pub method: Method,
    pub path: String,
    pub query: Option<String>,
    pub headers: HeaderMap,
    /// Resolved by the auth stage; Anonymous until then.
    pub identity: Identity,
    /// Set by the cache stage on a miss so the forwarder stores the response.
    pub cache_key: Option<String>,
    /// This request holds the service's half-open probe slot. The slot is
    /// freed by a recorded backend outcome, or released explicitly when the
    /// request ends without one.
    pub breaker_probe: bool,
}

impl RequestContext {
    /// Identity key for rate limiting: authenticated principal, or peer
    /// address so anonymous callers are throttled individually.
    pub fn rate_limit_key(&self) -> String {
        self.identity
            .rate_limit_key()
            .unwrap_or_else(|| format!("ip:{}", self.peer.ip()))
    }
}

pub enum StageOutcome {
    /// Proceed to the next stage (or to forwarding).
    Continue,
    /// Answer the request now without contacting the backend.
    Respond(Response),
}

/// One step of a service's request pipeline.
pub trait Stage: Send + Sync {
    fn handle<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
    ) -> BoxFuture<'a, Result<StageOutcome, GatewayError>>;
}

/// Fails fast while the service's breaker is open.
struct BreakerGate {
    breakers: Arc<BreakerRegistry>,
}

impl Stage for BreakerGate {
    fn handle<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
    ) -> BoxFuture<'a, Result<StageOutcome, GatewayError>> {
        Box::pin(async move {
            match self.breakers.check(&ctx.descriptor.name) {
                Ok(admission) => {
                    ctx.breaker_probe = admission == Admission::Probe;
                    Ok(StageOutcome::Continue)
                }
                Err(retry_after_secs) => Err(GatewayError::ServiceUnavailable {
                    service: ctx.descriptor.name.clone(),
                    retry_after_secs,
                }),
            }
        })
    }
}

/// Resolves the caller identity and enforces required scopes.
struct AuthStage {
    authenticator: Arc<Authenticator>,
}

impl Stage for AuthStage {
    fn handle<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
    ) -> BoxFuture<'a, Result<StageOutcome, GatewayError>> {
        Box::pin(async move {
            let identity = self
                .authenticator
                .authenticate(&ctx.headers, ctx.peer, &ctx.path, ctx.descriptor.auth_mode)
                .await
                .inspect_err(|_| metrics::record_auth_failure(&ctx.descriptor.name))?;
            self.authenticator
                .require_scope(&identity, &ctx.descriptor.required_scopes)?;
            ctx.identity = identity;
            Ok(StageOutcome::Continue)
        })
    }
}

/// Per-identity fixed-window throttle.
struct RateLimitStage {
    limiter: Arc<RateLimiter>,
}

impl Stage for RateLimitStage {
    fn handle<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
    ) -> BoxFuture<'a, Result<StageOutcome, GatewayError>> {
        Box::pin(async move {
            match self.limiter.allow(&ctx.descriptor, &ctx.rate_limit_key()) {
                Ok(()) => Ok(StageOutcome::Continue),
                Err(retry_after_secs) => {
                    tracing::warn!(
                        service = %ctx.descriptor.name,
                        key = %ctx.rate_limit_key(),
                        "Rate limit exceeded"
                    );
                    metrics::record_rate_limited(&ctx.descriptor.name);
                    Err(GatewayError::Throttled { retry_after_secs })
                }
            }
        })
    }
}

/// Serves cacheable GETs from memory; marks misses for store-on-response.
struct CacheStage {
    cache: Arc<ResponseCache>,
}

impl Stage for CacheStage {
    fn handle<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
    ) -> BoxFuture<'a, Result<StageOutcome, GatewayError>> {
        Box::pin(async move {
            if !self
                .cache
                .applies(&ctx.descriptor, ctx.method.as_str(), &ctx.path)
            {
                return Ok(StageOutcome::Continue);
            }
            let key =
                ResponseCache::cache_key(ctx.method.as_str(), &ctx.path, ctx.query.as_deref());
            if let Some(entry) = self.cache.lookup(&key) {
                tracing::debug!(
                    request_id = %ctx.request_id,
                    service = %ctx.descriptor.name,
                    path = %ctx.path,
                    "Cache hit"
                );
                metrics::record_cache(&ctx.descriptor.name, true);
                return Ok(StageOutcome::Respond(ResponseCache::to_response(&entry)));
            }
            metrics::record_cache(&ctx.descriptor.name, false);
            ctx.cache_key = Some(key);
            Ok(StageOutcome::Continue)
        })
    }
}

/// Shared handles the stages draw from.
pub struct PipelineDeps {
    pub breakers: Arc<BreakerRegistry>,
    pub authenticator: Arc<Authenticator>,
    pub limiter: Arc<RateLimiter>,
    pub cache: Arc<ResponseCache>,
}

/// The composed, immutable stage chain for one service.
pub struct ServicePipeline {
    stages: Vec<Box<dyn Stage>>,
    breakers: Arc<BreakerRegistry>,
}

impl ServicePipeline {
    fn for_service(descriptor: &ServiceDescriptor, deps: &PipelineDeps) -> Self {
        let mut stages: Vec<Box<dyn Stage>> = Vec::with_capacity(4);
        stages.push(Box::new(BreakerGate {
            breakers: deps.breakers.clone(),
        }));
        if descriptor.auth_mode != AuthMode::None || !descriptor.required_scopes.is_empty() {
            stages.push(Box::new(AuthStage {
                authenticator: deps.authenticator.clone(),
            }));
        }
        stages.push(Box::new(RateLimitStage {
            limiter: deps.limiter.clone(),
        }));
        if descriptor.cacheable {
            stages.push(Box::new(CacheStage {
                cache: deps.cache.clone(),
            }));
        }
        Self {
            stages,
            breakers: deps.breakers.clone(),
        }
    }

    /// Run the chain. `Ok(Some(response))` means a stage answered the
    /// request; `Ok(None)` means it should be forwarded.
    ///
    /// A request admitted as the half-open probe that ends here (stage
    /// error or direct response) never reaches the backend, so its probe
    /// slot is handed back instead of leaking.
    pub async fn run(
        &self,
        ctx: &mut RequestContext,
    ) -> Result<Option<Response>, GatewayError> {
        for stage in &self.stages {
            match stage.handle(ctx).await {
                Ok(StageOutcome::Continue) => continue,
                Ok(StageOutcome::Respond(response)) => {
                    self.release_unused_probe(ctx);
                    return Ok(Some(response));
                }
                Err(e) => {
                    self.release_unused_probe(ctx);
                    return Err(e);
                }
            }
        }
        Ok(None)
    }

    fn release_unused_probe(&self, ctx: &RequestContext) {
        if ctx.breaker_probe {
            self.breakers.release_probe(&ctx.descriptor.name);
        }
    }
}

/// Compose one pipeline per registered service.
pub fn build_pipelines(
    registry: &ServiceRegistry,
    deps: &PipelineDeps,
) -> HashMap<String, ServicePipeline> {
    registry
        .descriptors()
        .iter()
        .map(|d| (d.name.clone(), ServicePipeline::for_service(d, deps)))
        .collect()
}
