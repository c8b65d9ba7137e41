use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::runtime::Handle;
use tokio::task::AbortHandle;
use tracing::{debug, info};

use crate::context::ExecutionContext;
use crate::error::RouterError;
use crate::reply;
use crate::server::provider::RouteRegistry;
use crate::strategy::ExecutionStrategy;
use crate::transport::{Method, ServerBinder, StreamingService, WireRequest, WireResponse};

/// Routes inbound calls to the adapter registered for their path.
///
/// Built from a drained [`RouteRegistry`]; binding flattens the registry
/// into one immutable dispatch table with per-route execution offloading
/// already applied.
pub struct RpcRouter {
    registry: RouteRegistry,
}

impl RpcRouter {
    pub fn new(registry: RouteRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &RouteRegistry {
        &self.registry
    }

    /// Bind this router through the transport collaborator.
    ///
    /// The dispatch table is constructed once per call and is read-only
    /// for the lifetime of the bound server. Strategy resolution happens
    /// here: an explicit per-route strategy wins, blocking shapes
    /// otherwise offload, async shapes take the context default.
    pub async fn bind<B: ServerBinder>(
        &self,
        binder: &B,
        exec: &ExecutionContext,
    ) -> Result<B::Handle, RouterError> {
        let mut table: DispatchTable = HashMap::default();
        for (path, provider) in self.registry.iter() {
            let strategy = ExecutionStrategy::resolve(
                provider.strategy(),
                provider.descriptor().kind(),
                exec.default_strategy(),
            );
            let mut route = provider.build_route(exec);
            if strategy.is_offload() {
                route = Arc::new(OffloadRoute {
                    inner: route,
                    executor: exec.executor().clone(),
                });
            }
            table.insert(path.clone(), route);
        }

        info!(routes = table.len(), "Binding RPC router");
        let service = Arc::new(DispatchService { routes: table });
        binder
            .bind_streaming(service)
            .await
            .map_err(RouterError::Bind)
    }

    /// Release every route resource immediately.
    pub async fn close(&self) -> Result<(), crate::error::ShutdownError> {
        self.registry.close().await
    }

    /// Release every route resource after draining in-flight work.
    pub async fn close_graceful(&self) -> Result<(), crate::error::ShutdownError> {
        self.registry.close_graceful().await
    }
}

type DispatchTable = HashMap<String, Arc<dyn StreamingService>, ahash::RandomState>;

struct DispatchService {
    routes: DispatchTable,
}

#[async_trait]
impl StreamingService for DispatchService {
    async fn handle(&self, request: WireRequest) -> WireResponse {
        if *request.method() != Method::Post {
            debug!(method = %request.method(), path = request.path(), "Rejecting non-POST request");
            return reply::not_implemented_response();
        }
        match self.routes.get(request.path()) {
            Some(route) => route.handle(request).await,
            None => {
                debug!(path = request.path(), "No route registered for path");
                reply::not_implemented_response()
            }
        }
    }
}

/// Hops adapter invocation onto the executor before running it, keeping
/// the transport thread free. Transport-level cancellation aborts the
/// offloaded task.
struct OffloadRoute {
    inner: Arc<dyn StreamingService>,
    executor: Handle,
}

#[async_trait]
impl StreamingService for OffloadRoute {
    async fn handle(&self, request: WireRequest) -> WireResponse {
        let inner = Arc::clone(&self.inner);
        let encoding = request.encoding().clone();
        let task = self
            .executor
            .spawn(async move { inner.handle(request).await });
        let _abort = AbortOnDrop(task.abort_handle());
        match task.await {
            Ok(response) => response,
            Err(join_err) => {
                reply::new_error_response(encoding, reply::join_error_status(join_err))
            }
        }
    }
}

struct AbortOnDrop(AbortHandle);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}
