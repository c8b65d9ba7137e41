use std::any::{Any, TypeId, type_name};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use tracing::{info, warn};

use crate::codec::MessageCodec;
use crate::context::ExecutionContext;
use crate::error::{BoxError, RouteCloseFailure, RouterError, ShutdownError};
use crate::server::handler::{RouteHandler, TypedRoute};
use crate::strategy::ExecutionStrategy;
use crate::transport::StreamingService;

pub(crate) type RouteMap = HashMap<String, RouteProvider, ahash::RandomState>;

/// Which of the four registration calls produced a route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteKind {
    Unary,
    Streaming,
    Blocking,
    BlockingStreaming,
}

impl RouteKind {
    pub fn is_blocking(self) -> bool {
        matches!(self, RouteKind::Blocking | RouteKind::BlockingStreaming)
    }
}

impl fmt::Display for RouteKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouteKind::Unary => f.write_str("unary"),
            RouteKind::Streaming => f.write_str("streaming"),
            RouteKind::Blocking => f.write_str("blocking"),
            RouteKind::BlockingStreaming => f.write_str("blocking streaming"),
        }
    }
}

/// Per-route type descriptor, captured once at registration.
///
/// Typed access back out of the registry is validated against this
/// instead of cast blindly at the call site.
#[derive(Debug, Clone)]
pub struct RouteDescriptor {
    path: String,
    kind: RouteKind,
    request_type: TypeId,
    request_type_name: &'static str,
    response_type: TypeId,
    response_type_name: &'static str,
}

impl RouteDescriptor {
    pub(crate) fn new<Req: 'static, Resp: 'static>(path: String, kind: RouteKind) -> Self {
        Self {
            path,
            kind,
            request_type: TypeId::of::<Req>(),
            request_type_name: type_name::<Req>(),
            response_type: TypeId::of::<Resp>(),
            response_type_name: type_name::<Resp>(),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn kind(&self) -> RouteKind {
        self.kind
    }

    pub fn request_type_name(&self) -> &'static str {
        self.request_type_name
    }

    pub fn response_type_name(&self) -> &'static str {
        self.response_type_name
    }

    fn matches<Req: 'static, Resp: 'static>(&self) -> bool {
        self.request_type == TypeId::of::<Req>() && self.response_type == TypeId::of::<Resp>()
    }
}

/// Releasable resource owned by one route.
///
/// Closed exactly once, as part of the aggregate registry shutdown.
#[async_trait]
pub trait RouteResource: Send + Sync + 'static {
    async fn close(&self) -> Result<(), BoxError>;

    /// Drain in-flight work before releasing. Defaults to an immediate
    /// close.
    async fn close_graceful(&self) -> Result<(), BoxError> {
        self.close().await
    }
}

struct NoopResource;

#[async_trait]
impl RouteResource for NoopResource {
    async fn close(&self) -> Result<(), BoxError> {
        Ok(())
    }
}

/// Type-erased route state stored in the registry.
trait RouteEntry: Send + Sync {
    /// Build the canonical adapter for this route.
    fn build(&self, exec: &ExecutionContext) -> Arc<dyn StreamingService>;

    fn as_any(&self) -> &dyn Any;
}

struct TypedRouteEntry<Req, Resp> {
    handler: RouteHandler<Req, Resp>,
    codec: Arc<dyn MessageCodec<Req, Resp>>,
}

impl<Req, Resp> RouteEntry for TypedRouteEntry<Req, Resp>
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    fn build(&self, exec: &ExecutionContext) -> Arc<dyn StreamingService> {
        Arc::new(TypedRoute::new(
            self.handler.clone(),
            Arc::clone(&self.codec),
            exec.clone(),
        ))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// One registered route: descriptor, strategy override, adapter factory,
/// and the releasable resource handle.
pub struct RouteProvider {
    descriptor: RouteDescriptor,
    strategy: Option<ExecutionStrategy>,
    entry: Arc<dyn RouteEntry>,
    resource: Arc<dyn RouteResource>,
}

impl RouteProvider {
    pub(crate) fn new<Req, Resp>(
        path: String,
        kind: RouteKind,
        strategy: Option<ExecutionStrategy>,
        handler: RouteHandler<Req, Resp>,
        codec: Arc<dyn MessageCodec<Req, Resp>>,
        resource: Option<Arc<dyn RouteResource>>,
    ) -> Self
    where
        Req: Send + 'static,
        Resp: Send + 'static,
    {
        Self {
            descriptor: RouteDescriptor::new::<Req, Resp>(path, kind),
            strategy,
            entry: Arc::new(TypedRouteEntry { handler, codec }),
            resource: resource.unwrap_or_else(|| Arc::new(NoopResource)),
        }
    }

    pub fn descriptor(&self) -> &RouteDescriptor {
        &self.descriptor
    }

    pub fn strategy(&self) -> Option<ExecutionStrategy> {
        self.strategy
    }

    /// Typed view of the registered handler, checked against the route's
    /// descriptor. Returns `None` when the requested types do not match
    /// the registration.
    pub fn handler<Req: 'static, Resp: 'static>(&self) -> Option<&RouteHandler<Req, Resp>> {
        if !self.descriptor.matches::<Req, Resp>() {
            return None;
        }
        self.entry
            .as_any()
            .downcast_ref::<TypedRouteEntry<Req, Resp>>()
            .map(|entry| &entry.handler)
    }

    pub(crate) fn build_route(&self, exec: &ExecutionContext) -> Arc<dyn StreamingService> {
        self.entry.build(exec)
    }

    pub(crate) fn resource(&self) -> Arc<dyn RouteResource> {
        Arc::clone(&self.resource)
    }
}

impl fmt::Debug for RouteProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteProvider")
            .field("descriptor", &self.descriptor)
            .field("strategy", &self.strategy)
            .finish_non_exhaustive()
    }
}

/// Explicit ownership list of route resources; aggregate close fans out
/// to every entry and collects failures instead of short-circuiting.
pub(crate) struct CompositeResource {
    resources: Vec<(String, Arc<dyn RouteResource>)>,
}

impl CompositeResource {
    fn new(resources: Vec<(String, Arc<dyn RouteResource>)>) -> Self {
        Self { resources }
    }

    async fn close(&self, graceful: bool) -> Result<(), ShutdownError> {
        let closings = self.resources.iter().map(|(path, resource)| async move {
            let result = if graceful {
                resource.close_graceful().await
            } else {
                resource.close().await
            };
            (path, result)
        });

        let mut failures = Vec::new();
        for (path, result) in join_all(closings).await {
            if let Err(error) = result {
                warn!(path = %path, error = %error, "Route resource failed to close");
                failures.push(RouteCloseFailure {
                    path: path.clone(),
                    error,
                });
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(ShutdownError::new(failures))
        }
    }
}

/// Immutable route table assembled by draining a builder.
///
/// Lookups never mutate it; the owner must close it to release every
/// route resource.
pub struct RouteRegistry {
    routes: RouteMap,
    resources: CompositeResource,
}

impl RouteRegistry {
    pub(crate) fn new(routes: RouteMap) -> Self {
        let resources = CompositeResource::new(
            routes
                .iter()
                .map(|(path, provider)| (path.clone(), provider.resource()))
                .collect(),
        );
        info!(routes = routes.len(), "Assembled route registry");
        Self { routes, resources }
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn has_route(&self, path: &str) -> bool {
        self.routes.contains_key(path)
    }

    /// Direct provider lookup for introspection callers.
    ///
    /// Asking for an unregistered path is a programming error and is
    /// reported immediately, unlike the dispatch path's not-implemented
    /// branch.
    pub fn route_provider(&self, path: &str) -> Result<&RouteProvider, RouterError> {
        self.routes
            .get(path)
            .ok_or_else(|| RouterError::UnknownRoute(path.to_owned()))
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (&String, &RouteProvider)> {
        self.routes.iter()
    }

    /// Release every route resource immediately.
    pub async fn close(&self) -> Result<(), ShutdownError> {
        self.resources.close(false).await
    }

    /// Release every route resource after draining in-flight work.
    pub async fn close_graceful(&self) -> Result<(), ShutdownError> {
        self.resources.close(true).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::RouteContext;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tonic::Status;

    struct TextCodec;

    impl MessageCodec<String, String> for TextCodec {
        fn deserializer_for(
            &self,
            _encoding: &crate::codec::MessageEncoding,
        ) -> Arc<dyn crate::codec::MessageDeserializer<String>> {
            unimplemented!("not exercised")
        }

        fn serializer_for(
            &self,
            _ctx: &RouteContext,
        ) -> Arc<dyn crate::codec::MessageSerializer<String>> {
            unimplemented!("not exercised")
        }
    }

    fn provider() -> RouteProvider {
        let handler: RouteHandler<String, String> =
            RouteHandler::Blocking(Arc::new(|_ctx: RouteContext, req: String| {
                Ok::<_, Status>(req)
            }));
        RouteProvider::new(
            "/test.Svc/Method".to_owned(),
            RouteKind::Blocking,
            None,
            handler,
            Arc::new(TextCodec),
            None,
        )
    }

    #[test]
    fn typed_access_is_checked_against_descriptor() {
        let provider = provider();
        assert!(provider.handler::<String, String>().is_some());
        assert!(provider.handler::<String, u32>().is_none());
        assert!(provider.handler::<u32, String>().is_none());
    }

    struct CountingResource {
        closed: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl RouteResource for Arc<CountingResource> {
        async fn close(&self) -> Result<(), BoxError> {
            self.closed.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err("resource is wedged".into())
            } else {
                Ok(())
            }
        }
    }

    #[tokio::test]
    async fn composite_close_fans_out_and_collects_failures() {
        let good = Arc::new(CountingResource {
            closed: AtomicUsize::new(0),
            fail: false,
        });
        let bad = Arc::new(CountingResource {
            closed: AtomicUsize::new(0),
            fail: true,
        });
        let composite = CompositeResource::new(vec![
            ("/a".to_owned(), Arc::new(Arc::clone(&bad)) as Arc<dyn RouteResource>),
            ("/b".to_owned(), Arc::new(Arc::clone(&good)) as Arc<dyn RouteResource>),
        ]);

        let err = composite.close(true).await.unwrap_err();
        assert_eq!(err.failures().len(), 1);
        assert_eq!(err.failures()[0].path, "/a");

        // The failing sibling did not prevent the healthy one closing.
        assert_eq!(good.closed.load(Ordering::SeqCst), 1);
        assert_eq!(bad.closed.load(Ordering::SeqCst), 1);
    }
}
