use std::sync::Arc;

use tracing::info;

use crate::codec::MessageCodec;
use crate::error::RouterError;
use crate::server::convert::{
    BlockingRequestStreamingAsBlockingStreaming, BlockingResponseStreamingAsBlockingStreaming,
    RequestStreamingAsStreaming, ResponseStreamingAsStreaming,
};
use crate::server::handler::{
    BlockingHandler, BlockingRequestStreamingHandler, BlockingResponseStreamingHandler,
    BlockingStreamingHandler, RequestStreamingHandler, ResponseStreamingHandler, RouteHandler,
    StreamingHandler, UnaryHandler,
};
use crate::server::provider::{RouteKind, RouteMap, RouteProvider, RouteRegistry, RouteResource};
use crate::strategy::ExecutionStrategy;

/// Accumulates route registrations across four per-shape buckets.
///
/// Builders are used single-threaded during the registration phase, then
/// drained into an immutable [`RouteRegistry`] for binding. Re-registering
/// a path in the same bucket overwrites the earlier route; registering it
/// under a different shape is rejected.
///
/// Independently built sub-routers compose through [`RouterBuilder::merge`]
/// without either party knowing how many siblings exist.
#[derive(Default)]
pub struct RouterBuilder {
    unary: RouteMap,
    streaming: RouteMap,
    blocking: RouteMap,
    blocking_streaming: RouteMap,
}

impl std::fmt::Debug for RouterBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouterBuilder")
            .field("unary", &self.unary.len())
            .field("streaming", &self.streaming.len())
            .field("blocking", &self.blocking.len())
            .field("blocking_streaming", &self.blocking_streaming.len())
            .finish()
    }
}

impl RouterBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an async single-value route.
    pub fn add_unary_route<Req, Resp>(
        &mut self,
        path: impl Into<String>,
        strategy: Option<ExecutionStrategy>,
        handler: impl UnaryHandler<Req, Resp>,
        codec: Arc<dyn MessageCodec<Req, Resp>>,
        resource: Option<Arc<dyn RouteResource>>,
    ) -> Result<&mut Self, RouterError>
    where
        Req: Send + 'static,
        Resp: Send + 'static,
    {
        self.insert(
            RouteKind::Unary,
            path.into(),
            strategy,
            RouteHandler::Unary(Arc::new(handler)),
            codec,
            resource,
        )
    }

    /// Register an async bidirectional streaming route.
    pub fn add_streaming_route<Req, Resp>(
        &mut self,
        path: impl Into<String>,
        strategy: Option<ExecutionStrategy>,
        handler: impl StreamingHandler<Req, Resp>,
        codec: Arc<dyn MessageCodec<Req, Resp>>,
        resource: Option<Arc<dyn RouteResource>>,
    ) -> Result<&mut Self, RouterError>
    where
        Req: Send + 'static,
        Resp: Send + 'static,
    {
        self.insert(
            RouteKind::Streaming,
            path.into(),
            strategy,
            RouteHandler::Streaming(Arc::new(handler)),
            codec,
            resource,
        )
    }

    /// Register a blocking single-value route.
    pub fn add_blocking_route<Req, Resp>(
        &mut self,
        path: impl Into<String>,
        strategy: Option<ExecutionStrategy>,
        handler: impl BlockingHandler<Req, Resp>,
        codec: Arc<dyn MessageCodec<Req, Resp>>,
        resource: Option<Arc<dyn RouteResource>>,
    ) -> Result<&mut Self, RouterError>
    where
        Req: Send + 'static,
        Resp: Send + 'static,
    {
        self.insert(
            RouteKind::Blocking,
            path.into(),
            strategy,
            RouteHandler::Blocking(Arc::new(handler)),
            codec,
            resource,
        )
    }

    /// Register a blocking bidirectional streaming route.
    pub fn add_blocking_streaming_route<Req, Resp>(
        &mut self,
        path: impl Into<String>,
        strategy: Option<ExecutionStrategy>,
        handler: impl BlockingStreamingHandler<Req, Resp>,
        codec: Arc<dyn MessageCodec<Req, Resp>>,
        resource: Option<Arc<dyn RouteResource>>,
    ) -> Result<&mut Self, RouterError>
    where
        Req: Send + 'static,
        Resp: Send + 'static,
    {
        self.insert(
            RouteKind::BlockingStreaming,
            path.into(),
            strategy,
            RouteHandler::BlockingStreaming(Arc::new(handler)),
            codec,
            resource,
        )
    }

    /// Register an async request-streaming route (many requests, one
    /// response). Stored in the streaming bucket behind a collapse
    /// adapter.
    pub fn add_request_streaming_route<Req, Resp>(
        &mut self,
        path: impl Into<String>,
        strategy: Option<ExecutionStrategy>,
        handler: impl RequestStreamingHandler<Req, Resp>,
        codec: Arc<dyn MessageCodec<Req, Resp>>,
        resource: Option<Arc<dyn RouteResource>>,
    ) -> Result<&mut Self, RouterError>
    where
        Req: Send + 'static,
        Resp: Send + 'static,
    {
        let wrapped = RequestStreamingAsStreaming(Arc::new(handler));
        self.insert(
            RouteKind::Streaming,
            path.into(),
            strategy,
            RouteHandler::Streaming(Arc::new(wrapped)),
            codec,
            resource,
        )
    }

    /// Register an async response-streaming route (one request, many
    /// responses).
    pub fn add_response_streaming_route<Req, Resp>(
        &mut self,
        path: impl Into<String>,
        strategy: Option<ExecutionStrategy>,
        handler: impl ResponseStreamingHandler<Req, Resp>,
        codec: Arc<dyn MessageCodec<Req, Resp>>,
        resource: Option<Arc<dyn RouteResource>>,
    ) -> Result<&mut Self, RouterError>
    where
        Req: Send + 'static,
        Resp: Send + 'static,
    {
        let wrapped = ResponseStreamingAsStreaming(Arc::new(handler));
        self.insert(
            RouteKind::Streaming,
            path.into(),
            strategy,
            RouteHandler::Streaming(Arc::new(wrapped)),
            codec,
            resource,
        )
    }

    /// Register a blocking request-streaming route.
    pub fn add_blocking_request_streaming_route<Req, Resp>(
        &mut self,
        path: impl Into<String>,
        strategy: Option<ExecutionStrategy>,
        handler: impl BlockingRequestStreamingHandler<Req, Resp>,
        codec: Arc<dyn MessageCodec<Req, Resp>>,
        resource: Option<Arc<dyn RouteResource>>,
    ) -> Result<&mut Self, RouterError>
    where
        Req: Send + 'static,
        Resp: Send + 'static,
    {
        let wrapped = BlockingRequestStreamingAsBlockingStreaming(Arc::new(handler));
        self.insert(
            RouteKind::BlockingStreaming,
            path.into(),
            strategy,
            RouteHandler::BlockingStreaming(Arc::new(wrapped)),
            codec,
            resource,
        )
    }

    /// Register a blocking response-streaming route.
    pub fn add_blocking_response_streaming_route<Req, Resp>(
        &mut self,
        path: impl Into<String>,
        strategy: Option<ExecutionStrategy>,
        handler: impl BlockingResponseStreamingHandler<Req, Resp>,
        codec: Arc<dyn MessageCodec<Req, Resp>>,
        resource: Option<Arc<dyn RouteResource>>,
    ) -> Result<&mut Self, RouterError>
    where
        Req: Send + 'static,
        Resp: Send + 'static,
    {
        let wrapped = BlockingResponseStreamingAsBlockingStreaming(Arc::new(handler));
        self.insert(
            RouteKind::BlockingStreaming,
            path.into(),
            strategy,
            RouteHandler::BlockingStreaming(Arc::new(wrapped)),
            codec,
            resource,
        )
    }

    /// Union several independently built routers into one.
    ///
    /// Later builders win per bucket on path collision; a collision
    /// across different shapes is rejected like at registration time.
    pub fn merge(builders: impl IntoIterator<Item = RouterBuilder>) -> Result<RouterBuilder, RouterError> {
        let mut merged = RouterBuilder::default();
        for builder in builders {
            let RouterBuilder {
                unary,
                streaming,
                blocking,
                blocking_streaming,
            } = builder;
            merged.absorb(RouteKind::Unary, unary)?;
            merged.absorb(RouteKind::Streaming, streaming)?;
            merged.absorb(RouteKind::Blocking, blocking)?;
            merged.absorb(RouteKind::BlockingStreaming, blocking_streaming)?;
        }
        Ok(merged)
    }

    /// Drain every bucket into an immutable registry, leaving this
    /// builder empty. Ownership of the route resources transfers to the
    /// registry, which must be closed by its owner.
    pub fn drain(&mut self) -> RouteRegistry {
        let mut all = RouteMap::default();
        all.extend(self.unary.drain());
        all.extend(self.streaming.drain());
        all.extend(self.blocking.drain());
        all.extend(self.blocking_streaming.drain());
        RouteRegistry::new(all)
    }

    fn insert<Req, Resp>(
        &mut self,
        kind: RouteKind,
        path: String,
        strategy: Option<ExecutionStrategy>,
        handler: RouteHandler<Req, Resp>,
        codec: Arc<dyn MessageCodec<Req, Resp>>,
        resource: Option<Arc<dyn RouteResource>>,
    ) -> Result<&mut Self, RouterError>
    where
        Req: Send + 'static,
        Resp: Send + 'static,
    {
        self.reject_cross_shape(&path, kind)?;
        let provider = RouteProvider::new(path.clone(), kind, strategy, handler, codec, resource);
        info!(path = %path, kind = %kind, "Registered route handler");
        self.bucket_mut(kind).insert(path, provider);
        Ok(self)
    }

    fn absorb(&mut self, kind: RouteKind, bucket: RouteMap) -> Result<(), RouterError> {
        for (path, provider) in bucket {
            self.reject_cross_shape(&path, kind)?;
            self.bucket_mut(kind).insert(path, provider);
        }
        Ok(())
    }

    fn bucket_mut(&mut self, kind: RouteKind) -> &mut RouteMap {
        match kind {
            RouteKind::Unary => &mut self.unary,
            RouteKind::Streaming => &mut self.streaming,
            RouteKind::Blocking => &mut self.blocking,
            RouteKind::BlockingStreaming => &mut self.blocking_streaming,
        }
    }

    fn reject_cross_shape(&self, path: &str, kind: RouteKind) -> Result<(), RouterError> {
        let buckets = [
            (RouteKind::Unary, &self.unary),
            (RouteKind::Streaming, &self.streaming),
            (RouteKind::Blocking, &self.blocking),
            (RouteKind::BlockingStreaming, &self.blocking_streaming),
        ];
        for (other, bucket) in buckets {
            if other != kind && bucket.contains_key(path) {
                return Err(RouterError::DuplicateRoute {
                    path: path.to_owned(),
                    kind: other,
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{MessageDeserializer, MessageEncoding, MessageSerializer};
    use crate::context::RouteContext;
    use tonic::Status;

    struct TextCodec;

    impl MessageCodec<String, String> for TextCodec {
        fn deserializer_for(
            &self,
            _encoding: &MessageEncoding,
        ) -> Arc<dyn MessageDeserializer<String>> {
            unimplemented!("not exercised")
        }

        fn serializer_for(&self, _ctx: &RouteContext) -> Arc<dyn MessageSerializer<String>> {
            unimplemented!("not exercised")
        }
    }

    fn codec() -> Arc<dyn MessageCodec<String, String>> {
        Arc::new(TextCodec)
    }

    fn echo_blocking(ctx: RouteContext, req: String) -> Result<String, Status> {
        let _ = ctx;
        Ok(req)
    }

    #[test]
    fn same_bucket_overwrites() {
        let mut builder = RouterBuilder::new();
        builder
            .add_blocking_route("/s/m", None, echo_blocking, codec(), None)
            .unwrap();
        builder
            .add_blocking_route("/s/m", None, echo_blocking, codec(), None)
            .unwrap();
        assert_eq!(builder.drain().len(), 1);
    }

    #[test]
    fn cross_shape_duplicate_is_rejected() {
        let mut builder = RouterBuilder::new();
        builder
            .add_blocking_route("/s/m", None, echo_blocking, codec(), None)
            .unwrap();
        let err = builder
            .add_unary_route(
                "/s/m",
                None,
                |_ctx: RouteContext, req: String| async move { Ok::<_, Status>(req) },
                codec(),
                None,
            )
            .unwrap_err();
        assert!(matches!(err, RouterError::DuplicateRoute { kind: RouteKind::Blocking, .. }));
    }

    #[test]
    fn merge_disjoint_sums_sizes() {
        let mut first = RouterBuilder::new();
        first
            .add_blocking_route("/a/one", None, echo_blocking, codec(), None)
            .unwrap();
        let mut second = RouterBuilder::new();
        second
            .add_blocking_route("/b/two", None, echo_blocking, codec(), None)
            .unwrap();

        let mut merged = RouterBuilder::merge([first, second]).unwrap();
        assert_eq!(merged.drain().len(), 2);
    }

    #[test]
    fn merge_overlap_takes_the_later_builder() {
        let mut first = RouterBuilder::new();
        first
            .add_blocking_route(
                "/s/m",
                Some(ExecutionStrategy::Offload),
                echo_blocking,
                codec(),
                None,
            )
            .unwrap();
        let mut second = RouterBuilder::new();
        second
            .add_blocking_route(
                "/s/m",
                Some(ExecutionStrategy::NoOffload),
                echo_blocking,
                codec(),
                None,
            )
            .unwrap();

        let mut merged = RouterBuilder::merge([first, second]).unwrap();
        let registry = merged.drain();
        assert_eq!(registry.len(), 1);
        let provider = registry.route_provider("/s/m").unwrap();
        assert_eq!(provider.strategy(), Some(ExecutionStrategy::NoOffload));
    }

    #[test]
    fn merge_cross_shape_collision_is_rejected() {
        let mut first = RouterBuilder::new();
        first
            .add_blocking_route("/s/m", None, echo_blocking, codec(), None)
            .unwrap();
        let mut second = RouterBuilder::new();
        second
            .add_unary_route(
                "/s/m",
                None,
                |_ctx: RouteContext, req: String| async move { Ok::<_, Status>(req) },
                codec(),
                None,
            )
            .unwrap();

        let err = RouterBuilder::merge([first, second]).unwrap_err();
        assert!(matches!(err, RouterError::DuplicateRoute { .. }));
    }

    #[test]
    fn drain_clears_the_builder() {
        let mut builder = RouterBuilder::new();
        builder
            .add_blocking_route("/s/m", None, echo_blocking, codec(), None)
            .unwrap();
        assert_eq!(builder.drain().len(), 1);
        assert!(builder.drain().is_empty());
    }

    #[test]
    fn derived_shapes_land_in_streaming_buckets() {
        let mut builder = RouterBuilder::new();
        builder
            .add_request_streaming_route(
                "/s/collect",
                None,
                |_ctx: RouteContext, mut requests: crate::server::RequestStream<String>| async move {
                    use futures::StreamExt;
                    let mut joined = String::new();
                    while let Some(item) = requests.next().await {
                        joined.push_str(&item?);
                    }
                    Ok::<_, Status>(joined)
                },
                codec(),
                None,
            )
            .unwrap();
        let registry = builder.drain();
        let provider = registry.route_provider("/s/collect").unwrap();
        assert_eq!(provider.descriptor().kind(), RouteKind::Streaming);
    }
}
