use std::future::Future;
use std::sync::Arc;

use async_stream::stream;
use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use futures::{FutureExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tonic::Status;

use crate::codec::{MessageCodec, MessageDeserializer};
use crate::context::{ExecutionContext, RouteContext};
use crate::reply;
use crate::server::provider::RouteKind;
use crate::server::writer::PayloadWriter;
use crate::transport::{StreamingService, WireRequest, WireResponse};

/// Decoded inbound request stream handed to async streaming handlers.
///
/// An `Err` item carries a transport or decode failure and terminates
/// the stream.
pub struct RequestStream<Req> {
    inner: BoxStream<'static, Result<Req, Status>>,
}

impl<Req> RequestStream<Req> {
    pub(crate) fn decode(
        body: BoxStream<'static, Result<bytes::Bytes, Status>>,
        deserializer: Arc<dyn MessageDeserializer<Req>>,
    ) -> Self
    where
        Req: Send + 'static,
    {
        let inner = body
            .map(move |item| item.and_then(|frame| deserializer.deserialize(frame)))
            .boxed();
        Self { inner }
    }

    pub(crate) fn from_stream(inner: BoxStream<'static, Result<Req, Status>>) -> Self {
        Self { inner }
    }

    pub(crate) fn once(request: Req) -> Self
    where
        Req: Send + 'static,
    {
        Self {
            inner: futures::stream::iter(vec![Ok(request)]).boxed(),
        }
    }

    /// Await the single message of a unary-style call.
    pub async fn into_message(mut self) -> Result<Req, Status> {
        match self.inner.next().await {
            Some(Ok(request)) => Ok(request),
            Some(Err(status)) => Err(status),
            None => Err(Status::invalid_argument("missing request message")),
        }
    }
}

impl<Req> Stream for RequestStream<Req> {
    type Item = Result<Req, Status>;

    fn poll_next(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

enum BlockingInner<Req> {
    Channel(mpsc::Receiver<Result<Req, Status>>),
    Stream(BoxStream<'static, Result<Req, Status>>),
}

/// Blocking view of the request stream for blocking handlers.
///
/// Iteration parks the calling thread until the next message arrives;
/// only valid on an offloaded thread, which the owning adapter
/// guarantees.
pub struct BlockingRequests<Req> {
    inner: BlockingInner<Req>,
}

impl<Req> BlockingRequests<Req> {
    pub(crate) fn from_channel(rx: mpsc::Receiver<Result<Req, Status>>) -> Self {
        Self {
            inner: BlockingInner::Channel(rx),
        }
    }

    pub(crate) fn from_stream(requests: RequestStream<Req>) -> Self {
        Self {
            inner: BlockingInner::Stream(requests.inner),
        }
    }
}

impl<Req> Iterator for BlockingRequests<Req> {
    type Item = Result<Req, Status>;

    fn next(&mut self) -> Option<Self::Item> {
        match &mut self.inner {
            BlockingInner::Channel(rx) => rx.blocking_recv(),
            BlockingInner::Stream(stream) => futures::executor::block_on(stream.next()),
        }
    }
}

/// Async single-value handler.
pub trait UnaryHandler<Req, Resp>: Send + Sync + 'static {
    fn handle(&self, ctx: RouteContext, request: Req) -> BoxFuture<'static, Result<Resp, Status>>;
}

impl<F, Fut, Req, Resp> UnaryHandler<Req, Resp> for F
where
    F: Fn(RouteContext, Req) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Resp, Status>> + Send + 'static,
{
    fn handle(&self, ctx: RouteContext, request: Req) -> BoxFuture<'static, Result<Resp, Status>> {
        self(ctx, request).boxed()
    }
}

/// Async bidirectional streaming handler, the canonical shape.
pub trait StreamingHandler<Req, Resp>: Send + Sync + 'static {
    fn handle(
        &self,
        ctx: RouteContext,
        requests: RequestStream<Req>,
    ) -> BoxStream<'static, Result<Resp, Status>>;
}

impl<F, S, Req, Resp> StreamingHandler<Req, Resp> for F
where
    F: Fn(RouteContext, RequestStream<Req>) -> S + Send + Sync + 'static,
    S: Stream<Item = Result<Resp, Status>> + Send + 'static,
{
    fn handle(
        &self,
        ctx: RouteContext,
        requests: RequestStream<Req>,
    ) -> BoxStream<'static, Result<Resp, Status>> {
        self(ctx, requests).boxed()
    }
}

/// Blocking single-value handler. Runs on the executor's blocking pool,
/// never on the transport thread.
pub trait BlockingHandler<Req, Resp>: Send + Sync + 'static {
    fn handle(&self, ctx: RouteContext, request: Req) -> Result<Resp, Status>;
}

impl<F, Req, Resp> BlockingHandler<Req, Resp> for F
where
    F: Fn(RouteContext, Req) -> Result<Resp, Status> + Send + Sync + 'static,
{
    fn handle(&self, ctx: RouteContext, request: Req) -> Result<Resp, Status> {
        self(ctx, request)
    }
}

/// Blocking bidirectional streaming handler.
///
/// Reads requests from the blocking iterator and writes responses
/// through the scoped [`PayloadWriter`]; the adapter owns the writer's
/// close.
pub trait BlockingStreamingHandler<Req, Resp>: Send + Sync + 'static {
    fn handle(
        &self,
        ctx: RouteContext,
        requests: BlockingRequests<Req>,
        writer: &mut PayloadWriter<Resp>,
    ) -> Result<(), Status>;
}

impl<F, Req, Resp> BlockingStreamingHandler<Req, Resp> for F
where
    F: Fn(RouteContext, BlockingRequests<Req>, &mut PayloadWriter<Resp>) -> Result<(), Status>
        + Send
        + Sync
        + 'static,
{
    fn handle(
        &self,
        ctx: RouteContext,
        requests: BlockingRequests<Req>,
        writer: &mut PayloadWriter<Resp>,
    ) -> Result<(), Status> {
        self(ctx, requests, writer)
    }
}

/// Async request-streaming handler: many requests, one response.
pub trait RequestStreamingHandler<Req, Resp>: Send + Sync + 'static {
    fn handle(
        &self,
        ctx: RouteContext,
        requests: RequestStream<Req>,
    ) -> BoxFuture<'static, Result<Resp, Status>>;
}

impl<F, Fut, Req, Resp> RequestStreamingHandler<Req, Resp> for F
where
    F: Fn(RouteContext, RequestStream<Req>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Resp, Status>> + Send + 'static,
{
    fn handle(
        &self,
        ctx: RouteContext,
        requests: RequestStream<Req>,
    ) -> BoxFuture<'static, Result<Resp, Status>> {
        self(ctx, requests).boxed()
    }
}

/// Async response-streaming handler: one request, many responses.
pub trait ResponseStreamingHandler<Req, Resp>: Send + Sync + 'static {
    fn handle(&self, ctx: RouteContext, request: Req) -> BoxStream<'static, Result<Resp, Status>>;
}

impl<F, S, Req, Resp> ResponseStreamingHandler<Req, Resp> for F
where
    F: Fn(RouteContext, Req) -> S + Send + Sync + 'static,
    S: Stream<Item = Result<Resp, Status>> + Send + 'static,
{
    fn handle(&self, ctx: RouteContext, request: Req) -> BoxStream<'static, Result<Resp, Status>> {
        self(ctx, request).boxed()
    }
}

/// Blocking request-streaming handler.
pub trait BlockingRequestStreamingHandler<Req, Resp>: Send + Sync + 'static {
    fn handle(&self, ctx: RouteContext, requests: BlockingRequests<Req>) -> Result<Resp, Status>;
}

impl<F, Req, Resp> BlockingRequestStreamingHandler<Req, Resp> for F
where
    F: Fn(RouteContext, BlockingRequests<Req>) -> Result<Resp, Status> + Send + Sync + 'static,
{
    fn handle(&self, ctx: RouteContext, requests: BlockingRequests<Req>) -> Result<Resp, Status> {
        self(ctx, requests)
    }
}

/// Blocking response-streaming handler.
pub trait BlockingResponseStreamingHandler<Req, Resp>: Send + Sync + 'static {
    fn handle(
        &self,
        ctx: RouteContext,
        request: Req,
        writer: &mut PayloadWriter<Resp>,
    ) -> Result<(), Status>;
}

impl<F, Req, Resp> BlockingResponseStreamingHandler<Req, Resp> for F
where
    F: Fn(RouteContext, Req, &mut PayloadWriter<Resp>) -> Result<(), Status>
        + Send
        + Sync
        + 'static,
{
    fn handle(
        &self,
        ctx: RouteContext,
        request: Req,
        writer: &mut PayloadWriter<Resp>,
    ) -> Result<(), Status> {
        self(ctx, request, writer)
    }
}

/// The four registered handler shapes.
///
/// Shape conversion and canonical adapter construction are match arms
/// over this enum; the variant fixes the route's [`RouteKind`].
pub enum RouteHandler<Req, Resp> {
    Unary(Arc<dyn UnaryHandler<Req, Resp>>),
    Streaming(Arc<dyn StreamingHandler<Req, Resp>>),
    Blocking(Arc<dyn BlockingHandler<Req, Resp>>),
    BlockingStreaming(Arc<dyn BlockingStreamingHandler<Req, Resp>>),
}

impl<Req, Resp> Clone for RouteHandler<Req, Resp> {
    fn clone(&self) -> Self {
        match self {
            RouteHandler::Unary(h) => RouteHandler::Unary(Arc::clone(h)),
            RouteHandler::Streaming(h) => RouteHandler::Streaming(Arc::clone(h)),
            RouteHandler::Blocking(h) => RouteHandler::Blocking(Arc::clone(h)),
            RouteHandler::BlockingStreaming(h) => RouteHandler::BlockingStreaming(Arc::clone(h)),
        }
    }
}

impl<Req, Resp> RouteHandler<Req, Resp> {
    pub fn kind(&self) -> RouteKind {
        match self {
            RouteHandler::Unary(_) => RouteKind::Unary,
            RouteHandler::Streaming(_) => RouteKind::Streaming,
            RouteHandler::Blocking(_) => RouteKind::Blocking,
            RouteHandler::BlockingStreaming(_) => RouteKind::BlockingStreaming,
        }
    }
}

/// Canonical adapter for one route: decodes the wire request, drives the
/// registered handler in its native shape, and maps the outcome back to
/// a wire response.
pub(crate) struct TypedRoute<Req, Resp> {
    handler: RouteHandler<Req, Resp>,
    codec: Arc<dyn MessageCodec<Req, Resp>>,
    exec: ExecutionContext,
}

impl<Req, Resp> TypedRoute<Req, Resp> {
    pub(crate) fn new(
        handler: RouteHandler<Req, Resp>,
        codec: Arc<dyn MessageCodec<Req, Resp>>,
        exec: ExecutionContext,
    ) -> Self {
        Self {
            handler,
            codec,
            exec,
        }
    }
}

#[async_trait]
impl<Req, Resp> StreamingService for TypedRoute<Req, Resp>
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    async fn handle(&self, request: WireRequest) -> WireResponse {
        let route_ctx = RouteContext::new(request.path(), request.encoding().clone());
        let encoding = request.encoding().clone();
        let deserializer = self.codec.deserializer_for(&encoding);
        let serializer = self.codec.serializer_for(&route_ctx);
        let allocator = self.exec.allocator().clone();
        let requests = RequestStream::decode(request.into_body(), deserializer);

        match &self.handler {
            RouteHandler::Unary(handler) => {
                let message = match requests.into_message().await {
                    Ok(message) => message,
                    Err(status) => return reply::new_error_response(encoding, status),
                };
                match handler.handle(route_ctx, message).await {
                    Ok(response) => reply::new_response(
                        encoding,
                        serializer,
                        allocator,
                        futures::stream::iter(vec![Ok(response)]).boxed(),
                    ),
                    Err(status) => reply::new_error_response(encoding, status),
                }
            }

            RouteHandler::Streaming(handler) => {
                let responses = handler.handle(route_ctx, requests);
                reply::new_response(encoding, serializer, allocator, responses)
            }

            RouteHandler::Blocking(handler) => {
                let message = match requests.into_message().await {
                    Ok(message) => message,
                    Err(status) => return reply::new_error_response(encoding, status),
                };
                let handler = Arc::clone(handler);
                let join = self
                    .exec
                    .executor()
                    .spawn_blocking(move || handler.handle(route_ctx, message));
                match join.await {
                    Ok(Ok(response)) => reply::new_response(
                        encoding,
                        serializer,
                        allocator,
                        futures::stream::iter(vec![Ok(response)]).boxed(),
                    ),
                    Ok(Err(status)) => reply::new_error_response(encoding, status),
                    Err(join_err) => {
                        reply::new_error_response(encoding, reply::join_error_status(join_err))
                    }
                }
            }

            RouteHandler::BlockingStreaming(handler) => {
                let capacity = self.exec.channel_capacity();
                let (req_tx, req_rx) = mpsc::channel(capacity);
                let (resp_tx, resp_rx) = mpsc::channel(capacity);

                // Feed decoded requests to the blocking side until either
                // end goes away.
                let mut requests = requests;
                self.exec.executor().spawn(async move {
                    while let Some(item) = requests.next().await {
                        if req_tx.send(item).await.is_err() {
                            break;
                        }
                    }
                });

                let mut writer = PayloadWriter::wire(resp_tx.clone(), serializer, allocator);
                let handler = Arc::clone(handler);
                let join = self.exec.executor().spawn_blocking(move || {
                    let requests = BlockingRequests::from_channel(req_rx);
                    match handler.handle(route_ctx, requests, &mut writer) {
                        Ok(()) => writer.close(),
                        Err(status) => writer.abort(status),
                    }
                });

                // A panic surfaces as the trailing status; the channel
                // stays open until the handler has settled either way.
                self.exec.executor().spawn(async move {
                    if let Err(join_err) = join.await {
                        let _ = resp_tx.send(Err(reply::join_error_status(join_err))).await;
                    }
                });

                let body = stream! {
                    let mut rx = resp_rx;
                    while let Some(item) = rx.recv().await {
                        let done = item.is_err();
                        yield item;
                        if done {
                            break;
                        }
                    }
                };
                WireResponse::new(encoding, body)
            }
        }
    }
}
