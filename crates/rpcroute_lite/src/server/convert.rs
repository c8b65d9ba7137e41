//! Shape conversions between the four handler paradigms.
//!
//! The registered variant stays the source of truth; these adapters give
//! introspection and interop callers a view of the route in another
//! shape. Dispatch never goes through them. Converted blocking handlers
//! run on the thread that polls the returned stream or future; the
//! route's offload strategy still applies when such a view is invoked
//! through the dispatcher.

use std::sync::Arc;
use std::sync::mpsc as std_mpsc;

use async_stream::stream;
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use futures::StreamExt;
use tonic::Status;

use crate::context::RouteContext;
use crate::server::handler::{
    BlockingHandler, BlockingRequestStreamingHandler, BlockingRequests,
    BlockingResponseStreamingHandler, BlockingStreamingHandler, RequestStream,
    RequestStreamingHandler, ResponseStreamingHandler, RouteHandler, StreamingHandler,
    UnaryHandler,
};
use crate::server::writer::PayloadWriter;

impl<Req, Resp> RouteHandler<Req, Resp>
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    /// View this route as an async streaming handler.
    pub fn as_streaming(&self) -> Arc<dyn StreamingHandler<Req, Resp>> {
        match self {
            RouteHandler::Streaming(h) => Arc::clone(h),
            RouteHandler::Unary(h) => Arc::new(UnaryAsStreaming(Arc::clone(h))),
            RouteHandler::Blocking(h) => Arc::new(BlockingAsStreaming(Arc::clone(h))),
            RouteHandler::BlockingStreaming(h) => {
                Arc::new(BlockingStreamingAsStreaming(Arc::clone(h)))
            }
        }
    }

    /// View this route as an async single-value handler.
    ///
    /// Streaming shapes collapse to their first response element.
    pub fn as_unary(&self) -> Arc<dyn UnaryHandler<Req, Resp>> {
        match self {
            RouteHandler::Unary(h) => Arc::clone(h),
            other => Arc::new(StreamingAsUnary(other.as_streaming())),
        }
    }

    /// View this route as an async request-streaming handler.
    pub fn as_request_streaming(&self) -> Arc<dyn RequestStreamingHandler<Req, Resp>> {
        Arc::new(StreamingAsRequestStreaming(self.as_streaming()))
    }

    /// View this route as an async response-streaming handler.
    pub fn as_response_streaming(&self) -> Arc<dyn ResponseStreamingHandler<Req, Resp>> {
        Arc::new(StreamingAsResponseStreaming(self.as_streaming()))
    }
}

struct UnaryAsStreaming<Req, Resp>(Arc<dyn UnaryHandler<Req, Resp>>);

impl<Req, Resp> StreamingHandler<Req, Resp> for UnaryAsStreaming<Req, Resp>
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    fn handle(
        &self,
        ctx: RouteContext,
        requests: RequestStream<Req>,
    ) -> BoxStream<'static, Result<Resp, Status>> {
        let handler = Arc::clone(&self.0);
        Box::pin(stream! {
            match requests.into_message().await {
                Ok(request) => yield handler.handle(ctx, request).await,
                Err(status) => yield Err(status),
            }
        })
    }
}

struct BlockingAsStreaming<Req, Resp>(Arc<dyn BlockingHandler<Req, Resp>>);

impl<Req, Resp> StreamingHandler<Req, Resp> for BlockingAsStreaming<Req, Resp>
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    fn handle(
        &self,
        ctx: RouteContext,
        requests: RequestStream<Req>,
    ) -> BoxStream<'static, Result<Resp, Status>> {
        let handler = Arc::clone(&self.0);
        Box::pin(stream! {
            match requests.into_message().await {
                Ok(request) => yield handler.handle(ctx, request),
                Err(status) => yield Err(status),
            }
        })
    }
}

struct BlockingStreamingAsStreaming<Req, Resp>(Arc<dyn BlockingStreamingHandler<Req, Resp>>);

impl<Req, Resp> StreamingHandler<Req, Resp> for BlockingStreamingAsStreaming<Req, Resp>
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    fn handle(
        &self,
        ctx: RouteContext,
        requests: RequestStream<Req>,
    ) -> BoxStream<'static, Result<Resp, Status>> {
        let handler = Arc::clone(&self.0);
        Box::pin(stream! {
            let (tx, rx) = std_mpsc::channel();
            let mut writer = PayloadWriter::typed(tx);
            let blocking = BlockingRequests::from_stream(requests);
            match handler.handle(ctx, blocking, &mut writer) {
                Ok(()) => writer.close(),
                Err(status) => writer.abort(status),
            }
            while let Ok(item) = rx.recv() {
                let done = item.is_err();
                yield item;
                if done {
                    break;
                }
            }
        })
    }
}

struct StreamingAsUnary<Req, Resp>(Arc<dyn StreamingHandler<Req, Resp>>);

impl<Req, Resp> UnaryHandler<Req, Resp> for StreamingAsUnary<Req, Resp>
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    fn handle(&self, ctx: RouteContext, request: Req) -> BoxFuture<'static, Result<Resp, Status>> {
        let handler = Arc::clone(&self.0);
        Box::pin(async move {
            let mut responses = handler.handle(ctx, RequestStream::once(request));
            match responses.next().await {
                Some(first) => first,
                None => Err(Status::internal("streaming route produced no response")),
            }
        })
    }
}

struct StreamingAsRequestStreaming<Req, Resp>(Arc<dyn StreamingHandler<Req, Resp>>);

impl<Req, Resp> RequestStreamingHandler<Req, Resp> for StreamingAsRequestStreaming<Req, Resp>
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    fn handle(
        &self,
        ctx: RouteContext,
        requests: RequestStream<Req>,
    ) -> BoxFuture<'static, Result<Resp, Status>> {
        let handler = Arc::clone(&self.0);
        Box::pin(async move {
            let mut responses = handler.handle(ctx, requests);
            match responses.next().await {
                Some(first) => first,
                None => Err(Status::internal("streaming route produced no response")),
            }
        })
    }
}

struct StreamingAsResponseStreaming<Req, Resp>(Arc<dyn StreamingHandler<Req, Resp>>);

impl<Req, Resp> ResponseStreamingHandler<Req, Resp> for StreamingAsResponseStreaming<Req, Resp>
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    fn handle(&self, ctx: RouteContext, request: Req) -> BoxStream<'static, Result<Resp, Status>> {
        self.0.handle(ctx, RequestStream::once(request))
    }
}

/// Wraps a request-streaming handler for registration in the streaming
/// bucket: the single response becomes a one-element stream.
pub(crate) struct RequestStreamingAsStreaming<Req, Resp>(
    pub(crate) Arc<dyn RequestStreamingHandler<Req, Resp>>,
);

impl<Req, Resp> StreamingHandler<Req, Resp> for RequestStreamingAsStreaming<Req, Resp>
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    fn handle(
        &self,
        ctx: RouteContext,
        requests: RequestStream<Req>,
    ) -> BoxStream<'static, Result<Resp, Status>> {
        futures::stream::once(self.0.handle(ctx, requests)).boxed()
    }
}

/// Wraps a response-streaming handler for registration in the streaming
/// bucket: the request stream collapses to its first element.
pub(crate) struct ResponseStreamingAsStreaming<Req, Resp>(
    pub(crate) Arc<dyn ResponseStreamingHandler<Req, Resp>>,
);

impl<Req, Resp> StreamingHandler<Req, Resp> for ResponseStreamingAsStreaming<Req, Resp>
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    fn handle(
        &self,
        ctx: RouteContext,
        requests: RequestStream<Req>,
    ) -> BoxStream<'static, Result<Resp, Status>> {
        let handler = Arc::clone(&self.0);
        Box::pin(stream! {
            match requests.into_message().await {
                Ok(request) => {
                    let mut responses = handler.handle(ctx, request);
                    while let Some(item) = responses.next().await {
                        yield item;
                    }
                }
                Err(status) => yield Err(status),
            }
        })
    }
}

/// Wraps a blocking request-streaming handler for the blocking streaming
/// bucket: the handler's single return value is written once.
pub(crate) struct BlockingRequestStreamingAsBlockingStreaming<Req, Resp>(
    pub(crate) Arc<dyn BlockingRequestStreamingHandler<Req, Resp>>,
);

impl<Req, Resp> BlockingStreamingHandler<Req, Resp>
    for BlockingRequestStreamingAsBlockingStreaming<Req, Resp>
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    fn handle(
        &self,
        ctx: RouteContext,
        requests: BlockingRequests<Req>,
        writer: &mut PayloadWriter<Resp>,
    ) -> Result<(), Status> {
        let response = self.0.handle(ctx, requests)?;
        writer.write(response)
    }
}

/// Wraps a blocking response-streaming handler for the blocking
/// streaming bucket: the request iterator collapses to its first
/// element.
pub(crate) struct BlockingResponseStreamingAsBlockingStreaming<Req, Resp>(
    pub(crate) Arc<dyn BlockingResponseStreamingHandler<Req, Resp>>,
);

impl<Req, Resp> BlockingStreamingHandler<Req, Resp>
    for BlockingResponseStreamingAsBlockingStreaming<Req, Resp>
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    fn handle(
        &self,
        ctx: RouteContext,
        mut requests: BlockingRequests<Req>,
        writer: &mut PayloadWriter<Resp>,
    ) -> Result<(), Status> {
        let request = match requests.next() {
            Some(Ok(request)) => request,
            Some(Err(status)) => return Err(status),
            None => return Err(Status::invalid_argument("missing request message")),
        };
        self.0.handle(ctx, request, writer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unary_route() -> RouteHandler<String, String> {
        RouteHandler::Unary(Arc::new(|_ctx: RouteContext, req: String| async move {
            Ok::<_, Status>(format!("unary:{req}"))
        }))
    }

    #[tokio::test]
    async fn unary_viewed_as_streaming_yields_one_element() {
        let handler = unary_route().as_streaming();
        let ctx = RouteContext::new("/t/u", Default::default());
        let items: Vec<_> = handler
            .handle(ctx, RequestStream::once("x".to_owned()))
            .collect()
            .await;
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].as_ref().unwrap(), "unary:x");
    }

    #[tokio::test]
    async fn streaming_viewed_as_unary_takes_first() {
        let handler: RouteHandler<String, String> =
            RouteHandler::Streaming(Arc::new(|_ctx: RouteContext, requests: RequestStream<String>| {
                requests.map(|item| item.map(|req| format!("s:{req}")))
            }));
        let unary = handler.as_unary();
        let ctx = RouteContext::new("/t/s", Default::default());
        let out = unary.handle(ctx, "x".to_owned()).await.unwrap();
        assert_eq!(out, "s:x");
    }

    #[tokio::test]
    async fn unary_viewed_as_request_streaming_takes_first_request() {
        let handler = unary_route().as_request_streaming();
        let ctx = RouteContext::new("/t/u", Default::default());
        let requests = RequestStream::from_stream(
            futures::stream::iter(vec![Ok("x".to_owned()), Ok("ignored".to_owned())]).boxed(),
        );
        let out = handler.handle(ctx, requests).await.unwrap();
        assert_eq!(out, "unary:x");
    }

    #[tokio::test]
    async fn streaming_viewed_as_response_streaming_keeps_all_elements() {
        let handler: RouteHandler<String, String> =
            RouteHandler::Streaming(Arc::new(|_ctx: RouteContext, requests: RequestStream<String>| {
                requests.flat_map(|item| {
                    futures::stream::iter(match item {
                        Ok(req) => vec![Ok(format!("{req}-0")), Ok(format!("{req}-1"))],
                        Err(status) => vec![Err(status)],
                    })
                })
            }));
        let fan_out = handler.as_response_streaming();
        let ctx = RouteContext::new("/t/rs", Default::default());
        let items: Vec<_> = fan_out.handle(ctx, "x".to_owned()).collect().await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_ref().unwrap(), "x-0");
        assert_eq!(items[1].as_ref().unwrap(), "x-1");
    }

    #[tokio::test]
    async fn blocking_streaming_viewed_as_streaming_buffers_writes() {
        let handler: RouteHandler<String, String> = RouteHandler::BlockingStreaming(Arc::new(
            |_ctx: RouteContext,
             requests: BlockingRequests<String>,
             writer: &mut PayloadWriter<String>| {
                for item in requests {
                    writer.write(format!("b:{}", item?))?;
                }
                Ok(())
            },
        ));
        let streaming = handler.as_streaming();
        let ctx = RouteContext::new("/t/bs", Default::default());
        let requests = RequestStream::from_stream(
            futures::stream::iter(vec![Ok("1".to_owned()), Ok("2".to_owned())]).boxed(),
        );
        let items: Vec<_> = streaming.handle(ctx, requests).collect().await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[1].as_ref().unwrap(), "b:2");
    }
}
