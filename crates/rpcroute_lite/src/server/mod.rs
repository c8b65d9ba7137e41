mod builder;
mod convert;
mod handler;
mod provider;
mod router;
mod writer;

pub use builder::RouterBuilder;
pub use handler::{
    BlockingHandler, BlockingRequestStreamingHandler, BlockingRequests,
    BlockingResponseStreamingHandler, BlockingStreamingHandler, RequestStream,
    RequestStreamingHandler, ResponseStreamingHandler, RouteHandler, StreamingHandler,
    UnaryHandler,
};
pub use provider::{RouteDescriptor, RouteKind, RouteProvider, RouteRegistry, RouteResource};
pub use router::RpcRouter;
pub use writer::PayloadWriter;
