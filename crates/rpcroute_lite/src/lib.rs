//! Path-keyed RPC request routing over a generic bidirectional-streaming
//! transport.
//!
//! Service authors register handlers in any of four programming-model
//! shapes (blocking single-value, blocking streaming, async
//! single-value, async streaming) and the router normalizes every shape
//! into one canonical async-streaming adapter at bind time. Inbound
//! calls are matched on verb and path; handler failures and unregistered
//! paths become protocol status responses, never transport errors. The
//! drained registry owns the shutdown lifecycle of every route as one
//! unit.
//!
//! The transport itself is a collaborator: anything that can accept a
//! service function through [`transport::ServerBinder`] can host a bound
//! router. Serialization goes through [`codec::MessageCodec`]; a
//! protobuf implementation over `prost` is included.
//!
//! # Example
//!
//! ```ignore
//! let mut builder = RouterBuilder::new();
//! builder.add_blocking_route(
//!     "/calc.Calculator/Square",
//!     None,
//!     |_ctx, n: SquareRequest| Ok(SquareReply { value: n.value * n.value }),
//!     Arc::new(ProstCodec::new()),
//!     None,
//! )?;
//!
//! let router = RpcRouter::new(builder.drain());
//! let server = router.bind(&binder, &ExecutionContext::current()).await?;
//! // ... serve ...
//! router.close_graceful().await?;
//! ```

pub mod codec;
pub mod context;
pub mod error;
pub mod reply;
pub mod server;
pub mod strategy;
pub mod transport;

pub use codec::{MessageCodec, MessageEncoding, ProstCodec};
pub use context::{BufferAllocator, ExecutionContext, RouteContext};
pub use error::{RouterError, ShutdownError};
pub use server::{PayloadWriter, RouteRegistry, RouterBuilder, RpcRouter};
pub use strategy::ExecutionStrategy;
pub use transport::{Method, ServerBinder, StreamingService, WireRequest, WireResponse};
