//! Status and response mapping.
//!
//! Handler failures crossing the adapter boundary become protocol-visible
//! status responses, never transport errors. The classification is small
//! and fixed: a `Status` passes through unchanged, decode failures are
//! `InvalidArgument`, an executor join failure is `Internal` (panic) or
//! `Cancelled`, a write to a departed peer is `Cancelled`, and unmatched
//! verbs or paths are `Unimplemented`.

use std::sync::Arc;

use async_stream::stream;
use futures::stream::BoxStream;
use futures::StreamExt;
use tokio::task::JoinError;
use tonic::Status;

use crate::codec::{MessageEncoding, MessageSerializer};
use crate::context::BufferAllocator;
use crate::transport::WireResponse;

/// Build a success envelope from a typed response stream.
///
/// Elements are serialized in handler order; the first failure (from the
/// handler or the serializer) becomes the trailing status and ends the
/// stream.
pub fn new_response<Resp>(
    encoding: MessageEncoding,
    serializer: Arc<dyn MessageSerializer<Resp>>,
    allocator: BufferAllocator,
    messages: BoxStream<'static, Result<Resp, Status>>,
) -> WireResponse
where
    Resp: Send + 'static,
{
    let mut messages = messages;
    let body = stream! {
        while let Some(item) = messages.next().await {
            match item {
                Ok(message) => match serializer.serialize(&allocator, &message) {
                    Ok(frame) => yield Ok(frame),
                    Err(status) => {
                        yield Err(status);
                        break;
                    }
                },
                Err(status) => {
                    yield Err(status);
                    break;
                }
            }
        }
    };
    WireResponse::new(encoding, body)
}

/// Build a failure envelope: no payload, trailing status only.
pub fn new_error_response(encoding: MessageEncoding, status: Status) -> WireResponse {
    WireResponse::new(
        encoding,
        futures::stream::once(futures::future::ready(Err(status))),
    )
}

/// The fixed response for an unmatched verb or an unregistered path.
///
/// Stateless; the dispatcher builds it fresh per miss.
pub fn not_implemented_response() -> WireResponse {
    new_error_response(MessageEncoding::Identity, Status::unimplemented(""))
}

/// Map an executor join failure to its protocol status.
pub(crate) fn join_error_status(err: JoinError) -> Status {
    if err.is_cancelled() {
        Status::cancelled("handler task was cancelled")
    } else {
        Status::internal(format!("handler panicked: {err}"))
    }
}
