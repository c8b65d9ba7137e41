use std::fmt;
use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use tonic::{Code, Status};

use crate::codec::MessageEncoding;

/// HTTP-style request verb. Call paths accept only [`Method::Post`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
    Head,
    Options,
    Other(String),
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Method::Get => f.write_str("GET"),
            Method::Post => f.write_str("POST"),
            Method::Put => f.write_str("PUT"),
            Method::Delete => f.write_str("DELETE"),
            Method::Head => f.write_str("HEAD"),
            Method::Options => f.write_str("OPTIONS"),
            Method::Other(name) => f.write_str(name),
        }
    }
}

/// One inbound call delivered by the transport collaborator.
///
/// The body is a lazy stream of wire frames; an `Err` item carries a
/// transport-level failure and terminates the stream.
pub struct WireRequest {
    method: Method,
    path: String,
    encoding: MessageEncoding,
    body: BoxStream<'static, Result<Bytes, Status>>,
}

impl WireRequest {
    pub fn new(
        method: Method,
        path: impl Into<String>,
        encoding: MessageEncoding,
        body: impl Stream<Item = Result<Bytes, Status>> + Send + 'static,
    ) -> Self {
        Self {
            method,
            path: path.into(),
            encoding,
            body: body.boxed(),
        }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn encoding(&self) -> &MessageEncoding {
        &self.encoding
    }

    pub fn into_body(self) -> BoxStream<'static, Result<Bytes, Status>> {
        self.body
    }
}

impl fmt::Debug for WireRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WireRequest")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("encoding", &self.encoding)
            .finish_non_exhaustive()
    }
}

/// Outbound envelope: zero or more payload frames, then a trailing status.
///
/// A terminal `Err` item is the non-OK trailing status; a stream that ends
/// without one completed with OK.
pub struct WireResponse {
    encoding: MessageEncoding,
    body: BoxStream<'static, Result<Bytes, Status>>,
}

impl WireResponse {
    pub fn new(
        encoding: MessageEncoding,
        body: impl Stream<Item = Result<Bytes, Status>> + Send + 'static,
    ) -> Self {
        Self {
            encoding,
            body: body.boxed(),
        }
    }

    pub fn encoding(&self) -> &MessageEncoding {
        &self.encoding
    }

    pub fn into_body(self) -> BoxStream<'static, Result<Bytes, Status>> {
        self.body
    }

    /// Drain the response into its payload frames and trailing status.
    pub async fn collect(self) -> (Vec<Bytes>, Status) {
        let mut body = self.body;
        let mut frames = Vec::new();
        while let Some(item) = body.next().await {
            match item {
                Ok(frame) => frames.push(frame),
                Err(status) => return (frames, status),
            }
        }
        (frames, Status::new(Code::Ok, ""))
    }
}

impl fmt::Debug for WireResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WireResponse")
            .field("encoding", &self.encoding)
            .finish_non_exhaustive()
    }
}

/// The canonical bound service shape the router hands to the transport.
///
/// Handler failures never surface here; they are mapped to status
/// responses before this boundary.
#[async_trait]
pub trait StreamingService: Send + Sync + 'static {
    async fn handle(&self, request: WireRequest) -> WireResponse;
}

/// Transport collaborator that opens the listening endpoint.
///
/// The router supplies the service function; the binder performs the
/// actual I/O and session management.
#[async_trait]
pub trait ServerBinder {
    /// Handle to the bound server, owned by the transport.
    type Handle: Send + 'static;

    async fn bind_streaming(&self, service: Arc<dyn StreamingService>) -> io::Result<Self::Handle>;
}
