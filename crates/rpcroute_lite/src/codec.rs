use std::marker::PhantomData;
use std::sync::Arc;

use bytes::Bytes;
use prost::Message;
use tonic::Status;

use crate::context::{BufferAllocator, RouteContext};

/// Content-coding hint carried in request metadata.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum MessageEncoding {
    #[default]
    Identity,
    Other(Arc<str>),
}

impl MessageEncoding {
    /// Parse the encoding from its metadata header value.
    pub fn from_header(value: &str) -> Self {
        match value {
            "" | "identity" => MessageEncoding::Identity,
            other => MessageEncoding::Other(Arc::from(other)),
        }
    }
}

/// Decodes one wire frame into a typed message.
pub trait MessageDeserializer<M>: Send + Sync {
    fn deserialize(&self, frame: Bytes) -> Result<M, Status>;
}

/// Encodes one typed message into a wire frame.
pub trait MessageSerializer<M>: Send + Sync {
    fn serialize(&self, allocator: &BufferAllocator, message: &M) -> Result<Bytes, Status>;
}

/// Serialization collaborator for one route.
///
/// The router obtains typed stream transforms through this interface and
/// never inspects wire bytes itself.
pub trait MessageCodec<Req, Resp>: Send + Sync + 'static {
    fn deserializer_for(&self, encoding: &MessageEncoding) -> Arc<dyn MessageDeserializer<Req>>;
    fn serializer_for(&self, ctx: &RouteContext) -> Arc<dyn MessageSerializer<Resp>>;
}

/// Protobuf codec over `prost`.
pub struct ProstCodec<Req, Resp> {
    _marker: PhantomData<fn(Req) -> Resp>,
}

impl<Req, Resp> ProstCodec<Req, Resp> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<Req, Resp> Default for ProstCodec<Req, Resp> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Req, Resp> MessageCodec<Req, Resp> for ProstCodec<Req, Resp>
where
    Req: Message + Default + 'static,
    Resp: Message + 'static,
{
    fn deserializer_for(&self, encoding: &MessageEncoding) -> Arc<dyn MessageDeserializer<Req>> {
        match encoding {
            MessageEncoding::Identity => Arc::new(ProstDeserializer(PhantomData)),
            MessageEncoding::Other(name) => Arc::new(UnsupportedEncoding(Arc::clone(name))),
        }
    }

    fn serializer_for(&self, _ctx: &RouteContext) -> Arc<dyn MessageSerializer<Resp>> {
        Arc::new(ProstSerializer(PhantomData))
    }
}

struct ProstDeserializer<M>(PhantomData<fn() -> M>);

impl<M: Message + Default> MessageDeserializer<M> for ProstDeserializer<M> {
    fn deserialize(&self, frame: Bytes) -> Result<M, Status> {
        M::decode(frame)
            .map_err(|e| Status::invalid_argument(format!("failed to decode request message: {e}")))
    }
}

struct ProstSerializer<M>(PhantomData<fn() -> M>);

impl<M: Message> MessageSerializer<M> for ProstSerializer<M> {
    fn serialize(&self, allocator: &BufferAllocator, message: &M) -> Result<Bytes, Status> {
        let mut buf = allocator.buffer(message.encoded_len());
        message
            .encode(&mut buf)
            .map_err(|e| Status::internal(format!("failed to encode response message: {e}")))?;
        Ok(buf.freeze())
    }
}

struct UnsupportedEncoding(Arc<str>);

impl<M> MessageDeserializer<M> for UnsupportedEncoding {
    fn deserialize(&self, _frame: Bytes) -> Result<M, Status> {
        Err(Status::unimplemented(format!(
            "unsupported message encoding '{}'",
            self.0
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tonic::Code;

    #[derive(Clone, PartialEq, ::prost::Message)]
    struct Echo {
        #[prost(string, tag = "1")]
        text: String,
    }

    #[test]
    fn prost_round_trip() {
        let codec = ProstCodec::<Echo, Echo>::new();
        let allocator = BufferAllocator::default();
        let ctx = RouteContext::new("/test.Echo/Echo", MessageEncoding::Identity);

        let message = Echo {
            text: "ping".to_owned(),
        };
        let frame = codec
            .serializer_for(&ctx)
            .serialize(&allocator, &message)
            .unwrap();
        let decoded = codec
            .deserializer_for(&MessageEncoding::Identity)
            .deserialize(frame)
            .unwrap();
        assert_eq!(decoded, message);
    }

    #[test]
    fn garbage_frame_is_invalid_argument() {
        let codec = ProstCodec::<Echo, Echo>::new();
        let err = codec
            .deserializer_for(&MessageEncoding::Identity)
            .deserialize(Bytes::from_static(&[0xff, 0xff, 0xff]))
            .unwrap_err();
        assert_eq!(err.code(), Code::InvalidArgument);
    }

    #[test]
    fn unknown_encoding_is_unimplemented() {
        let codec = ProstCodec::<Echo, Echo>::new();
        let encoding = MessageEncoding::from_header("zstd");
        let err = codec
            .deserializer_for(&encoding)
            .deserialize(Bytes::new())
            .unwrap_err();
        assert_eq!(err.code(), Code::Unimplemented);
    }

    #[test]
    fn identity_header_values() {
        assert_eq!(MessageEncoding::from_header(""), MessageEncoding::Identity);
        assert_eq!(
            MessageEncoding::from_header("identity"),
            MessageEncoding::Identity
        );
        assert!(matches!(
            MessageEncoding::from_header("gzip"),
            MessageEncoding::Other(_)
        ));
    }
}
