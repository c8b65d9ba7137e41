use std::sync::Arc;
use std::sync::mpsc as std_mpsc;

use bytes::Bytes;
use tokio::sync::mpsc;
use tonic::Status;

use crate::codec::MessageSerializer;
use crate::context::BufferAllocator;

enum Sink<Resp> {
    /// Serialized frames, handed straight to the canonical response stream.
    Wire {
        tx: mpsc::Sender<Result<Bytes, Status>>,
        serializer: Arc<dyn MessageSerializer<Resp>>,
        allocator: BufferAllocator,
    },
    /// Typed messages, buffered for shape conversions.
    Typed {
        tx: std_mpsc::Sender<Result<Resp, Status>>,
    },
}

/// Scoped response writer handed to blocking streaming handlers.
///
/// The owning adapter closes the writer exactly once after the handler
/// returns, with any failure status attached first; dropping the writer
/// (the panic path) also finalizes the stream.
pub struct PayloadWriter<Resp> {
    sink: Option<Sink<Resp>>,
}

impl<Resp> PayloadWriter<Resp> {
    pub(crate) fn wire(
        tx: mpsc::Sender<Result<Bytes, Status>>,
        serializer: Arc<dyn MessageSerializer<Resp>>,
        allocator: BufferAllocator,
    ) -> Self {
        Self {
            sink: Some(Sink::Wire {
                tx,
                serializer,
                allocator,
            }),
        }
    }

    pub(crate) fn typed(tx: std_mpsc::Sender<Result<Resp, Status>>) -> Self {
        Self {
            sink: Some(Sink::Typed { tx }),
        }
    }

    /// Serialize and emit one response message.
    ///
    /// Blocks while the response stream is at capacity. Fails with
    /// `Cancelled` once the peer has gone away, letting long-running
    /// producers observe cancellation.
    pub fn write(&mut self, message: Resp) -> Result<(), Status> {
        match &self.sink {
            None => Err(Status::failed_precondition("payload writer is closed")),
            Some(Sink::Wire {
                tx,
                serializer,
                allocator,
            }) => {
                let frame = serializer.serialize(allocator, &message)?;
                tx.blocking_send(Ok(frame))
                    .map_err(|_| Status::cancelled("response stream closed by peer"))
            }
            Some(Sink::Typed { tx }) => tx
                .send(Ok(message))
                .map_err(|_| Status::cancelled("response stream closed by peer")),
        }
    }

    /// Force any buffered bytes out.
    ///
    /// Frames are handed to the response stream as they are written, so
    /// there is currently nothing to push.
    pub fn flush(&mut self) -> Result<(), Status> {
        if self.sink.is_none() {
            return Err(Status::failed_precondition("payload writer is closed"));
        }
        Ok(())
    }

    /// Finalize the stream with an OK trailing status.
    pub(crate) fn close(&mut self) {
        self.sink.take();
    }

    /// Attach a failure status to the trailing metadata and finalize.
    pub(crate) fn abort(&mut self, status: Status) {
        match self.sink.take() {
            Some(Sink::Wire { tx, .. }) => {
                let _ = tx.blocking_send(Err(status));
            }
            Some(Sink::Typed { tx }) => {
                let _ = tx.send(Err(status));
            }
            None => {}
        }
    }

    pub fn is_closed(&self) -> bool {
        self.sink.is_none()
    }
}

impl<Resp> Drop for PayloadWriter<Resp> {
    fn drop(&mut self) {
        self.sink.take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tonic::Code;

    struct TextSerializer;

    impl MessageSerializer<String> for TextSerializer {
        fn serialize(&self, _allocator: &BufferAllocator, message: &String) -> Result<Bytes, Status> {
            Ok(Bytes::from(message.clone()))
        }
    }

    fn wire_writer() -> (PayloadWriter<String>, mpsc::Receiver<Result<Bytes, Status>>) {
        let (tx, rx) = mpsc::channel(8);
        let writer = PayloadWriter::wire(tx, Arc::new(TextSerializer), BufferAllocator::default());
        (writer, rx)
    }

    #[test]
    fn writes_then_close_ends_stream() {
        let (mut writer, mut rx) = wire_writer();
        writer.write("one".to_owned()).unwrap();
        writer.write("two".to_owned()).unwrap();
        writer.close();
        assert!(writer.is_closed());

        assert_eq!(rx.blocking_recv().unwrap().unwrap(), Bytes::from("one"));
        assert_eq!(rx.blocking_recv().unwrap().unwrap(), Bytes::from("two"));
        assert!(rx.blocking_recv().is_none());
    }

    #[test]
    fn abort_attaches_status_before_close() {
        let (mut writer, mut rx) = wire_writer();
        writer.write("partial".to_owned()).unwrap();
        writer.abort(Status::internal("boom"));

        assert_eq!(rx.blocking_recv().unwrap().unwrap(), Bytes::from("partial"));
        let status = rx.blocking_recv().unwrap().unwrap_err();
        assert_eq!(status.code(), Code::Internal);
        assert!(rx.blocking_recv().is_none());
    }

    #[test]
    fn write_after_close_is_rejected() {
        let (mut writer, _rx) = wire_writer();
        writer.close();
        let err = writer.write("late".to_owned()).unwrap_err();
        assert_eq!(err.code(), Code::FailedPrecondition);
        assert_eq!(writer.flush().unwrap_err().code(), Code::FailedPrecondition);
    }

    #[test]
    fn write_to_departed_peer_is_cancelled() {
        let (mut writer, rx) = wire_writer();
        drop(rx);
        let err = writer.write("lost".to_owned()).unwrap_err();
        assert_eq!(err.code(), Code::Cancelled);
    }

    #[test]
    fn drop_finalizes_stream() {
        let (writer, mut rx) = wire_writer();
        drop(writer);
        assert!(rx.blocking_recv().is_none());
    }
}
