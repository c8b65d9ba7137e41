use std::sync::Arc;

use bytes::BytesMut;
use tokio::runtime::Handle;

use crate::codec::MessageEncoding;
use crate::strategy::ExecutionStrategy;

/// Allocation facility for encode buffers.
///
/// Serializers size their buffers from the message's encoded length; the
/// allocator lets an embedder round that hint up to a preferred minimum.
#[derive(Debug, Clone, Default)]
pub struct BufferAllocator {
    min_capacity: usize,
}

impl BufferAllocator {
    pub fn with_min_capacity(min_capacity: usize) -> Self {
        Self { min_capacity }
    }

    pub fn buffer(&self, capacity_hint: usize) -> BytesMut {
        BytesMut::with_capacity(capacity_hint.max(self.min_capacity))
    }
}

/// Ambient execution facilities borrowed by the router at bind time.
///
/// The router introduces no threads of its own: all offloading goes
/// through this context's executor handle.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    executor: Handle,
    allocator: BufferAllocator,
    default_strategy: ExecutionStrategy,
    channel_capacity: usize,
}

impl ExecutionContext {
    pub fn new(executor: Handle) -> Self {
        Self {
            executor,
            allocator: BufferAllocator::default(),
            default_strategy: ExecutionStrategy::NoOffload,
            channel_capacity: 32,
        }
    }

    /// Build a context from the current runtime.
    ///
    /// Panics outside a tokio runtime, like [`Handle::current`].
    pub fn current() -> Self {
        Self::new(Handle::current())
    }

    pub fn with_allocator(mut self, allocator: BufferAllocator) -> Self {
        self.allocator = allocator;
        self
    }

    /// Strategy applied to async routes that carry no per-route override.
    pub fn with_default_strategy(mut self, strategy: ExecutionStrategy) -> Self {
        self.default_strategy = strategy;
        self
    }

    /// Capacity of the bounded channels bridging blocking handlers to the
    /// async response stream. Bounds how far a producer can run ahead of
    /// its consumer.
    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }

    pub fn executor(&self) -> &Handle {
        &self.executor
    }

    pub fn allocator(&self) -> &BufferAllocator {
        &self.allocator
    }

    pub fn default_strategy(&self) -> ExecutionStrategy {
        self.default_strategy
    }

    pub fn channel_capacity(&self) -> usize {
        self.channel_capacity
    }
}

/// Per-request context handed to handlers.
#[derive(Debug, Clone)]
pub struct RouteContext {
    path: Arc<str>,
    encoding: MessageEncoding,
}

impl RouteContext {
    pub(crate) fn new(path: &str, encoding: MessageEncoding) -> Self {
        Self {
            path: Arc::from(path),
            encoding,
        }
    }

    /// The call path this request was dispatched to.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The negotiated message encoding for this call.
    pub fn encoding(&self) -> &MessageEncoding {
        &self.encoding
    }
}
