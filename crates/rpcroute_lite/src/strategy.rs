use crate::server::RouteKind;

/// Policy describing where a route's adapter is invoked relative to the
/// transport thread that dispatched the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionStrategy {
    /// Invoke on the calling thread. Appropriate for handlers that never
    /// block; the transport's I/O thread drives the adapter directly.
    #[default]
    NoOffload,

    /// Hop to the executor's worker pool before invoking the adapter.
    Offload,
}

impl ExecutionStrategy {
    pub fn is_offload(self) -> bool {
        matches!(self, ExecutionStrategy::Offload)
    }

    /// Resolve the strategy for one route at bind time.
    ///
    /// An explicit per-route strategy always wins. Without one, blocking
    /// shapes offload so they cannot starve the transport thread, and
    /// async shapes take the execution context's default.
    pub(crate) fn resolve(
        route: Option<ExecutionStrategy>,
        kind: RouteKind,
        default: ExecutionStrategy,
    ) -> ExecutionStrategy {
        match route {
            Some(strategy) => strategy,
            None if kind.is_blocking() => ExecutionStrategy::Offload,
            None => default,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_strategy_wins() {
        let resolved = ExecutionStrategy::resolve(
            Some(ExecutionStrategy::NoOffload),
            RouteKind::Blocking,
            ExecutionStrategy::Offload,
        );
        assert_eq!(resolved, ExecutionStrategy::NoOffload);
    }

    #[test]
    fn blocking_defaults_to_offload() {
        for kind in [RouteKind::Blocking, RouteKind::BlockingStreaming] {
            let resolved = ExecutionStrategy::resolve(None, kind, ExecutionStrategy::NoOffload);
            assert_eq!(resolved, ExecutionStrategy::Offload);
        }
    }

    #[test]
    fn async_shapes_take_context_default() {
        for kind in [RouteKind::Unary, RouteKind::Streaming] {
            let resolved = ExecutionStrategy::resolve(None, kind, ExecutionStrategy::Offload);
            assert_eq!(resolved, ExecutionStrategy::Offload);
            let resolved = ExecutionStrategy::resolve(None, kind, ExecutionStrategy::NoOffload);
            assert_eq!(resolved, ExecutionStrategy::NoOffload);
        }
    }
}
