use thiserror::Error;

use crate::server::RouteKind;

/// Boxed error produced by collaborator-supplied resources.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors raised while building, binding, or inspecting a router.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RouterError {
    /// The path is already registered under a different handler shape.
    #[error("route '{path}' is already registered as a {kind} handler")]
    DuplicateRoute { path: String, kind: RouteKind },

    /// No route registered for the given path.
    #[error("no route registered for path '{0}'")]
    UnknownRoute(String),

    /// The transport collaborator failed to open the listening endpoint.
    #[error("failed to bind streaming transport")]
    Bind(#[source] std::io::Error),
}

/// Aggregate failure from closing a route registry.
///
/// Every route resource is given the chance to close before this is
/// reported; the failures collected here did not prevent sibling routes
/// from releasing.
#[derive(Debug, Error)]
#[error("{} route resource(s) failed to close", .failures.len())]
pub struct ShutdownError {
    failures: Vec<RouteCloseFailure>,
}

impl ShutdownError {
    pub(crate) fn new(failures: Vec<RouteCloseFailure>) -> Self {
        Self { failures }
    }

    /// Per-route close failures, in registry order.
    pub fn failures(&self) -> &[RouteCloseFailure] {
        &self.failures
    }
}

/// A single route resource that failed to release.
#[derive(Debug)]
pub struct RouteCloseFailure {
    pub path: String,
    pub error: BoxError,
}
