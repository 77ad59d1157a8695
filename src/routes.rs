//! # Route Table
//!
//! An ordered collection of `(path, handler)` bindings, in the style of an
//! HTTP router. Routes are registered before a worker starts and the table
//! is read-only once the worker is running.
//!
//! [`Route::dispatch`] is the single failure-containment seam of the
//! system: whether a handler returns a value, returns an error, or panics,
//! dispatch yields exactly one [`Response`]. A bug in one handler
//! never crashes the worker or other in-flight handlers.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use tracing::{debug, info};

use crate::error::{Result, WorkerError};
use crate::response::{ErrorInfo, HandlerFailure, Response};

/// A boxed async handler: one decoded payload in, one value (or failure) out.
pub type RouteHandler = Arc<
    dyn Fn(Value) -> BoxFuture<'static, std::result::Result<Value, HandlerFailure>> + Send + Sync,
>;

/// A named binding between a broker queue and an application handler.
#[derive(Clone)]
pub struct Route {
    pub path: String,
    handler: RouteHandler,
}

impl Route {
    /// Invoke the handler on a decoded payload, wrapping the outcome.
    ///
    /// Errors and panics are swallowed at this boundary and converted,
    /// never propagated to the broker client layer.
    pub async fn dispatch(&self, data: Value) -> Response {
        info!(path = %self.path, "task received");

        let outcome = AssertUnwindSafe((self.handler)(data)).catch_unwind().await;
        let response = match outcome {
            Ok(Ok(value)) => Response::ok(value),
            Ok(Err(failure)) => Response::err(ErrorInfo::from(failure)),
            Err(panic) => Response::err(ErrorInfo::from_panic(panic.as_ref())),
        };

        info!(path = %self.path, success = response.is_success(), "task completed");
        response
    }
}

impl std::fmt::Debug for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Route").field("path", &self.path).finish()
    }
}

/// Append-only ordered route table.
#[derive(Debug, Default)]
pub struct Router {
    routes: Vec<Route>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Begin registering a handler on `path`.
    ///
    /// The returned binder accepts exactly one handler:
    ///
    /// ```
    /// use amqp_routes::routes::Router;
    /// use amqp_routes::response::HandlerFailure;
    ///
    /// let mut router = Router::new();
    /// router
    ///     .route("echo")
    ///     .to(|data| async move { Ok::<_, HandlerFailure>(data) })
    ///     .unwrap();
    /// ```
    pub fn route(&mut self, path: impl Into<String>) -> RouteBinder<'_> {
        RouteBinder {
            router: self,
            path: path.into(),
        }
    }

    fn bind(&mut self, path: String, handler: RouteHandler) -> Result<()> {
        if self.routes.iter().any(|route| route.path == path) {
            return Err(WorkerError::duplicate_route(path));
        }

        debug!(path = %path, "route registered");
        self.routes.push(Route { path, handler });
        Ok(())
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

/// One-shot binder returned by [`Router::route`].
pub struct RouteBinder<'a> {
    router: &'a mut Router,
    path: String,
}

impl RouteBinder<'_> {
    /// Bind the handler and consume the binder.
    ///
    /// Fails with [`WorkerError::DuplicateRoute`] if the path is already
    /// bound on this router.
    pub fn to<F, Fut>(self, handler: F) -> Result<()>
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<Value, HandlerFailure>> + Send + 'static,
    {
        let handler: RouteHandler = Arc::new(move |data| handler(data).boxed());
        self.router.bind(self.path, handler)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn echo_router() -> Router {
        let mut router = Router::new();
        router
            .route("echo")
            .to(|data| async move { Ok::<_, HandlerFailure>(data) })
            .unwrap();
        router
    }

    #[tokio::test]
    async fn dispatch_wraps_normal_return_as_ok() {
        let router = echo_router();
        let response = router.routes()[0].dispatch(json!("hello")).await;

        assert_eq!(response, Response::ok(json!("hello")));
    }

    #[tokio::test]
    async fn dispatch_wraps_handler_error_as_err() {
        let mut router = Router::new();
        router
            .route("boom")
            .to(|_| async move {
                let n: i64 = "oops".parse()?;
                Ok(json!(n))
            })
            .unwrap();

        let response = router.routes()[0].dispatch(json!("")).await;
        match response {
            Response::Err(err) => {
                assert_eq!(err.error.kind, "ParseIntError");
                assert!(!err.error.trace.is_empty());
            }
            Response::Ok(_) => panic!("expected an error response"),
        }
    }

    #[tokio::test]
    async fn dispatch_contains_panics() {
        let mut router = Router::new();
        router
            .route("panics")
            .to(|_| async move { panic!("boom goes the handler") })
            .unwrap();

        let response = router.routes()[0].dispatch(json!(null)).await;
        match response {
            Response::Err(err) => {
                assert_eq!(err.error.kind, "panic");
                assert!(err.error.message.contains("boom goes the handler"));
            }
            Response::Ok(_) => panic!("expected an error response"),
        }
    }

    #[test]
    fn duplicate_path_fails_registration() {
        let mut router = echo_router();
        let result = router
            .route("echo")
            .to(|data| async move { Ok::<_, HandlerFailure>(data) });

        assert!(matches!(result, Err(WorkerError::DuplicateRoute { .. })));
        assert_eq!(router.len(), 1);
    }

    #[test]
    fn routes_keep_registration_order() {
        let mut router = Router::new();
        for path in ["first", "second", "third"] {
            router
                .route(path)
                .to(|data| async move { Ok::<_, HandlerFailure>(data) })
                .unwrap();
        }

        let paths: Vec<&str> = router.routes().iter().map(|r| r.path.as_str()).collect();
        assert_eq!(paths, vec!["first", "second", "third"]);
    }
}
