//! # Worker Base
//!
//! Shared lifecycle for protocol-specific workers. A worker owns its
//! connection parameters, its route table, and a codec; protocol workers
//! ([`rpc::RpcWorker`], [`queue::QueueWorker`]) supply the hook that binds
//! each route to concrete broker primitives.
//!
//! ## Lifecycle
//!
//! ```text
//! Created -> Starting -> Running -> Stopping -> Stopped
//! ```
//!
//! `start()` connects (with retry), invokes the protocol hook for every
//! registered route concurrently, then transitions to `Running`. `stop()`
//! closes the connection, which implicitly cancels all consumers bound to
//! it. Each worker owns exactly one connection and one channel; neither is
//! shared across workers.

pub mod queue;
pub mod rpc;

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::try_join_all;
use lapin::{Channel, Connection};
use tracing::{info, warn};

use crate::codec::Codec;
use crate::config::ConnectionParameters;
use crate::connection::{connect_with_policy, RetryPolicy};
use crate::error::{Result, WorkerError};
use crate::routes::{Route, RouteBinder, Router};

/// Worker lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Created,
    Starting,
    Running,
    Stopping,
    Stopped,
}

/// State shared by every worker kind: parameters, route table, codec,
/// connection, lifecycle.
pub struct WorkerCore {
    params: ConnectionParameters,
    name: String,
    router: Router,
    codec: Arc<Codec>,
    retry_policy: RetryPolicy,
    state: WorkerState,
    connection: Option<Connection>,
    channel: Option<Channel>,
}

impl WorkerCore {
    pub fn new(params: ConnectionParameters, name: impl Into<String>) -> Self {
        Self::with_codec(params, name, Codec::new())
    }

    /// Build a core around a codec carrying extension registrations.
    pub fn with_codec(
        params: ConnectionParameters,
        name: impl Into<String>,
        codec: Codec,
    ) -> Self {
        Self {
            params,
            name: name.into(),
            router: Router::new(),
            codec: Arc::new(codec),
            retry_policy: RetryPolicy::default(),
            state: WorkerState::Created,
            connection: None,
            channel: None,
        }
    }

    /// Override the connection retry policy.
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Begin registering a handler on `path`. Must happen before `start()`.
    pub fn route(&mut self, path: impl Into<String>) -> RouteBinder<'_> {
        self.router.route(path)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    pub fn params(&self) -> &ConnectionParameters {
        &self.params
    }

    pub fn routes(&self) -> &[Route] {
        self.router.routes()
    }

    pub(crate) fn codec(&self) -> Arc<Codec> {
        self.codec.clone()
    }

    pub(crate) fn set_state(&mut self, state: WorkerState) {
        self.state = state;
    }

    /// Open the connection and channel, transitioning to `Starting`.
    pub(crate) async fn open(&mut self) -> Result<Channel> {
        self.state = WorkerState::Starting;
        let (connection, channel) = connect_with_policy(&self.params, self.retry_policy).await?;
        self.connection = Some(connection);
        self.channel = Some(channel.clone());
        Ok(channel)
    }

    /// Close the connection if one is open. Closing cancels all consumers.
    pub(crate) async fn close(&mut self) -> Result<()> {
        match self.connection.take() {
            Some(connection) => {
                self.channel = None;
                connection
                    .close(0, "worker stopped")
                    .await
                    .map_err(|e| WorkerError::channel("connection close", e.to_string()))?;
                Ok(())
            }
            None => {
                warn!(worker = %self.name, "worker already stopped");
                Ok(())
            }
        }
    }
}

impl std::fmt::Debug for WorkerCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerCore")
            .field("name", &self.name)
            .field("state", &self.state)
            .field("routes", &self.router.len())
            .finish()
    }
}

/// Lifecycle contract shared by protocol-specific workers.
///
/// `start` and `stop` are provided; implementors supply [`Worker::bind_route`],
/// the hook that binds one registered route to broker primitives (queue
/// declaration plus consumer).
#[async_trait]
pub trait Worker: Send + Sync {
    fn core(&self) -> &WorkerCore;

    fn core_mut(&mut self) -> &mut WorkerCore;

    /// Bind one route to its broker primitives. Invoked once per route
    /// during `start`; bindings for different routes are issued
    /// concurrently since their declarations are independent.
    async fn bind_route(&self, channel: &Channel, route: &Route) -> Result<()>;

    /// Connect to the broker and register every route.
    ///
    /// Calling `start` twice without an intervening `stop` is unsupported.
    async fn start(&mut self) -> Result<()> {
        let name = self.core().name().to_string();
        info!(worker = %name, "starting worker");

        let channel = self.core_mut().open().await?;

        let routes: Vec<Route> = self.core().routes().to_vec();
        try_join_all(routes.iter().map(|route| self.bind_route(&channel, route))).await?;

        self.core_mut().set_state(WorkerState::Running);
        info!(
            worker = %name,
            broker = %self.core().params().redacted(),
            routes = routes.len(),
            "worker waiting for tasks"
        );
        Ok(())
    }

    /// Stop accepting new work and close the transport.
    ///
    /// Does not wait for in-flight handlers to drain: deliveries that were
    /// not yet acknowledged are redelivered by the broker. Safe to call
    /// again after a successful stop (the second call is a no-op).
    async fn stop(&mut self) -> Result<()> {
        let name = self.core().name().to_string();
        info!(worker = %name, "stopping worker");

        self.core_mut().set_state(WorkerState::Stopping);
        self.core_mut().close().await?;
        self.core_mut().set_state(WorkerState::Stopped);

        info!(worker = %name, "worker stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::response::HandlerFailure;

    #[test]
    fn new_worker_core_starts_in_created() {
        let core = WorkerCore::new(ConnectionParameters::default(), "TestWorker");
        assert_eq!(core.state(), WorkerState::Created);
        assert!(core.routes().is_empty());
    }

    #[test]
    fn routes_register_through_the_core() {
        let mut core = WorkerCore::new(ConnectionParameters::default(), "TestWorker");
        core.route("echo")
            .to(|data| async move { Ok::<_, HandlerFailure>(data) })
            .unwrap();

        assert_eq!(core.routes().len(), 1);
        assert_eq!(core.routes()[0].path, "echo");
    }

    #[tokio::test]
    async fn close_without_connection_is_a_noop() {
        let mut core = WorkerCore::new(ConnectionParameters::default(), "TestWorker");
        assert!(core.close().await.is_ok());
        assert!(core.close().await.is_ok());
    }
}
