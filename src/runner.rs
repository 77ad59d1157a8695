//! # Runner
//!
//! Composes one or more workers and drives their lifecycle inside the
//! cooperative scheduler. The runner is an explicit owned value built by
//! the composing application; there is no process-wide registry.
//!
//! `run()` starts every registered worker concurrently, parks until an
//! interrupt arrives, then stops every worker concurrently and waits for
//! all of them before returning.

use futures::future::try_join_all;
use tracing::{info, warn};

use crate::error::Result;
use crate::worker::Worker;

/// Owns a set of workers and runs them to completion.
///
/// ```no_run
/// use amqp_routes::{ConnectionParameters, QueueWorker, RpcWorker, Runner};
/// use amqp_routes::response::HandlerFailure;
///
/// # async fn example() -> amqp_routes::Result<()> {
/// let params = ConnectionParameters::from_env();
///
/// let mut api = RpcWorker::new(params.clone());
/// api.route("echo")
///     .to(|data| async move { Ok::<_, HandlerFailure>(data) })?;
///
/// let mut runner = Runner::new();
/// runner.register(api);
/// runner.run().await
/// # }
/// ```
#[derive(Default)]
pub struct Runner {
    workers: Vec<Box<dyn Worker>>,
}

impl Runner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a worker. Registration after `run()` has begun is unsupported.
    pub fn register(&mut self, worker: impl Worker + 'static) {
        self.workers.push(Box::new(worker));
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Run all workers until an interrupt signal (ctrl-c) arrives, then
    /// stop them gracefully.
    pub async fn run(&mut self) -> Result<()> {
        self.run_until(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
    }

    /// Run all workers until `shutdown` resolves, then stop them.
    ///
    /// `run()` is this with a ctrl-c future; tests and embedding
    /// applications can supply their own shutdown condition.
    pub async fn run_until<F>(&mut self, shutdown: F) -> Result<()>
    where
        F: std::future::Future<Output = ()>,
    {
        info!(workers = self.workers.len(), "starting workers");
        if let Err(err) = try_join_all(self.workers.iter_mut().map(|worker| worker.start())).await {
            // Siblings that came up before the failure hold open
            // connections; stop them before surfacing the error. Stopping
            // a worker that never started is a no-op.
            warn!(error = %err, "worker start failed, stopping workers that came up");
            for worker in &mut self.workers {
                if let Err(stop_err) = worker.stop().await {
                    warn!(error = %stop_err, "worker did not stop cleanly");
                }
            }
            return Err(err);
        }

        shutdown.await;

        info!("shutdown requested, stopping workers");
        try_join_all(self.workers.iter_mut().map(|worker| worker.stop())).await?;
        info!("all workers stopped");
        Ok(())
    }
}

impl std::fmt::Debug for Runner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runner")
            .field("workers", &self.workers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;
    use lapin::Channel;
    use tokio_test::assert_ok;

    use crate::config::ConnectionParameters;
    use crate::error::WorkerError;
    use crate::routes::Route;
    use crate::worker::rpc::RpcWorker;
    use crate::worker::{WorkerCore, WorkerState};

    /// Worker with an in-memory lifecycle, no broker involved.
    struct RecordingWorker {
        core: WorkerCore,
        fail_start: bool,
        stopped: Arc<AtomicBool>,
    }

    impl RecordingWorker {
        fn healthy(name: &str, stopped: Arc<AtomicBool>) -> Self {
            Self {
                core: WorkerCore::new(ConnectionParameters::default(), name),
                fail_start: false,
                stopped,
            }
        }

        fn broken(name: &str) -> Self {
            Self {
                core: WorkerCore::new(ConnectionParameters::default(), name),
                fail_start: true,
                stopped: Arc::new(AtomicBool::new(false)),
            }
        }
    }

    #[async_trait]
    impl Worker for RecordingWorker {
        fn core(&self) -> &WorkerCore {
            &self.core
        }

        fn core_mut(&mut self) -> &mut WorkerCore {
            &mut self.core
        }

        async fn bind_route(&self, _channel: &Channel, _route: &Route) -> Result<()> {
            Ok(())
        }

        async fn start(&mut self) -> Result<()> {
            if self.fail_start {
                return Err(WorkerError::channel("open", "broker unavailable"));
            }
            self.core.set_state(WorkerState::Running);
            Ok(())
        }

        async fn stop(&mut self) -> Result<()> {
            self.stopped.store(true, Ordering::SeqCst);
            self.core.set_state(WorkerState::Stopped);
            Ok(())
        }
    }

    #[test]
    fn registration_appends_workers() {
        let mut runner = Runner::new();
        assert!(runner.is_empty());

        runner.register(RpcWorker::new(ConnectionParameters::default()));
        runner.register(RpcWorker::named(
            ConnectionParameters::default(),
            "second",
        ));
        assert_eq!(runner.len(), 2);
    }

    #[tokio::test]
    async fn run_until_with_no_workers_completes_on_shutdown() {
        let mut runner = Runner::new();
        tokio_test::assert_ok!(runner.run_until(std::future::ready(())).await);
    }

    #[tokio::test]
    async fn run_until_stops_every_worker_after_shutdown() {
        let stopped = Arc::new(AtomicBool::new(false));
        let mut runner = Runner::new();
        runner.register(RecordingWorker::healthy("api", stopped.clone()));

        tokio_test::assert_ok!(runner.run_until(std::future::ready(())).await);
        assert!(stopped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn failed_start_stops_workers_that_came_up() {
        let stopped = Arc::new(AtomicBool::new(false));
        let mut runner = Runner::new();
        runner.register(RecordingWorker::healthy("api", stopped.clone()));
        runner.register(RecordingWorker::broken("tasks"));

        // The shutdown future never resolves; the start failure must
        // surface on its own, with the healthy worker stopped.
        let result = runner.run_until(std::future::pending::<()>()).await;

        assert!(matches!(result, Err(WorkerError::Channel { .. })));
        assert!(stopped.load(Ordering::SeqCst));
    }
}
