//! # Queue Worker
//!
//! Binds routes to a one-way work-queue protocol: each task is claimed by
//! exactly one consumer and no reply is ever sent. Queues are declared
//! durable so tasks survive broker restarts.
//!
//! The handler outcome is still normalized into a [`Response`] and logged,
//! even though it is discarded, preserving the same failure-containment
//! guarantee as the RPC worker.

use async_trait::async_trait;
use futures::StreamExt;
use lapin::message::Delivery;
use lapin::options::{BasicAckOptions, BasicConsumeOptions, QueueDeclareOptions};
use lapin::types::FieldTable;
use lapin::Channel;
use tracing::{error, info, warn};

use crate::codec::Codec;
use crate::config::ConnectionParameters;
use crate::error::{Result, WorkerError};
use crate::response::Response;
use crate::routes::{Route, RouteBinder};
use crate::worker::{Worker, WorkerCore};

/// Fire-and-forget worker over durable broker queues.
///
/// ```no_run
/// use amqp_routes::{ConnectionParameters, QueueWorker, Worker};
/// use amqp_routes::response::HandlerFailure;
/// use serde_json::json;
///
/// # async fn example() -> amqp_routes::Result<()> {
/// let mut worker = QueueWorker::new(ConnectionParameters::from_env());
/// worker.route("log").to(|data| async move {
///     println!("task: {data}");
///     Ok::<_, HandlerFailure>(json!(null))
/// })?;
/// worker.start().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct QueueWorker {
    core: WorkerCore,
}

impl QueueWorker {
    pub fn new(params: ConnectionParameters) -> Self {
        Self::named(params, "QueueWorker")
    }

    pub fn named(params: ConnectionParameters, name: impl Into<String>) -> Self {
        Self {
            core: WorkerCore::new(params, name),
        }
    }

    /// Build a worker around a codec carrying extension registrations.
    pub fn with_codec(params: ConnectionParameters, codec: Codec) -> Self {
        Self {
            core: WorkerCore::with_codec(params, "QueueWorker", codec),
        }
    }

    /// Override the connection retry policy.
    pub fn with_retry_policy(mut self, policy: crate::connection::RetryPolicy) -> Self {
        self.core = self.core.with_retry_policy(policy);
        self
    }

    /// Register a handler on `path`. Must be called before `start()`.
    pub fn route(&mut self, path: impl Into<String>) -> RouteBinder<'_> {
        self.core.route(path)
    }
}

#[async_trait]
impl Worker for QueueWorker {
    fn core(&self) -> &WorkerCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut WorkerCore {
        &mut self.core
    }

    async fn bind_route(&self, channel: &Channel, route: &Route) -> Result<()> {
        channel
            .queue_declare(
                &route.path,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| {
                WorkerError::queue_operation(&route.path, "queue_declare", e.to_string())
            })?;

        let consumer_tag = format!("{}.{}", self.core.name(), route.path);
        let mut consumer = channel
            .basic_consume(
                &route.path,
                &consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| {
                WorkerError::queue_operation(&route.path, "basic_consume", e.to_string())
            })?;

        info!(
            worker = %self.core.name(),
            path = %route.path,
            "registered queue handler"
        );

        let codec = self.core.codec();
        let route = route.clone();
        tokio::spawn(async move {
            while let Some(delivery) = consumer.next().await {
                let delivery = match delivery {
                    Ok(delivery) => delivery,
                    Err(err) => {
                        warn!(path = %route.path, error = %err, "queue consumer closed");
                        break;
                    }
                };

                let codec = codec.clone();
                let route = route.clone();
                tokio::spawn(async move {
                    if let Err(err) = serve_task(&codec, &route, delivery).await {
                        error!(path = %route.path, error = %err, "queue task handling failed");
                    }
                });
            }
        });

        Ok(())
    }
}

/// Handle one inbound task. The response is computed for observability but
/// never transmitted; there is no reply address in this pattern.
async fn serve_task(codec: &Codec, route: &Route, delivery: Delivery) -> Result<()> {
    match codec.decode(&delivery.data) {
        Ok(value) => {
            let response = route.dispatch(value).await;
            match response {
                Response::Ok(_) => {
                    info!(path = %route.path, "task succeeded");
                }
                Response::Err(err) => {
                    error!(
                        path = %route.path,
                        kind = %err.error.kind,
                        message = %err.error.message,
                        "task failed"
                    );
                }
            }
        }
        Err(err) => {
            // No caller to inform; log and drop the malformed task.
            warn!(path = %route.path, error = %err, "inbound task failed to decode, dropping");
        }
    }

    delivery
        .acker
        .ack(BasicAckOptions::default())
        .await
        .map_err(|e| WorkerError::queue_operation(&route.path, "ack", e.to_string()))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_defaults_to_queue_name() {
        let worker = QueueWorker::new(ConnectionParameters::default());
        assert_eq!(worker.core().name(), "QueueWorker");
    }

    #[test]
    fn named_worker_keeps_its_name() {
        let worker = QueueWorker::named(ConnectionParameters::default(), "audit-log");
        assert_eq!(worker.core().name(), "audit-log");
    }
}
