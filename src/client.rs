//! # Producer-Side Clients
//!
//! The caller's half of the two messaging patterns: [`RpcClient`] sends a
//! request and awaits the correlated reply; [`QueuePublisher`] enqueues a
//! task and returns immediately with no payload.
//!
//! Both speak the same wire format as the workers: gzip-compressed JSON
//! bodies, with `correlation_id`/`reply_to` metadata on RPC requests.

use std::collections::HashMap;
use std::sync::Arc;

use futures::StreamExt;
use lapin::options::{
    BasicConsumeOptions, BasicPublishOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection};
use serde_json::Value;
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::codec::Codec;
use crate::config::ConnectionParameters;
use crate::connection;
use crate::error::{Result, WorkerError};
use crate::response::Response;
use crate::worker::rpc::CONTENT_TYPE;

type PendingCalls = Arc<Mutex<HashMap<String, oneshot::Sender<Response>>>>;

/// Request/reply caller matching [`crate::RpcWorker`].
///
/// Replies arrive on an exclusive auto-delete callback queue and are
/// matched to their originating call by correlation ID, so multiple calls
/// may be in flight concurrently and complete in any order.
pub struct RpcClient {
    channel: Channel,
    codec: Arc<Codec>,
    callback_queue: String,
    pending: PendingCalls,
    connection: Connection,
}

impl RpcClient {
    pub async fn connect(params: &ConnectionParameters) -> Result<Self> {
        Self::with_codec(params, Codec::new()).await
    }

    /// Connect with a codec carrying extension registrations.
    pub async fn with_codec(params: &ConnectionParameters, codec: Codec) -> Result<Self> {
        let (connection, channel) = connection::connect(params).await?;

        // Broker-named exclusive queue for replies to this client only.
        let queue = channel
            .queue_declare(
                "",
                QueueDeclareOptions {
                    exclusive: true,
                    auto_delete: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| WorkerError::queue_operation("", "queue_declare", e.to_string()))?;
        let callback_queue = queue.name().as_str().to_string();

        let mut consumer = channel
            .basic_consume(
                &callback_queue,
                "rpc-client",
                BasicConsumeOptions {
                    no_ack: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| {
                WorkerError::queue_operation(&callback_queue, "basic_consume", e.to_string())
            })?;

        let codec = Arc::new(codec);
        let pending: PendingCalls = Arc::new(Mutex::new(HashMap::new()));

        let reply_codec = codec.clone();
        let reply_pending = pending.clone();
        tokio::spawn(async move {
            while let Some(delivery) = consumer.next().await {
                let delivery = match delivery {
                    Ok(delivery) => delivery,
                    Err(err) => {
                        debug!(error = %err, "rpc reply consumer closed");
                        break;
                    }
                };

                let Some(correlation_id) = delivery.properties.correlation_id().clone() else {
                    warn!("reply without correlation id, dropping");
                    continue;
                };

                let sender = reply_pending
                    .lock()
                    .await
                    .remove(correlation_id.as_str());
                let Some(sender) = sender else {
                    warn!(
                        correlation_id = %correlation_id,
                        "reply does not match any pending call, dropping"
                    );
                    continue;
                };

                let response = reply_codec
                    .decode(&delivery.data)
                    .map_err(|e| e.to_string())
                    .and_then(|value| {
                        serde_json::from_value::<Response>(value).map_err(|e| e.to_string())
                    });

                match response {
                    Ok(response) => {
                        // The caller may have given up; that is not an error.
                        let _ = sender.send(response);
                    }
                    Err(err) => {
                        warn!(
                            correlation_id = %correlation_id,
                            error = %err,
                            "reply failed to decode, dropping"
                        );
                    }
                }
            }
        });

        Ok(Self {
            channel,
            codec,
            callback_queue,
            pending,
            connection,
        })
    }

    /// Send a request to `path` and await the correlated [`Response`].
    pub async fn call(&self, path: &str, payload: &Value) -> Result<Response> {
        let correlation_id = Uuid::new_v4().to_string();
        let (sender, receiver) = oneshot::channel();
        self.pending
            .lock()
            .await
            .insert(correlation_id.clone(), sender);

        let bytes = self.codec.encode(payload)?;

        let publish = self
            .channel
            .basic_publish(
                "",
                path,
                BasicPublishOptions::default(),
                &bytes,
                BasicProperties::default()
                    .with_content_type(CONTENT_TYPE.into())
                    .with_correlation_id(correlation_id.as_str().into())
                    .with_reply_to(self.callback_queue.as_str().into()),
            )
            .await;

        let confirm = match publish {
            Ok(confirm) => confirm,
            Err(err) => {
                self.pending.lock().await.remove(&correlation_id);
                return Err(WorkerError::publish(path, err.to_string()));
            }
        };
        if let Err(err) = confirm.await {
            self.pending.lock().await.remove(&correlation_id);
            return Err(WorkerError::publish(path, err.to_string()));
        }

        receiver
            .await
            .map_err(|_| WorkerError::ReplyChannelClosed { correlation_id })
    }

    /// Close the underlying broker connection.
    pub async fn close(self) -> Result<()> {
        self.connection
            .close(0, "rpc client closed")
            .await
            .map_err(|e| WorkerError::channel("connection close", e.to_string()))
    }
}

/// Fire-and-forget producer matching [`crate::QueueWorker`].
pub struct QueuePublisher {
    channel: Channel,
    codec: Arc<Codec>,
    connection: Connection,
}

impl QueuePublisher {
    pub async fn connect(params: &ConnectionParameters) -> Result<Self> {
        let (connection, channel) = connection::connect(params).await?;
        Ok(Self {
            channel,
            codec: Arc::new(Codec::new()),
            connection,
        })
    }

    /// Enqueue a task on the durable queue `path`.
    ///
    /// Returns as soon as the broker confirms the publish; no reply ever
    /// arrives for this pattern.
    pub async fn publish(&self, path: &str, payload: &Value) -> Result<()> {
        // Declare with the same durability as the worker side so either
        // party can come up first.
        self.channel
            .queue_declare(
                path,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| WorkerError::queue_operation(path, "queue_declare", e.to_string()))?;

        let bytes = self.codec.encode(payload)?;

        self.channel
            .basic_publish(
                "",
                path,
                BasicPublishOptions::default(),
                &bytes,
                BasicProperties::default()
                    .with_content_type(CONTENT_TYPE.into())
                    .with_delivery_mode(2), // persistent
            )
            .await
            .map_err(|e| WorkerError::publish(path, e.to_string()))?
            .await
            .map_err(|e| WorkerError::publish(path, e.to_string()))?;

        Ok(())
    }

    /// Close the underlying broker connection.
    pub async fn close(self) -> Result<()> {
        self.connection
            .close(0, "queue publisher closed")
            .await
            .map_err(|e| WorkerError::channel("connection close", e.to_string()))
    }
}
