//! # RPC Worker
//!
//! Binds routes to a request/reply protocol. Each inbound request is
//! decoded, dispatched through the route's wrapped handler, and the
//! resulting [`Response`] is encoded and published back to the address and
//! correlation ID carried on the request's metadata. A request whose
//! handler fails still receives a reply (the error response); nothing is
//! silently dropped and no raw protocol error reaches the caller.
//!
//! Requests are handled concurrently: every delivery is dispatched on its
//! own task, so a slow handler never blocks dispatch of other requests.
//! No per-request timeout is enforced on this side; the caller is
//! responsible for giving up.

use async_trait::async_trait;
use futures::StreamExt;
use lapin::message::Delivery;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicPublishOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel};
use tracing::{error, info, warn};

use crate::codec::Codec;
use crate::config::ConnectionParameters;
use crate::error::{Result, WorkerError};
use crate::response::{ErrorInfo, HandlerFailure, Response};
use crate::routes::{Route, RouteBinder};
use crate::worker::{Worker, WorkerCore};

pub(crate) const CONTENT_TYPE: &str = "application/octet-stream";

/// Request/reply worker over broker queues.
///
/// ```no_run
/// use amqp_routes::{ConnectionParameters, RpcWorker, Worker};
/// use amqp_routes::response::HandlerFailure;
///
/// # async fn example() -> amqp_routes::Result<()> {
/// let mut worker = RpcWorker::new(ConnectionParameters::from_env());
/// worker
///     .route("echo")
///     .to(|data| async move { Ok::<_, HandlerFailure>(data) })?;
/// worker.start().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct RpcWorker {
    core: WorkerCore,
}

impl RpcWorker {
    pub fn new(params: ConnectionParameters) -> Self {
        Self::named(params, "RPCWorker")
    }

    pub fn named(params: ConnectionParameters, name: impl Into<String>) -> Self {
        Self {
            core: WorkerCore::new(params, name),
        }
    }

    /// Build a worker around a codec carrying extension registrations.
    pub fn with_codec(params: ConnectionParameters, codec: Codec) -> Self {
        Self {
            core: WorkerCore::with_codec(params, "RPCWorker", codec),
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
impl Worker for RpcWorker {
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
                QueueDeclareOptions::default(),
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
            "registered rpc handler"
        );

        let codec = self.core.codec();
        let channel = channel.clone();
        let route = route.clone();
        tokio::spawn(async move {
            while let Some(delivery) = consumer.next().await {
                let delivery = match delivery {
                    Ok(delivery) => delivery,
                    Err(err) => {
                        // The stream yields an error when the channel or
                        // connection goes away; the worker is shutting down.
                        warn!(path = %route.path, error = %err, "rpc consumer closed");
                        break;
                    }
                };

                let codec = codec.clone();
                let channel = channel.clone();
                let route = route.clone();
                tokio::spawn(async move {
                    if let Err(err) = serve_request(&codec, &channel, &route, delivery).await {
                        error!(path = %route.path, error = %err, "rpc request handling failed");
                    }
                });
            }
        });

        Ok(())
    }
}

/// Handle one inbound request end to end.
///
/// The delivery is acknowledged only after a response has been fully
/// computed; a crash before that point leaves the message eligible for
/// redelivery.
async fn serve_request(
    codec: &Codec,
    channel: &Channel,
    route: &Route,
    delivery: Delivery,
) -> Result<()> {
    let response = match codec.decode(&delivery.data) {
        Ok(value) => route.dispatch(value).await,
        Err(err) => {
            warn!(path = %route.path, error = %err, "inbound payload failed to decode");
            Response::err(ErrorInfo::from(HandlerFailure::from(err)))
        }
    };

    let reply_to = delivery.properties.reply_to().clone();
    let correlation_id = delivery.properties.correlation_id().clone();

    match reply_to {
        Some(reply_to) => {
            let payload = encode_response(codec, &response);

            let mut properties = BasicProperties::default().with_content_type(CONTENT_TYPE.into());
            if let Some(id) = correlation_id {
                properties = properties.with_correlation_id(id);
            }

            channel
                .basic_publish(
                    "", // default exchange routes straight to the reply queue
                    reply_to.as_str(),
                    BasicPublishOptions::default(),
                    &payload,
                    properties,
                )
                .await
                .map_err(|e| WorkerError::publish(reply_to.as_str(), e.to_string()))?
                .await
                .map_err(|e| WorkerError::publish(reply_to.as_str(), e.to_string()))?;
        }
        None => {
            // Computed but undeliverable; keep the containment guarantee
            // and surface the outcome in the logs.
            warn!(
                path = %route.path,
                success = response.is_success(),
                "request carried no reply address, response dropped"
            );
        }
    }

    delivery
        .acker
        .ack(BasicAckOptions::default())
        .await
        .map_err(|e| WorkerError::queue_operation(&route.path, "ack", e.to_string()))?;

    Ok(())
}

/// Encode a response, falling back to a serialization-error response.
///
/// Error responses are always encodable by construction, so the fallback
/// can only trigger for a pathological handler result. It is logged as an
/// internal error rather than silently dropped.
pub(crate) fn encode_response(codec: &Codec, response: &Response) -> Vec<u8> {
    match codec.encode(response) {
        Ok(bytes) => bytes,
        Err(err) => {
            error!(error = %err, "response failed to encode, replying with serialization error");
            let fallback = Response::err(ErrorInfo {
                kind: "SerializationError".to_string(),
                message: err.to_string(),
                args: Vec::new(),
                trace: String::new(),
            });
            codec.encode(&fallback).unwrap_or_default()
        }
    }
}
