#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # amqp-routes
//!
//! Declarative route-based RPC and work-queue services over an AMQP broker,
//! in the style of an HTTP router: one handler per logical path, transported
//! over broker queues instead of sockets.
//!
//! ## Architecture
//!
//! A [`Worker`] owns one broker connection and channel, a route table, and
//! a codec. Two protocol workers exist:
//!
//! - [`RpcWorker`] binds routes to a request/reply protocol: each request
//!   is decoded, dispatched, and the normalized [`Response`] is published
//!   back to the caller's reply address, correlated by an opaque ID.
//! - [`QueueWorker`] binds routes to durable work queues: tasks are claimed
//!   by exactly one consumer and no reply is ever sent.
//!
//! A [`Runner`] composes workers and drives their lifecycle, handling
//! graceful shutdown on interrupt.
//!
//! Every handler outcome is normalized: a returned value becomes
//! `{"success": true, "data": ...}`, an error or panic becomes
//! `{"success": false, "error": {...}}`. Nothing a handler does can crash
//! the worker or leak a raw error to the transport layer.
//!
//! ## Module Organization
//!
//! - [`config`] - broker connection parameters and operating mode
//! - [`connection`] - connection establishment with retry
//! - [`codec`] - gzip + JSON wire codec with a type extension registry
//! - [`response`] - the success/error response model
//! - [`routes`] - route table and handler wrapping
//! - [`worker`] - worker lifecycle and the two protocol workers
//! - [`runner`] - multi-worker composition and shutdown
//! - [`client`] - producer-side RPC caller and queue publisher
//! - [`error`] - structured error handling
//! - [`logging`] - tracing setup
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use amqp_routes::response::HandlerFailure;
//! use amqp_routes::{ConnectionParameters, Mode, Runner, RpcWorker};
//! use serde_json::json;
//!
//! # async fn example() -> amqp_routes::Result<()> {
//! amqp_routes::logging::init(Mode::from_env()?);
//!
//! let mut worker = RpcWorker::new(ConnectionParameters::from_env());
//! worker
//!     .route("echo")
//!     .to(|data| async move { Ok::<_, HandlerFailure>(data) })?;
//! worker.route("greet").to(|data| async move {
//!     let name = data.as_str().unwrap_or("world");
//!     Ok::<_, HandlerFailure>(json!(format!("hello, {name}")))
//! })?;
//!
//! let mut runner = Runner::new();
//! runner.register(worker);
//! runner.run().await
//! # }
//! ```

pub mod client;
pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod logging;
pub mod response;
pub mod routes;
pub mod runner;
pub mod worker;

pub use client::{QueuePublisher, RpcClient};
pub use codec::Codec;
pub use config::{ConnectionParameters, Mode};
pub use connection::RetryPolicy;
pub use error::{Result, WorkerError};
pub use response::{ErrorInfo, HandlerFailure, Response};
pub use routes::{Route, RouteBinder, Router};
pub use runner::Runner;
pub use worker::queue::QueueWorker;
pub use worker::rpc::RpcWorker;
pub use worker::{Worker, WorkerState};
