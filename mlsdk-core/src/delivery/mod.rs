//! Asynchronous event delivery
//!
//! Messages flow from a [`crate::Session`] through three layers:
//! - [`message`]: typed envelopes and their JSON wire shape
//! - [`worker`]: the per-session FIFO queue and its single consumer task
//! - [`transport`]: one HTTP call per message with retry/backoff
//!
//! The transport is shared by every session of a client. Queues and
//! histories belong to exactly one session.

pub mod message;
pub mod transport;
pub mod worker;

pub use message::WireMessage;
pub use transport::{HttpTransport, Method, Request, RetryPolicy, Transport, EVENTS_PATH};
pub use worker::{DeliveryLog, DeliveryWorker, Outbound};
