//! Gnat: a small NATS client core.
//!
//! Gnat implements the text-framed NATS client protocol over any reliable
//! byte stream, built around three tightly coupled pieces:
//!
//! - **A wire codec** that parses and emits the line-oriented frames (INFO,
//!   CONNECT, SUB, UNSUB, PING/PONG, +OK/-ERR, PUB, HPUB, MSG, HMSG),
//!   inline header blocks and payload framing included.
//! - **[`Appendable`]**, a growable owned byte buffer reused for subjects,
//!   headers and payloads alike, so the receive loop stops allocating once
//!   its buffers have warmed up.
//! - **[`Subscriber`]**, a runtime that pairs a background reader task with
//!   a blocking, timed [`fetch`](Subscriber::fetch) API and recycles
//!   [`Message`] objects through two mailboxes: a free pool and a delivery
//!   queue.
//!
//! # Overview
//!
//! ```text
//!                       ┌────────────────────────────────────────────┐
//!  server ──bytes──▶ transport ──▶ Parser ──Message──▶ [delivery] ──▶ fetch()
//!                       ▲              ▲                             │
//!                       │              └────── [free pool] ◀──────── reuse()
//!  server ◀──frames── Formatter ◀── subscribe()/publish()/PONG
//! ```
//!
//! The reader task draws a recycled [`Message`] from the free pool, lets
//! the parser fill it straight off the wire, and queues it for the
//! consumer. Returning messages with [`reuse`](Subscriber::reuse) closes
//! the loop. A bounded delivery mailbox parks the reader when the consumer
//! falls behind, which turns into TCP backpressure toward the server.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use gnat::{ConnectOpts, Subscriber};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut sub = Subscriber::connect(
//!         ConnectOpts::new("127.0.0.1", 4222).with_name("greeter"),
//!     )
//!     .await?;
//!
//!     sub.subscribe("greet.*", None, "1").await?;
//!     sub.publish("greet.joe", None, b"hello").await?;
//!
//!     let msg = sub.fetch(Duration::from_secs(5)).await?;
//!     println!(
//!         "{} -> {}",
//!         String::from_utf8_lossy(msg.subject().unwrap_or_default()),
//!         String::from_utf8_lossy(msg.payload().unwrap_or_default()),
//!     );
//!     sub.reuse(msg);
//!
//!     sub.disconnect().await;
//!     Ok(())
//! }
//! ```
//!
//! # Scope
//!
//! Gnat is the protocol core: framing, buffering and the subscriber
//! runtime. Reconnection policy, JetStream, request/reply sugar and the
//! TLS handshake are left to the layers above; the transport seam accepts
//! any `AsyncRead`/`AsyncWrite` pair, so a TLS session plugs in where a
//! TCP stream does.

mod api;
mod buffers;
mod codec;
mod connection;
mod protocol;
pub mod sync;

pub use api::{ConnectError, ConnectOpts, FetchError, ServerInfo, Subscriber};
pub use buffers::{Appendable, BufError, DEFAULT_ROUND};
pub use codec::DecodeError;
pub use connection::WriteError;
pub use protocol::{HeaderError, Headers, HeadersIter, Kind, Message};
