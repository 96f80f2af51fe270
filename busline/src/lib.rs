//! # Busline
//!
//! An in-process event bus with isolated per-receiver message delivery.
//!
//! Busline exchanges [`Envelope`]s between producers and consumers over
//! shared memory, while guaranteeing that every receiver behaves as if the
//! message had been serialized and deserialized just for it. The isolation
//! step is [`Envelope::copy_before_receive`], run once per matched receiver
//! immediately before delivery; what "as if serialized" means is defined by
//! the message's [`MessageCodec`].
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │ EventBus                                            │
//! │  consumer registry · codec registry · pending       │
//! │  replies (request/reply correlation + timeouts)     │
//! ├─────────────────────────────────────────────────────┤
//! │ Envelope                                            │
//! │  address · headers · sent/received body · codec     │
//! │  copy_before_receive() · reply() · fail()           │
//! ├─────────────────────────────────────────────────────┤
//! │ Codecs                                              │
//! │  IdentityCodec · CloneCodec<T> · JsonCodec<T>       │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick start
//!
//! ```rust
//! use busline::prelude::*;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let bus = EventBus::new();
//! let mut consumer = bus.consumer("greetings");
//!
//! bus.publish("greetings", Body::new("hello".to_string())).unwrap();
//!
//! let envelope = consumer.next().await.unwrap();
//! assert_eq!(envelope.body_as::<String>().unwrap(), "hello");
//! # }
//! ```
//!
//! Request/reply layers on top of point-to-point delivery:
//!
//! ```rust
//! use busline::prelude::*;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let bus = EventBus::new();
//! let mut consumer = bus.consumer("echo");
//! tokio::spawn(async move {
//!     while let Some(envelope) = consumer.next().await {
//!         let body = envelope.body().cloned();
//!         envelope.reply(body).unwrap();
//!     }
//! });
//!
//! let reply = bus.request("echo", Body::new(42u32)).await.unwrap();
//! assert_eq!(reply.body_as::<u32>(), Some(&42));
//! # }
//! ```

#![deny(missing_docs)]

pub mod bus;
pub mod codec;
pub mod envelope;
pub mod error;
pub mod headers;
pub mod prelude;

pub use bus::{Consumer, DeliveryOptions, EventBus, EventBusOptions, ReplyCallback};
pub use codec::{Body, CloneCodec, CodecRegistry, IdentityCodec, JsonCodec, MessageCodec};
pub use envelope::{DeliveryMode, Envelope};
pub use error::{CodecError, ReplyFailure, ReplyFailureKind, SendError};
pub use headers::Headers;
