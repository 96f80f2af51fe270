//! The message envelope and its per-receiver isolation algorithm.
//!
//! An [`Envelope`] is a single addressed unit of data on the bus. The bus
//! never hands the sender's envelope to a handler directly: immediately
//! before each handler invocation it calls [`Envelope::copy_before_receive`]
//! to mint an isolated copy, so delivery through shared memory behaves as if
//! the message had been serialized and deserialized per receiver.
//!
//! # Isolation guarantee
//!
//! Mutating a copy's headers or body reference has no observable effect on
//! the template, on the producer's original value, or on any other
//! receiver's copy. The guarantee covers the envelope's own state; an
//! identity codec may still share the body referent across receivers (the
//! same-process fast path).

use crate::bus::{DeliveryOptions, EventBus, ReplyCallback};
use crate::codec::{Body, MessageCodec};
use crate::error::{CodecError, ReplyFailure, SendError};
use crate::headers::Headers;
use std::fmt;
use std::sync::Arc;

/// How many matched receivers observe a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    /// Exactly one matching receiver gets a copy.
    PointToPoint,
    /// Every matching receiver gets a copy.
    Publish,
}

impl DeliveryMode {
    /// Whether this is single-receiver delivery.
    pub fn is_point_to_point(self) -> bool {
        matches!(self, DeliveryMode::PointToPoint)
    }
}

/// A single addressed unit of data exchanged on the bus.
pub struct Envelope {
    address: String,
    reply_address: Option<String>,
    headers: Option<Headers>,
    sent_body: Option<Body>,
    received_body: Option<Body>,
    codec: Arc<dyn MessageCodec>,
    mode: DeliveryMode,
    bus: Option<EventBus>,
}

impl Envelope {
    pub(crate) fn new(
        address: String,
        reply_address: Option<String>,
        headers: Option<Headers>,
        sent_body: Option<Body>,
        codec: Arc<dyn MessageCodec>,
        mode: DeliveryMode,
        bus: Option<EventBus>,
    ) -> Self {
        Self {
            address,
            reply_address,
            headers,
            sent_body,
            received_body: None,
            codec,
            mode,
            bus,
        }
    }

    /// The immutable destination address.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Reply channel identifier, present only when the sender expects a
    /// response.
    pub fn reply_address(&self) -> Option<&str> {
        self.reply_address.as_deref()
    }

    /// The header container, lazily materialized empty on first access.
    ///
    /// Repeated calls on the same envelope yield the same container.
    pub fn headers(&mut self) -> &mut Headers {
        self.headers.get_or_insert_with(Headers::new)
    }

    /// The headers, if any exist, without materializing an empty container.
    pub fn headers_ref(&self) -> Option<&Headers> {
        self.headers.as_ref()
    }

    /// The receiver-visible body. Absent until a copy has materialized it,
    /// and absent when the sender supplied no body.
    pub fn body(&self) -> Option<&Body> {
        self.received_body.as_ref()
    }

    /// The receiver-visible body downcast to `T`.
    pub fn body_as<T: 'static>(&self) -> Option<&T> {
        self.received_body.as_ref().and_then(Body::downcast_ref)
    }

    /// Single vs fan-out receiver semantics.
    pub fn delivery_mode(&self) -> DeliveryMode {
        self.mode
    }

    /// The transform standing in for this message's serialize/deserialize
    /// round trip. Shared by reference across copies; the bus reuses it when
    /// building replies with a matching wire format.
    pub fn codec(&self) -> &Arc<dyn MessageCodec> {
        &self.codec
    }

    /// Attach a freshly generated reply channel before dispatch.
    pub(crate) fn bind_reply_address(&mut self, reply_address: String) {
        self.reply_address = Some(reply_address);
    }

    /// Produce an isolated envelope for exactly one receiver.
    ///
    /// Address, reply address, delivery mode, bus handle, and the codec
    /// reference carry over verbatim. The copy gets its own header container
    /// holding the template's entries in insertion order, and its own
    /// received body derived from the sent body via the codec. An absent
    /// sent body stays absent and the codec is not invoked.
    ///
    /// Safe to call concurrently for distinct receivers against the same
    /// template: only read-only shared state is touched.
    ///
    /// # Errors
    ///
    /// A codec transform error propagates so the bus can abort dispatch to
    /// this one receiver while other receivers' copies proceed.
    pub fn copy_before_receive(&self) -> Result<Envelope, CodecError> {
        let received_body = match &self.sent_body {
            Some(sent) => Some(self.codec.transform(sent)?),
            None => None,
        };
        Ok(Envelope {
            address: self.address.clone(),
            reply_address: self.reply_address.clone(),
            headers: self.headers.clone(),
            sent_body: self.sent_body.clone(),
            received_body,
            codec: Arc::clone(&self.codec),
            mode: self.mode,
            bus: self.bus.clone(),
        })
    }

    /// Reply to this message with default delivery options.
    ///
    /// Replying to a message that carries no reply channel is a legal,
    /// ignorable action: the call silently returns `Ok(())` without
    /// contacting the bus.
    pub fn reply(&self, body: Option<Body>) -> Result<(), SendError> {
        self.reply_with(body, DeliveryOptions::default(), None)
    }

    /// Reply to this message.
    ///
    /// Builds a new point-to-point envelope addressed at this message's
    /// reply channel, with headers from `options` and the codec resolved by
    /// the options-supplied codec name (falling back to this message's own
    /// codec), then hands it to the bus for routing. A `callback` observes
    /// the outcome of *that* reply being itself acknowledged or timing out;
    /// supplying one requires a running tokio runtime, since the bus spawns
    /// the timeout task at registration.
    ///
    /// No-op when no reply channel is bound.
    ///
    /// # Errors
    ///
    /// Returns [`SendError::Codec`] when `options` names an unregistered
    /// codec.
    pub fn reply_with(
        &self,
        body: Option<Body>,
        options: DeliveryOptions,
        callback: Option<ReplyCallback>,
    ) -> Result<(), SendError> {
        let (reply_address, bus) = match (&self.reply_address, &self.bus) {
            (Some(address), Some(bus)) => (address.clone(), bus),
            _ => return Ok(()),
        };
        let codec = match options.codec_name() {
            Some(name) => bus.codec(name)?,
            None => Arc::clone(&self.codec),
        };
        let envelope = bus.new_message(
            DeliveryMode::PointToPoint,
            reply_address,
            options.headers().cloned(),
            body,
            codec,
        );
        bus.send_reply(envelope, &options, callback);
        Ok(())
    }

    /// Signal that this recipient failed to process the message.
    ///
    /// Routes a [`ReplyFailure`] of kind `RecipientFailure` back to the
    /// sender exactly like a normal reply, with no completion callback.
    /// No-op when no reply channel is bound.
    pub fn fail(&self, code: i32, message: impl Into<String>) {
        let (reply_address, bus) = match (&self.reply_address, &self.bus) {
            (Some(address), Some(bus)) => (address.clone(), bus),
            _ => return,
        };
        let failure = ReplyFailure::recipient(code, message);
        let envelope = bus.new_message(
            DeliveryMode::PointToPoint,
            reply_address,
            None,
            Some(Body::new(failure)),
            bus.default_codec(),
        );
        bus.send_reply(envelope, &DeliveryOptions::default(), None);
    }
}

impl fmt::Debug for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Envelope")
            .field("address", &self.address)
            .field("reply_address", &self.reply_address)
            .field("mode", &self.mode)
            .field("codec", &self.codec.name())
            .field("headers", &self.headers)
            .field("has_sent_body", &self.sent_body.is_some())
            .field("has_received_body", &self.received_body.is_some())
            .finish()
    }
}
