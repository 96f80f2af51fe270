//! The in-process event bus.
//!
//! [`EventBus`] owns the subscriber registry, the codec registry, and the
//! pending-reply correlation map. It routes envelopes three ways:
//!
//! - **point-to-point**: one matched consumer, round-robin when several are
//!   registered on the same address
//! - **publish**: every matched consumer
//! - **reply**: an envelope addressed at a generated reply channel completes
//!   the oneshot a requester is waiting on
//!
//! Every delivery goes through [`Envelope::copy_before_receive`] first, so
//! no two receivers ever observe shared mutable envelope state.
//!
//! # Request/reply correlation
//!
//! ```text
//! Request flow:
//!   1. Bind a generated reply address on the outgoing envelope
//!   2. Register a oneshot sender under that address
//!   3. Spawn a timeout task
//!   4. Route the envelope point-to-point
//!   5. Await the oneshot
//!
//! Reply flow:
//!   6. Recipient calls reply()/fail()
//!   7. Reply envelope routed at the reply address
//!   8. Pending entry removed, oneshot completed
//!      (failure bodies complete it with Err)
//! ```
//!
//! The bus handle is cheap to clone and safe to share across tasks; all
//! internal state sits behind short-lived locks.

use crate::codec::{Body, CodecRegistry, MessageCodec};
use crate::envelope::{DeliveryMode, Envelope};
use crate::error::{CodecError, ReplyFailure, SendError};
use crate::headers::Headers;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

/// Completion channel for observing the outcome of a reply: either the
/// counter-acknowledgment envelope, or a timeout/no-handlers/recipient
/// failure.
pub type ReplyCallback = oneshot::Sender<Result<Envelope, ReplyFailure>>;

/// Per-delivery options: headers, codec selection, reply timeout.
#[derive(Debug, Clone, Default)]
pub struct DeliveryOptions {
    headers: Option<Headers>,
    codec_name: Option<String>,
    timeout: Option<Duration>,
}

impl DeliveryOptions {
    /// Options with bus defaults for everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a header to attach to the outgoing message.
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.get_or_insert_with(Headers::new).add(key, value);
        self
    }

    /// Replace the full header set to attach to the outgoing message.
    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = Some(headers);
        self
    }

    /// Select the codec by registry name. Unset means the default codec
    /// (or, for replies, the original message's codec).
    pub fn with_codec_name(mut self, name: impl Into<String>) -> Self {
        self.codec_name = Some(name.into());
        self
    }

    /// How long to wait for a reply before failing with a timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Headers to attach, if any.
    pub fn headers(&self) -> Option<&Headers> {
        self.headers.as_ref()
    }

    /// Selected codec name, if any.
    pub fn codec_name(&self) -> Option<&str> {
        self.codec_name.as_deref()
    }

    /// Selected reply timeout, if any.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

/// Bus-wide configuration.
#[derive(Debug, Clone)]
pub struct EventBusOptions {
    default_reply_timeout: Duration,
}

impl EventBusOptions {
    /// Options with a 30 second default reply timeout.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reply timeout applied when delivery options name none.
    pub fn with_default_reply_timeout(mut self, timeout: Duration) -> Self {
        self.default_reply_timeout = timeout;
        self
    }
}

impl Default for EventBusOptions {
    fn default() -> Self {
        Self {
            default_reply_timeout: Duration::from_secs(30),
        }
    }
}

struct ConsumerHandle {
    id: u64,
    tx: mpsc::UnboundedSender<Envelope>,
}

#[derive(Default)]
struct AddressEntry {
    handles: Vec<ConsumerHandle>,
    /// Round-robin cursor for point-to-point dispatch.
    next: usize,
}

struct PendingReply {
    tx: ReplyCallback,
}

struct BusInner {
    consumers: Mutex<HashMap<String, AddressEntry>>,
    pending_replies: Mutex<HashMap<String, PendingReply>>,
    codecs: RwLock<CodecRegistry>,
    reply_seq: AtomicU64,
    consumer_seq: AtomicU64,
    default_reply_timeout: Duration,
}

/// Cheaply cloneable handle to a shared in-process event bus.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    /// Create a bus with default options.
    pub fn new() -> Self {
        Self::with_options(EventBusOptions::default())
    }

    /// Create a bus with the given options.
    pub fn with_options(options: EventBusOptions) -> Self {
        Self {
            inner: Arc::new(BusInner {
                consumers: Mutex::new(HashMap::new()),
                pending_replies: Mutex::new(HashMap::new()),
                codecs: RwLock::new(CodecRegistry::new()),
                reply_seq: AtomicU64::new(0),
                consumer_seq: AtomicU64::new(0),
                default_reply_timeout: options.default_reply_timeout,
            }),
        }
    }

    /// Register a consumer on `address`.
    ///
    /// Point-to-point sends rotate round-robin across the consumers on an
    /// address; publishes reach all of them. Each delivered envelope is an
    /// isolated copy. The consumer unregisters on drop.
    pub fn consumer(&self, address: impl Into<String>) -> Consumer {
        let address = address.into();
        let id = self.inner.consumer_seq.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner
            .consumers
            .lock()
            .unwrap()
            .entry(address.clone())
            .or_default()
            .handles
            .push(ConsumerHandle { id, tx });
        tracing::debug!(%address, id, "consumer registered");
        Consumer {
            address,
            id,
            rx,
            bus: self.clone(),
        }
    }

    /// Register a codec for lookup by name in delivery options.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::DuplicateCodec`] if the name is taken.
    pub fn register_codec(&self, codec: Arc<dyn MessageCodec>) -> Result<(), CodecError> {
        self.inner.codecs.write().unwrap().register(codec)
    }

    /// Send a message to exactly one consumer on `address`.
    ///
    /// # Errors
    ///
    /// Returns [`SendError::NoHandlers`] when no live consumer is
    /// registered, or [`SendError::Codec`] when the copy transform fails.
    pub fn send(&self, address: impl Into<String>, body: Body) -> Result<(), SendError> {
        self.send_with(address, Some(body), DeliveryOptions::default())
    }

    /// Send a message point-to-point with explicit options and an optional
    /// body.
    ///
    /// # Errors
    ///
    /// As [`EventBus::send`], plus [`SendError::Codec`] for an unknown
    /// codec name in `options`.
    pub fn send_with(
        &self,
        address: impl Into<String>,
        body: Option<Body>,
        options: DeliveryOptions,
    ) -> Result<(), SendError> {
        let envelope = self.create_message(
            true,
            address.into(),
            options.headers().cloned(),
            body,
            options.codec_name(),
        )?;
        self.route(envelope)
    }

    /// Publish a message to every consumer on `address`.
    ///
    /// Publishing to an address with no consumers is a normal outcome, not
    /// an error.
    ///
    /// # Errors
    ///
    /// Returns [`SendError::Codec`] for an unknown codec name.
    pub fn publish(&self, address: impl Into<String>, body: Body) -> Result<(), SendError> {
        self.publish_with(address, Some(body), DeliveryOptions::default())
    }

    /// Publish with explicit options and an optional body.
    ///
    /// # Errors
    ///
    /// Returns [`SendError::Codec`] for an unknown codec name.
    pub fn publish_with(
        &self,
        address: impl Into<String>,
        body: Option<Body>,
        options: DeliveryOptions,
    ) -> Result<(), SendError> {
        let envelope = self.create_message(
            false,
            address.into(),
            options.headers().cloned(),
            body,
            options.codec_name(),
        )?;
        self.route(envelope)
    }

    /// Send a message and await the reply.
    ///
    /// Binds a generated reply channel on the outgoing envelope and resolves
    /// once the recipient replies, fails, or the timeout elapses.
    ///
    /// # Errors
    ///
    /// Returns [`SendError::Failure`] carrying the [`ReplyFailure`]
    /// (recipient failure, timeout, or no handlers), or [`SendError::Codec`]
    /// for an unknown codec name.
    pub async fn request(
        &self,
        address: impl Into<String>,
        body: Body,
    ) -> Result<Envelope, SendError> {
        self.request_with(address, Some(body), DeliveryOptions::default())
            .await
    }

    /// Send a request with explicit options and await the reply.
    ///
    /// # Errors
    ///
    /// As [`EventBus::request`].
    pub async fn request_with(
        &self,
        address: impl Into<String>,
        body: Option<Body>,
        options: DeliveryOptions,
    ) -> Result<Envelope, SendError> {
        let address = address.into();
        let timeout = options
            .timeout()
            .unwrap_or(self.inner.default_reply_timeout);
        let mut envelope = self.create_message(
            true,
            address,
            options.headers().cloned(),
            body,
            options.codec_name(),
        )?;

        let (tx, rx) = oneshot::channel();
        let reply_address = self.generate_reply_address();
        self.register_pending(reply_address.clone(), tx, timeout);
        envelope.bind_reply_address(reply_address.clone());

        if let Err(error) = self.route(envelope) {
            match error {
                // The pending entry was already completed with a
                // NoHandlers failure; surface it through the channel below.
                SendError::NoHandlers(_) => {}
                other => {
                    self.inner
                        .pending_replies
                        .lock()
                        .unwrap()
                        .remove(&reply_address);
                    return Err(other);
                }
            }
        }

        match rx.await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(failure)) => Err(SendError::Failure(failure)),
            // All pending senders fire before being dropped; a closed
            // channel can only mean the bus went away mid-request.
            Err(_) => Err(SendError::Failure(ReplyFailure::timeout(timeout))),
        }
    }

    /// Factory for reply and failure envelopes. `None` for `headers` or
    /// `codec_name` means "use defaults".
    pub(crate) fn create_message(
        &self,
        send: bool,
        address: String,
        headers: Option<Headers>,
        body: Option<Body>,
        codec_name: Option<&str>,
    ) -> Result<Envelope, SendError> {
        let codec = match codec_name {
            Some(name) => self.codec(name)?,
            None => self.default_codec(),
        };
        let mode = if send {
            DeliveryMode::PointToPoint
        } else {
            DeliveryMode::Publish
        };
        Ok(self.new_message(mode, address, headers, body, codec))
    }

    pub(crate) fn new_message(
        &self,
        mode: DeliveryMode,
        address: String,
        headers: Option<Headers>,
        body: Option<Body>,
        codec: Arc<dyn MessageCodec>,
    ) -> Envelope {
        Envelope::new(address, None, headers, body, codec, mode, Some(self.clone()))
    }

    /// Route a constructed reply envelope. A callback, when given, is
    /// registered under a freshly bound reply address first so the
    /// counter-acknowledgment (or its timeout) reaches it.
    pub(crate) fn send_reply(
        &self,
        mut envelope: Envelope,
        options: &DeliveryOptions,
        callback: Option<ReplyCallback>,
    ) {
        if let Some(callback) = callback {
            let reply_address = self.generate_reply_address();
            let timeout = options
                .timeout()
                .unwrap_or(self.inner.default_reply_timeout);
            self.register_pending(reply_address.clone(), callback, timeout);
            envelope.bind_reply_address(reply_address);
        }
        if let Err(error) = self.route(envelope) {
            tracing::warn!(%error, "reply delivery failed");
        }
    }

    pub(crate) fn codec(&self, name: &str) -> Result<Arc<dyn MessageCodec>, CodecError> {
        self.inner.codecs.read().unwrap().lookup(name)
    }

    pub(crate) fn default_codec(&self) -> Arc<dyn MessageCodec> {
        self.inner.codecs.read().unwrap().default_codec()
    }

    fn route(&self, envelope: Envelope) -> Result<(), SendError> {
        match envelope.delivery_mode() {
            DeliveryMode::PointToPoint => self.route_point_to_point(envelope),
            DeliveryMode::Publish => self.route_publish(envelope),
        }
    }

    fn route_point_to_point(&self, envelope: Envelope) -> Result<(), SendError> {
        if self.try_complete_reply(&envelope)? {
            return Ok(());
        }
        while let Some((id, tx)) = self.next_consumer(envelope.address()) {
            let copy = envelope.copy_before_receive()?;
            match tx.send(copy) {
                Ok(()) => {
                    tracing::debug!(address = %envelope.address(), "delivered point-to-point");
                    return Ok(());
                }
                // Receiver dropped without unregistering; prune and retry.
                Err(_) => self.remove_consumer(envelope.address(), id),
            }
        }
        self.fail_pending(&envelope, ReplyFailure::no_handlers(envelope.address()));
        Err(SendError::NoHandlers(envelope.address().to_string()))
    }

    fn route_publish(&self, envelope: Envelope) -> Result<(), SendError> {
        let targets: Vec<(u64, mpsc::UnboundedSender<Envelope>)> = {
            let consumers = self.inner.consumers.lock().unwrap();
            match consumers.get(envelope.address()) {
                Some(entry) => entry
                    .handles
                    .iter()
                    .map(|handle| (handle.id, handle.tx.clone()))
                    .collect(),
                None => Vec::new(),
            }
        };
        tracing::debug!(
            address = %envelope.address(),
            receivers = targets.len(),
            "publishing"
        );
        for (id, tx) in targets {
            match envelope.copy_before_receive() {
                Ok(copy) => {
                    if tx.send(copy).is_err() {
                        self.remove_consumer(envelope.address(), id);
                    }
                }
                // Aborts dispatch to this one receiver only.
                Err(error) => {
                    tracing::warn!(
                        address = %envelope.address(),
                        consumer = id,
                        %error,
                        "copy failed, dropping delivery"
                    );
                }
            }
        }
        Ok(())
    }

    /// Complete a pending request if `envelope` targets a reply address.
    /// Returns true when the envelope was consumed as a reply.
    fn try_complete_reply(&self, envelope: &Envelope) -> Result<bool, SendError> {
        {
            let pending = self.inner.pending_replies.lock().unwrap();
            if !pending.contains_key(envelope.address()) {
                return Ok(false);
            }
        }
        // Transform outside the lock; on failure the entry stays pending
        // and the requester's timeout fires.
        let copy = envelope.copy_before_receive()?;
        let entry = self
            .inner
            .pending_replies
            .lock()
            .unwrap()
            .remove(envelope.address());
        let Some(entry) = entry else {
            // Raced with a timeout or a duplicate reply.
            tracing::debug!(address = %envelope.address(), "late reply dropped");
            return Ok(true);
        };
        let outcome = match copy.body().and_then(Body::downcast_ref::<ReplyFailure>) {
            Some(failure) => Err(failure.clone()),
            None => Ok(copy),
        };
        let _ = entry.tx.send(outcome);
        Ok(true)
    }

    fn next_consumer(&self, address: &str) -> Option<(u64, mpsc::UnboundedSender<Envelope>)> {
        let mut consumers = self.inner.consumers.lock().unwrap();
        let entry = consumers.get_mut(address)?;
        if entry.handles.is_empty() {
            return None;
        }
        let index = entry.next % entry.handles.len();
        entry.next = entry.next.wrapping_add(1);
        let handle = &entry.handles[index];
        Some((handle.id, handle.tx.clone()))
    }

    fn remove_consumer(&self, address: &str, id: u64) {
        let mut consumers = self.inner.consumers.lock().unwrap();
        if let Some(entry) = consumers.get_mut(address) {
            entry.handles.retain(|handle| handle.id != id);
            if entry.handles.is_empty() {
                consumers.remove(address);
            }
        }
    }

    fn generate_reply_address(&self) -> String {
        format!(
            "__reply.{}",
            self.inner.reply_seq.fetch_add(1, Ordering::Relaxed)
        )
    }

    /// Store a pending reply and spawn its timeout task. Requires a running
    /// tokio runtime.
    fn register_pending(&self, reply_address: String, tx: ReplyCallback, timeout: Duration) {
        self.inner
            .pending_replies
            .lock()
            .unwrap()
            .insert(reply_address.clone(), PendingReply { tx });
        let bus = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let expired = bus
                .inner
                .pending_replies
                .lock()
                .unwrap()
                .remove(&reply_address);
            if let Some(pending) = expired {
                tracing::debug!(address = %reply_address, "reply timed out");
                let _ = pending.tx.send(Err(ReplyFailure::timeout(timeout)));
            }
        });
    }

    /// Fail the pending entry bound to this envelope's reply address, if
    /// one exists (e.g. a request that found no handlers).
    fn fail_pending(&self, envelope: &Envelope, failure: ReplyFailure) {
        let Some(reply_address) = envelope.reply_address() else {
            return;
        };
        let entry = self
            .inner
            .pending_replies
            .lock()
            .unwrap()
            .remove(reply_address);
        if let Some(pending) = entry {
            let _ = pending.tx.send(Err(failure));
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// A registered receiver of messages on one address.
///
/// Each call to [`Consumer::next`] yields an isolated envelope copy. The
/// consumer unregisters itself on drop.
pub struct Consumer {
    address: String,
    id: u64,
    rx: mpsc::UnboundedReceiver<Envelope>,
    bus: EventBus,
}

impl Consumer {
    /// The address this consumer is registered on.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Await the next delivered envelope. Resolves to `None` once the
    /// consumer is unregistered and its queue is drained.
    pub async fn next(&mut self) -> Option<Envelope> {
        self.rx.recv().await
    }

    /// Stop receiving new messages. Already-queued envelopes can still be
    /// drained through [`Consumer::next`].
    pub fn unregister(&mut self) {
        self.bus.remove_consumer(&self.address, self.id);
        self.rx.close();
    }
}

impl Drop for Consumer {
    fn drop(&mut self) {
        self.bus.remove_consumer(&self.address, self.id);
    }
}
