//! Message bodies and the codec capability interface.
//!
//! A codec stands in for a serialize/deserialize round trip: it derives the
//! value a receiver observes from the value the sender supplied, without the
//! envelope ever paying for real serialization. Two families implement the
//! same interface:
//!
//! - transform-based (in-process): [`IdentityCodec`], [`CloneCodec`]
//! - deserialize-based (reference wire behavior): [`JsonCodec`], which
//!   round-trips the body through `serde_json`
//!
//! Codecs must be pure and deterministic, must never mutate their input, and
//! must be safe to invoke concurrently with the same input from multiple
//! receivers. An identity codec returning the very same referent to several
//! receivers is the documented same-process fast path, not an isolation leak.

use crate::error::CodecError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// Name under which the built-in identity codec is registered.
pub const IDENTITY_CODEC: &str = "identity";

/// Type-erased, shareable message payload.
///
/// Cloning a `Body` shares the underlying value; it never deep-copies.
/// Producing an independent value is the codec's job.
#[derive(Clone)]
pub struct Body(Arc<dyn Any + Send + Sync>);

impl Body {
    /// Wrap a value as a message body.
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self(Arc::new(value))
    }

    /// Borrow the payload as `T`, if that is what it holds.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref()
    }

    /// Whether the payload is a `T`.
    pub fn is<T: Any>(&self) -> bool {
        self.0.is::<T>()
    }

    /// Whether two bodies share the same underlying allocation.
    pub fn ptr_eq(a: &Body, b: &Body) -> bool {
        Arc::ptr_eq(&a.0, &b.0)
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Body").finish()
    }
}

/// Derives the receiver-visible body from the sender-supplied body.
///
/// `transform` must behave like a serialize/deserialize round trip: same
/// input, same output, no side effects, no mutation of `sent`.
pub trait MessageCodec: Send + Sync {
    /// Registry name for this codec.
    fn name(&self) -> &str;

    /// Produce the body a receiver will observe from the sender's body.
    fn transform(&self, sent: &Body) -> Result<Body, CodecError>;
}

impl fmt::Debug for dyn MessageCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageCodec")
            .field("name", &self.name())
            .finish()
    }
}

/// Codec that hands the sender's value to receivers by reference.
///
/// This is the same-process fast path: every receiver shares the sender's
/// allocation. Only suitable for bodies receivers treat as immutable.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityCodec;

impl MessageCodec for IdentityCodec {
    fn name(&self) -> &str {
        IDENTITY_CODEC
    }

    fn transform(&self, sent: &Body) -> Result<Body, CodecError> {
        Ok(sent.clone())
    }
}

/// Transform-based codec that gives each receiver a `Clone` of the body.
pub struct CloneCodec<T> {
    name: String,
    _marker: PhantomData<fn() -> T>,
}

impl<T> CloneCodec<T> {
    /// Create a clone codec registered under `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            _marker: PhantomData,
        }
    }
}

impl<T: Clone + Send + Sync + 'static> MessageCodec for CloneCodec<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn transform(&self, sent: &Body) -> Result<Body, CodecError> {
        let value = sent.downcast_ref::<T>().ok_or(CodecError::WrongType {
            expected: std::any::type_name::<T>(),
        })?;
        Ok(Body::new(value.clone()))
    }
}

/// Deserialize-based codec that round-trips the body through JSON.
///
/// Produces exactly the value a receiver would see after real network
/// serialization, at real serialization cost. Useful as the reference
/// behavior the transform-based codecs must be indistinguishable from.
pub struct JsonCodec<T> {
    name: String,
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonCodec<T> {
    /// Create a JSON codec registered under `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            _marker: PhantomData,
        }
    }
}

impl<T> MessageCodec for JsonCodec<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn transform(&self, sent: &Body) -> Result<Body, CodecError> {
        let value = sent.downcast_ref::<T>().ok_or(CodecError::WrongType {
            expected: std::any::type_name::<T>(),
        })?;
        let wire = serde_json::to_value(value)?;
        let decoded: T = serde_json::from_value(wire)?;
        Ok(Body::new(decoded))
    }
}

/// Lookup-by-name codec registry.
///
/// Every bus owns one, pre-loaded with [`IdentityCodec`] as the default used
/// when a message names no codec.
pub struct CodecRegistry {
    codecs: HashMap<String, Arc<dyn MessageCodec>>,
}

impl CodecRegistry {
    /// Create a registry holding the built-in identity codec.
    pub fn new() -> Self {
        let mut codecs: HashMap<String, Arc<dyn MessageCodec>> = HashMap::new();
        codecs.insert(IDENTITY_CODEC.to_string(), Arc::new(IdentityCodec));
        Self { codecs }
    }

    /// Register a codec under its own name.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::DuplicateCodec`] if the name is taken.
    pub fn register(&mut self, codec: Arc<dyn MessageCodec>) -> Result<(), CodecError> {
        let name = codec.name().to_string();
        if self.codecs.contains_key(&name) {
            return Err(CodecError::DuplicateCodec(name));
        }
        self.codecs.insert(name, codec);
        Ok(())
    }

    /// Look up a codec by name.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::UnknownCodec`] if nothing is registered under
    /// `name`.
    pub fn lookup(&self, name: &str) -> Result<Arc<dyn MessageCodec>, CodecError> {
        self.codecs
            .get(name)
            .cloned()
            .ok_or_else(|| CodecError::UnknownCodec(name.to_string()))
    }

    /// The codec used when a message names none.
    pub fn default_codec(&self) -> Arc<dyn MessageCodec> {
        self.codecs[IDENTITY_CODEC].clone()
    }
}

impl Default for CodecRegistry {
    fn default() -> Self {
        Self::new()
    }
}
