//! Convenience re-exports for common busline usage.
//!
//! ```rust
//! use busline::prelude::*;
//! ```

pub use crate::bus::{Consumer, DeliveryOptions, EventBus, EventBusOptions, ReplyCallback};
pub use crate::codec::{Body, CloneCodec, IdentityCodec, JsonCodec, MessageCodec};
pub use crate::envelope::{DeliveryMode, Envelope};
pub use crate::error::{CodecError, ReplyFailure, ReplyFailureKind, SendError};
pub use crate::headers::Headers;
