//! Streaming body subsystem.
//!
//! # Data Flow
//! ```text
//! Network read (transport layer)
//!     → publisher.rs (ContentSink pushes Buffers only against demand)
//!     → byte_stream.rs (ByteStream: map / discard / concat / replace_with,
//!                       do_on_end / do_on_cancel hooks)
//!     → aggregate.rs (optional: collect into one bounded Buffer)
//!     → consumer polls; each poll is a request for one more Buffer
//! ```
//!
//! # Design Decisions
//! - Buffers are move-only owners; retain is an explicit clone, release is drop
//! - Pull-based: the consumer's poll is the only source of demand
//! - Cancellation is dropping the stream, and it propagates to every upstream
//!   adapter in drop order
//! - Terminal signals (end, error) are mutually exclusive and fire once

pub mod aggregate;
pub mod buffer;
pub mod byte_stream;
pub mod publisher;

use std::sync::Arc;
use thiserror::Error;

pub use buffer::{Buffer, BufferProbe};
pub use byte_stream::ByteStream;
pub use publisher::{content_channel, ContentPublisher, ContentSink};

/// Boxed error type carried from lower layers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Terminal error of a [`ByteStream`].
#[derive(Debug, Clone, Error)]
pub enum StreamError {
    /// Aggregation exceeded its byte budget.
    #[error("maximum content size exceeded: limit={limit} bytes")]
    ContentOverflow { limit: usize },

    /// A second consumer tried to attach to a single-subscriber source.
    #[error("content stream already has a subscriber")]
    AlreadySubscribed,

    /// The consumer went away before the producer finished.
    #[error("content stream cancelled")]
    Cancelled,

    /// The producer went away before signalling completion.
    #[error("content stream truncated: producer dropped before completion")]
    Truncated,

    /// Error raised by the transport that produces the content.
    #[error("upstream content error: {0}")]
    Upstream(Arc<dyn std::error::Error + Send + Sync>),
}

impl StreamError {
    pub fn upstream(cause: impl Into<BoxError>) -> Self {
        StreamError::Upstream(Arc::from(cause.into()))
    }
}
