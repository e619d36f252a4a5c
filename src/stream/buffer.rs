//! Reference-counted byte chunks.
//!
//! A [`Buffer`] is an immutable view over a contiguous byte range. Every
//! holder owns one reference: [`Buffer::retain`] hands out another one and
//! dropping a `Buffer` releases it. Once the last reference is gone the
//! content is unreachable, and because `Buffer` is move-only per holder a
//! released buffer cannot be touched again.

use std::fmt;
use std::sync::{Arc, Weak};
use bytes::Bytes;

/// A reference-counted chunk of bytes.
pub struct Buffer {
    content: Arc<Bytes>,
}

impl Buffer {
    /// Wrap already-owned bytes.
    pub fn new(bytes: Bytes) -> Self {
        Self {
            content: Arc::new(bytes),
        }
    }

    /// Copy a slice into a new buffer.
    pub fn copy_from(data: &[u8]) -> Self {
        Self::new(Bytes::copy_from_slice(data))
    }

    pub fn from_static(data: &'static [u8]) -> Self {
        Self::new(Bytes::from_static(data))
    }

    /// A zero-length buffer.
    pub fn empty() -> Self {
        Self::new(Bytes::new())
    }

    /// Take another reference to the same content.
    pub fn retain(&self) -> Buffer {
        Buffer {
            content: Arc::clone(&self.content),
        }
    }

    /// Number of live references to this content.
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.content)
    }

    /// An observer that does not keep the content alive.
    pub fn probe(&self) -> BufferProbe {
        BufferProbe {
            content: Arc::downgrade(&self.content),
        }
    }

    pub fn size(&self) -> usize {
        self.content.len()
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }

    pub fn content(&self) -> &[u8] {
        &self.content
    }

    /// A slice of the content that aliases the same storage.
    ///
    /// The returned buffer is a separate owner: releasing it does not
    /// affect this one.
    pub fn slice(&self, range: std::ops::Range<usize>) -> Buffer {
        Buffer::new(self.content.slice(range))
    }

    /// Release this reference and hand the bytes to the wire layer.
    pub fn into_bytes(self) -> Bytes {
        match Arc::try_unwrap(self.content) {
            Ok(bytes) => bytes,
            Err(shared) => Bytes::clone(&shared),
        }
    }
}

impl From<Bytes> for Buffer {
    fn from(bytes: Bytes) -> Self {
        Buffer::new(bytes)
    }
}

impl From<&str> for Buffer {
    fn from(text: &str) -> Self {
        Buffer::copy_from(text.as_bytes())
    }
}

impl From<String> for Buffer {
    fn from(text: String) -> Self {
        Buffer::new(Bytes::from(text))
    }
}

impl From<Vec<u8>> for Buffer {
    fn from(data: Vec<u8>) -> Self {
        Buffer::new(Bytes::from(data))
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("size", &self.size())
            .field("ref_count", &self.ref_count())
            .finish()
    }
}

/// Weak observer of a buffer's content, used to prove release.
#[derive(Debug, Clone)]
pub struct BufferProbe {
    content: Weak<Bytes>,
}

impl BufferProbe {
    /// Live references remaining.
    pub fn ref_count(&self) -> usize {
        self.content.strong_count()
    }

    pub fn is_released(&self) -> bool {
        self.ref_count() == 0
    }
}
