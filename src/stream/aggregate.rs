//! Bounded aggregation of a [`ByteStream`] into one [`Buffer`].

use bytes::BytesMut;
use futures_util::StreamExt;
use tracing::debug;

use crate::stream::{Buffer, ByteStream, StreamError};

/// Collect every buffer of `stream` into a single buffer.
///
/// Exceeding `max_bytes` fails with [`StreamError::ContentOverflow`]: every
/// buffer collected so far is released and the stream is dropped, which
/// cancels the producer. An empty stream yields an empty buffer.
pub async fn aggregate(mut stream: ByteStream, max_bytes: usize) -> Result<Buffer, StreamError> {
    let mut parts: Vec<Buffer> = Vec::new();
    let mut total = 0usize;

    while let Some(item) = stream.next().await {
        let buffer = item?;
        total += buffer.size();
        if total > max_bytes {
            debug!(limit = max_bytes, received = total, "Content aggregation overflow");
            return Err(StreamError::ContentOverflow { limit: max_bytes });
        }
        parts.push(buffer);
    }

    if parts.len() == 1 {
        if let Some(only) = parts.pop() {
            return Ok(only);
        }
    }

    let mut joined = BytesMut::with_capacity(total);
    for part in parts {
        joined.extend_from_slice(part.content());
    }
    Ok(Buffer::new(joined.freeze()))
}
