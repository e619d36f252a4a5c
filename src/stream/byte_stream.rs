//! The ByteStream abstraction.

use std::fmt;
use std::future::{ready, Future};
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use futures_util::stream::{self, Stream, StreamExt, TryStreamExt};
use tokio::sync::mpsc;

use crate::stream::{aggregate, Buffer, StreamError};

type BufferStream = Pin<Box<dyn Stream<Item = Result<Buffer, StreamError>> + Send>>;
type EndHandler = Box<dyn FnOnce(Option<&StreamError>) + Send>;
type CancelHandler = Box<dyn FnOnce() + Send>;

/// A lazy, single-consumer sequence of [`Buffer`]s.
///
/// Nothing is produced until the stream is polled. The stream is terminal
/// after it yields `None` or an error, and keeps yielding `None` afterwards.
/// Dropping it before that point cancels every upstream stage.
pub struct ByteStream {
    inner: BufferStream,
    terminated: bool,
}

impl ByteStream {
    pub fn from_stream<S>(stream: S) -> Self
    where
        S: Stream<Item = Result<Buffer, StreamError>> + Send + 'static,
    {
        Self {
            inner: Box::pin(stream),
            terminated: false,
        }
    }

    pub fn from_buffers(buffers: Vec<Buffer>) -> Self {
        Self::from_stream(stream::iter(buffers.into_iter().map(Ok)))
    }

    pub fn empty() -> Self {
        Self::from_stream(stream::empty())
    }

    /// A stream that fails immediately.
    pub fn error(cause: StreamError) -> Self {
        Self::from_stream(stream::once(ready(Err(cause))))
    }

    /// Apply `mapping` to every buffer.
    ///
    /// Ownership moves through the mapping: a buffer the mapping does not
    /// return is released, a buffer it returns unchanged is not touched.
    pub fn map<F>(self, mapping: F) -> ByteStream
    where
        F: FnMut(Buffer) -> Buffer + Send + 'static,
    {
        ByteStream::from_stream(self.map_ok(mapping))
    }

    /// Consume and release every buffer, keeping only the terminal signal.
    pub fn discard(self) -> ByteStream {
        ByteStream::from_stream(self.filter_map(|item| {
            ready(match item {
                Ok(buffer) => {
                    drop(buffer);
                    None
                }
                Err(cause) => Some(Err(cause)),
            })
        }))
    }

    /// Continue with `other` once this stream completes without error.
    ///
    /// `other` is not polled before this stream has completed.
    pub fn concat(self, other: ByteStream) -> ByteStream {
        ByteStream::from_stream(Concat {
            first: Some(self),
            second: Some(other),
        })
    }

    /// Discard the remaining content of this stream and switch to `other`.
    pub fn replace_with(self, other: ByteStream) -> ByteStream {
        self.discard().concat(other)
    }

    /// Run `handler` once when the stream completes or fails.
    pub fn do_on_end<F>(self, handler: F) -> ByteStream
    where
        F: FnOnce(Option<&StreamError>) + Send + 'static,
    {
        ByteStream::from_stream(OnEnd {
            inner: self,
            handler: Some(Box::new(handler)),
        })
    }

    /// Run `handler` once if the stream is dropped before a terminal state.
    pub fn do_on_cancel<F>(self, handler: F) -> ByteStream
    where
        F: FnOnce() + Send + 'static,
    {
        ByteStream::from_stream(OnCancel {
            inner: self,
            handler: Some(Box::new(handler)),
        })
    }

    /// Collect the whole stream into one buffer of at most `max_bytes`.
    pub fn aggregate(self, max_bytes: usize) -> impl Future<Output = Result<Buffer, StreamError>> + Send {
        aggregate::aggregate(self, max_bytes)
    }

    /// Bridge to a consumer that cannot issue demand.
    ///
    /// A task drains this stream as fast as it produces and queues the
    /// buffers, so delivery becomes "as available" instead of "on demand".
    /// Only for legacy sinks; must be called from within a tokio runtime.
    pub fn without_backpressure(self) -> ByteStream {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut source = self;
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    item = source.next() => match item {
                        Some(item) => {
                            if tx.send(item).is_err() {
                                break;
                            }
                        }
                        None => break,
                    },
                    _ = tx.closed() => break,
                }
            }
        });
        ByteStream::from_stream(stream::poll_fn(move |cx| rx.poll_recv(cx)))
    }

    /// True once a terminal signal has been delivered.
    pub fn is_terminated(&self) -> bool {
        self.terminated
    }
}

impl Stream for ByteStream {
    type Item = Result<Buffer, StreamError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.terminated {
            return Poll::Ready(None);
        }
        let item = ready!(self.inner.as_mut().poll_next(cx));
        if !matches!(item, Some(Ok(_))) {
            self.terminated = true;
        }
        Poll::Ready(item)
    }
}

impl Default for ByteStream {
    fn default() -> Self {
        Self::empty()
    }
}

impl From<Buffer> for ByteStream {
    fn from(buffer: Buffer) -> Self {
        ByteStream::from_buffers(vec![buffer])
    }
}

impl From<&str> for ByteStream {
    fn from(text: &str) -> Self {
        ByteStream::from(Buffer::from(text))
    }
}

impl fmt::Debug for ByteStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ByteStream")
            .field("terminated", &self.terminated)
            .finish()
    }
}

struct Concat {
    first: Option<ByteStream>,
    second: Option<ByteStream>,
}

impl Stream for Concat {
    type Item = Result<Buffer, StreamError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        if let Some(first) = this.first.as_mut() {
            match ready!(first.poll_next_unpin(cx)) {
                Some(Ok(buffer)) => return Poll::Ready(Some(Ok(buffer))),
                Some(Err(cause)) => {
                    this.first = None;
                    this.second = None;
                    return Poll::Ready(Some(Err(cause)));
                }
                None => this.first = None,
            }
        }
        match this.second.as_mut() {
            Some(second) => second.poll_next_unpin(cx),
            None => Poll::Ready(None),
        }
    }
}

struct OnEnd {
    inner: ByteStream,
    handler: Option<EndHandler>,
}

impl Stream for OnEnd {
    type Item = Result<Buffer, StreamError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let item = ready!(self.inner.poll_next_unpin(cx));
        match &item {
            Some(Ok(_)) => {}
            Some(Err(cause)) => {
                if let Some(handler) = self.handler.take() {
                    handler(Some(cause));
                }
            }
            None => {
                if let Some(handler) = self.handler.take() {
                    handler(None);
                }
            }
        }
        Poll::Ready(item)
    }
}

struct OnCancel {
    inner: ByteStream,
    handler: Option<CancelHandler>,
}

impl Stream for OnCancel {
    type Item = Result<Buffer, StreamError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let item = ready!(self.inner.poll_next_unpin(cx));
        if !matches!(item, Some(Ok(_))) {
            self.handler = None;
        }
        Poll::Ready(item)
    }
}

impl Drop for OnCancel {
    fn drop(&mut self) {
        if let Some(handler) = self.handler.take() {
            handler();
        }
    }
}
