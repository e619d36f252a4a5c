//! Adapters between hyper bodies and [`ByteStream`].
//!
//! Both directions are pull-based: a frame is read from the wire only when
//! the consumer polls for the next buffer.

use std::pin::Pin;
use std::task::{ready, Context, Poll};

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use hyper::body::{Body, Frame, SizeHint};

use crate::stream::{BoxError, Buffer, ByteStream, StreamError};

/// A [`ByteStream`] presented as a hyper body.
pub struct ByteStreamBody {
    stream: ByteStream,
}

impl ByteStreamBody {
    pub fn new(stream: ByteStream) -> Self {
        Self { stream }
    }
}

impl From<ByteStream> for ByteStreamBody {
    fn from(stream: ByteStream) -> Self {
        Self::new(stream)
    }
}

impl Body for ByteStreamBody {
    type Data = Bytes;
    type Error = StreamError;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        match ready!(self.stream.poll_next_unpin(cx)) {
            Some(Ok(buffer)) => Poll::Ready(Some(Ok(Frame::data(buffer.into_bytes())))),
            Some(Err(e)) => Poll::Ready(Some(Err(e))),
            None => Poll::Ready(None),
        }
    }

    fn is_end_stream(&self) -> bool {
        self.stream.is_terminated()
    }

    fn size_hint(&self) -> SizeHint {
        SizeHint::default()
    }
}

/// View any hyper body as a [`ByteStream`]. Trailers are ignored.
pub fn from_body<B>(body: B) -> ByteStream
where
    B: Body<Data = Bytes> + Send + 'static,
    B::Error: Into<BoxError>,
{
    ByteStream::from_stream(BodyContent { body: Box::pin(body) })
}

struct BodyContent<B> {
    body: Pin<Box<B>>,
}

impl<B> Stream for BodyContent<B>
where
    B: Body<Data = Bytes>,
    B::Error: Into<BoxError>,
{
    type Item = Result<Buffer, StreamError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            if self.body.is_end_stream() {
                return Poll::Ready(None);
            }
            match ready!(self.body.as_mut().poll_frame(cx)) {
                None => return Poll::Ready(None),
                Some(Err(e)) => return Poll::Ready(Some(Err(StreamError::upstream(e)))),
                Some(Ok(frame)) => {
                    if let Ok(data) = frame.into_data() {
                        if !data.is_empty() {
                            return Poll::Ready(Some(Ok(Buffer::new(data))));
                        }
                    }
                }
            }
        }
    }
}
