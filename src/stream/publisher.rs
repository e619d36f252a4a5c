//! Demand-driven content source.
//!
//! # Responsibilities
//! - Bridge a push-style producer (a network read loop) into a [`ByteStream`]
//! - Deliver buffers only when the consumer has asked for one
//! - Allow exactly one consumer
//! - Release queued buffers when the consumer goes away, or when every
//!   publisher handle is dropped before anyone subscribed

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

use futures_util::Stream;
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::stream::{Buffer, ByteStream, StreamError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Unsubscribed,
    Subscribed,
    Cancelled,
    Finished,
}

struct State {
    phase: Phase,
    queue: VecDeque<Buffer>,
    demand: usize,
    terminal: Option<Result<(), StreamError>>,
    consumer: Option<Waker>,
}

impl State {
    fn wake_consumer(&mut self) {
        if let Some(waker) = self.consumer.take() {
            waker.wake();
        }
    }
}

struct Shared {
    state: Mutex<State>,
    producer: Notify,
    publishers: AtomicUsize,
}

impl Shared {
    /// Abandon the content; the producer sees `Cancelled` from now on.
    fn cancel(&self) {
        let released = {
            let mut state = self.state.lock();
            state.phase = Phase::Cancelled;
            state.demand = 0;
            state.consumer = None;
            std::mem::take(&mut state.queue)
        };
        drop(released);
        self.producer.notify_waiters();
    }
}

/// Create a connected producer/consumer pair.
pub fn content_channel() -> (ContentSink, ContentPublisher) {
    let shared = Arc::new(Shared {
        state: Mutex::new(State {
            phase: Phase::Unsubscribed,
            queue: VecDeque::new(),
            demand: 0,
            terminal: None,
            consumer: None,
        }),
        producer: Notify::new(),
        publishers: AtomicUsize::new(1),
    });
    (
        ContentSink {
            shared: shared.clone(),
        },
        ContentPublisher { shared },
    )
}

/// Consumer side: hands out the single [`ByteStream`] view of the content.
pub struct ContentPublisher {
    shared: Arc<Shared>,
}

impl Clone for ContentPublisher {
    fn clone(&self) -> Self {
        self.shared.publishers.fetch_add(1, Ordering::AcqRel);
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl Drop for ContentPublisher {
    fn drop(&mut self) {
        if self.shared.publishers.fetch_sub(1, Ordering::AcqRel) != 1 {
            return;
        }
        if self.shared.state.lock().phase == Phase::Unsubscribed {
            self.shared.cancel();
        }
    }
}

impl ContentPublisher {
    /// Attach the consumer.
    ///
    /// Fails with [`StreamError::AlreadySubscribed`] on every call after the
    /// first one.
    pub fn subscribe(&self) -> Result<ByteStream, StreamError> {
        let mut state = self.shared.state.lock();
        if state.phase != Phase::Unsubscribed {
            return Err(StreamError::AlreadySubscribed);
        }
        state.phase = Phase::Subscribed;
        Ok(ByteStream::from_stream(Subscription {
            shared: self.shared.clone(),
        }))
    }
}

/// Producer side.
pub struct ContentSink {
    shared: Arc<Shared>,
}

impl ContentSink {
    /// Offer one buffer, waiting until the consumer has demand for it.
    ///
    /// If the consumer has gone away the buffer is released and
    /// [`StreamError::Cancelled`] is returned.
    pub async fn send(&self, buffer: Buffer) -> Result<(), StreamError> {
        loop {
            let notified = self.shared.producer.notified();
            {
                let mut state = self.shared.state.lock();
                match state.phase {
                    Phase::Cancelled | Phase::Finished => return Err(StreamError::Cancelled),
                    _ if state.terminal.is_some() => return Err(StreamError::Cancelled),
                    _ => {}
                }
                if state.demand > 0 {
                    state.demand -= 1;
                    state.queue.push_back(buffer);
                    state.wake_consumer();
                    return Ok(());
                }
            }
            notified.await;
        }
    }

    /// Queue a buffer regardless of demand.
    ///
    /// For producers that cannot wait, such as legacy callback sources.
    pub fn push_eager(&self, buffer: Buffer) -> Result<(), StreamError> {
        let mut state = self.shared.state.lock();
        if matches!(state.phase, Phase::Cancelled | Phase::Finished) || state.terminal.is_some() {
            return Err(StreamError::Cancelled);
        }
        state.demand = state.demand.saturating_sub(1);
        state.queue.push_back(buffer);
        state.wake_consumer();
        Ok(())
    }

    /// Signal successful end of content.
    pub fn complete(self) {
        self.finish(Ok(()));
    }

    /// Signal failure. Buffers already queued are still delivered first.
    pub fn fail(self, cause: StreamError) {
        self.finish(Err(cause));
    }

    /// True once the consumer has dropped its stream.
    pub fn is_cancelled(&self) -> bool {
        self.shared.state.lock().phase == Phase::Cancelled
    }

    /// Buffers the consumer has asked for and not yet received.
    pub fn demand(&self) -> usize {
        self.shared.state.lock().demand
    }

    fn finish(&self, outcome: Result<(), StreamError>) {
        let mut state = self.shared.state.lock();
        if state.terminal.is_none() && matches!(state.phase, Phase::Unsubscribed | Phase::Subscribed) {
            state.terminal = Some(outcome);
            state.wake_consumer();
        }
    }
}

impl Drop for ContentSink {
    fn drop(&mut self) {
        self.finish(Err(StreamError::Truncated));
    }
}

struct Subscription {
    shared: Arc<Shared>,
}

impl Stream for Subscription {
    type Item = Result<Buffer, StreamError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut state = self.shared.state.lock();
        if let Some(buffer) = state.queue.pop_front() {
            return Poll::Ready(Some(Ok(buffer)));
        }
        if state.phase == Phase::Finished {
            return Poll::Ready(None);
        }
        match state.terminal.take() {
            Some(Ok(())) => {
                state.phase = Phase::Finished;
                Poll::Ready(None)
            }
            Some(Err(cause)) => {
                state.phase = Phase::Finished;
                Poll::Ready(Some(Err(cause)))
            }
            None => {
                if state.demand == 0 {
                    state.demand = 1;
                    self.shared.producer.notify_waiters();
                }
                state.consumer = Some(cx.waker().clone());
                Poll::Pending
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if self.shared.state.lock().phase == Phase::Subscribed {
            self.shared.cancel();
        }
    }
}
