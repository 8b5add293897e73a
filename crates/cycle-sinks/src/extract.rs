//! Flattening a stream of sink bundles into one bundle of streams.
//!
//! Every requested channel gets its own output stream. Whichever channel is
//! polled pumps the shared outer stream and queues each emitted bundle's
//! streams on their channels. A channel forwards its current stream until
//! that stream has nothing ready and a newer one is queued, then switches
//! (switch-latest).

use std::collections::{HashMap, VecDeque};
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use futures_util::stream::{Stream, StreamExt};

use crate::sinks::{SinkStream, Sinks, unique_channels};
use crate::wake::WakerSet;

/// Extracts `channels` from a stream emitting whole bundles.
///
/// Each output channel forwards events from the stream found at that channel
/// in the latest emitted bundle. Events the previous stream already had
/// ready are forwarded before switching. Bundles that lack the channel leave
/// the current stream in place. A channel ends once the outer stream has
/// ended and its current stream has ended too.
pub fn extract_sinks<T, S, C>(bundles: S, channels: C) -> Sinks<T>
where
    T: Send + 'static,
    S: Stream<Item = Sinks<T>> + Send + 'static,
    C: IntoIterator,
    C::Item: Into<String>,
{
    let channels = unique_channels(channels);
    let shared = Arc::new(Mutex::new(Shared {
        outer: Some(bundles.boxed()),
        queued: channels
            .iter()
            .map(|c| (c.clone(), VecDeque::new()))
            .collect(),
    }));
    let wakers = Arc::new(WakerSet::new());

    channels
        .into_iter()
        .map(|channel| {
            let stream = Extracted {
                channel: channel.clone(),
                shared: Arc::clone(&shared),
                wakers: Arc::clone(&wakers),
                current: None,
            }
            .boxed();
            (channel, stream)
        })
        .collect()
}

struct Shared<T> {
    /// `None` once the outer stream has ended.
    outer: Option<SinkStream<Sinks<T>>>,
    /// Streams handed to each live channel, oldest first.
    queued: HashMap<String, VecDeque<SinkStream<T>>>,
}

impl<T> Shared<T> {
    /// Drains every bundle the outer stream has ready.
    fn pump(&mut self, cx: &mut Context<'_>) {
        while let Some(outer) = self.outer.as_mut() {
            match outer.poll_next_unpin(cx) {
                Poll::Ready(Some(mut bundle)) => {
                    for (channel, queue) in &mut self.queued {
                        if let Some(stream) = bundle.take(channel) {
                            tracing::trace!(channel = %channel, "queued new channel stream");
                            queue.push_back(stream);
                        }
                    }
                }
                Poll::Ready(None) => {
                    tracing::trace!("bundle stream ended");
                    self.outer = None;
                }
                Poll::Pending => break,
            }
        }
    }
}

/// Output stream for a single extracted channel.
struct Extracted<T> {
    channel: String,
    shared: Arc<Mutex<Shared<T>>>,
    wakers: Arc<WakerSet<String>>,
    current: Option<SinkStream<T>>,
}

impl<T> Unpin for Extracted<T> {}

impl<T> Extracted<T> {
    fn lock(&self) -> MutexGuard<'_, Shared<T>> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Pumps the outer stream and pops the oldest stream queued for this
    /// channel. Also reports whether the outer stream has ended.
    fn next_queued(&self, cx: &Context<'_>) -> (Option<SinkStream<T>>, bool) {
        let mut shared = self.lock();
        self.wakers.register(&self.channel, cx.waker());
        let outer_waker = self.wakers.waker();
        shared.pump(&mut Context::from_waker(&outer_waker));

        let next = shared
            .queued
            .get_mut(&self.channel)
            .and_then(VecDeque::pop_front);
        (next, shared.outer.is_none())
    }
}

impl<T> Stream for Extracted<T> {
    type Item = T;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        loop {
            if let Some(current) = self.current.as_mut() {
                match current.poll_next_unpin(cx) {
                    Poll::Ready(Some(item)) => return Poll::Ready(Some(item)),
                    Poll::Ready(None) => self.current = None,
                    Poll::Pending => {}
                }
            }

            // The current stream has nothing ready (or is gone).
            match self.next_queued(cx) {
                (Some(next), _) => {
                    tracing::trace!(channel = %self.channel, "switching to new channel stream");
                    self.current = Some(next);
                }
                (None, true) if self.current.is_none() => return Poll::Ready(None),
                (None, _) => return Poll::Pending,
            }
        }
    }
}

impl<T> Drop for Extracted<T> {
    fn drop(&mut self) {
        self.lock().queued.remove(&self.channel);
        self.wakers.unregister(&self.channel);
    }
}
