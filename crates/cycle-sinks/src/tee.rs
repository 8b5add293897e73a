//! Fan-out of one stream to any number of branch streams.
//!
//! Nothing is spawned: whichever branch is polled pulls the next item from
//! the source and queues a clone for every other live branch. Branches only
//! see items pulled after they were created.

use std::collections::{HashMap, VecDeque};
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use futures_util::stream::{Stream, StreamExt};

use crate::sinks::SinkStream;
use crate::wake::WakerSet;

pub(crate) struct Tee<T> {
    state: Mutex<TeeState<T>>,
    wakers: Arc<WakerSet<usize>>,
}

struct TeeState<T> {
    /// `None` once the source has ended.
    source: Option<SinkStream<T>>,
    pending: HashMap<usize, VecDeque<T>>,
    next_id: usize,
}

impl<T: Clone + Send + 'static> Tee<T> {
    pub(crate) fn new(source: SinkStream<T>) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(TeeState {
                source: Some(source),
                pending: HashMap::new(),
                next_id: 0,
            }),
            wakers: Arc::new(WakerSet::new()),
        })
    }

    /// A new stream of every item the source yields from now on.
    pub(crate) fn branch(self: &Arc<Self>) -> SinkStream<T> {
        let mut state = self.lock();
        let id = state.next_id;
        state.next_id += 1;
        state.pending.insert(id, VecDeque::new());
        Branch {
            id,
            tee: Arc::clone(self),
        }
        .boxed()
    }

    #[cfg(test)]
    fn branches(&self) -> usize {
        self.lock().pending.len()
    }
}

impl<T> Tee<T> {
    fn lock(&self) -> MutexGuard<'_, TeeState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

struct Branch<T> {
    id: usize,
    tee: Arc<Tee<T>>,
}

impl<T> Unpin for Branch<T> {}

impl<T: Clone> Stream for Branch<T> {
    type Item = T;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        let id = self.id;
        let tee = &self.tee;
        let mut state = tee.lock();

        if let Some(item) = state.pending.get_mut(&id).and_then(VecDeque::pop_front) {
            return Poll::Ready(Some(item));
        }

        tee.wakers.register(&id, cx.waker());
        let source_waker = tee.wakers.waker();
        let TeeState { source, pending, .. } = &mut *state;
        let Some(stream) = source.as_mut() else {
            return Poll::Ready(None);
        };

        match stream.poll_next_unpin(&mut Context::from_waker(&source_waker)) {
            Poll::Ready(Some(item)) => {
                for (other, queue) in &mut *pending {
                    if *other != id {
                        queue.push_back(item.clone());
                    }
                }
                drop(state);
                tee.wakers.wake_others(&id);
                Poll::Ready(Some(item))
            }
            Poll::Ready(None) => {
                *source = None;
                drop(state);
                tee.wakers.wake_others(&id);
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<T> Drop for Branch<T> {
    fn drop(&mut self) {
        self.tee.lock().pending.remove(&self.id);
        self.tee.wakers.unregister(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use futures_util::stream;
    use tokio::sync::mpsc;

    use super::*;
    use crate::sinks::sink;

    #[tokio::test]
    async fn test_every_branch_sees_every_item() {
        let tee = Tee::new(sink(stream::iter([1, 2])));
        let a = tee.branch();
        let b = tee.branch();

        let a: Vec<_> = a.collect().await;
        let b: Vec<_> = b.collect().await;

        assert_eq!(a, [1, 2]);
        assert_eq!(b, [1, 2]);
    }

    #[tokio::test]
    async fn test_late_branch_starts_at_next_item() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let tee = Tee::new(stream::poll_fn(move |cx| rx.poll_recv(cx)).boxed());
        let mut early = tee.branch();

        tx.send("first").unwrap();
        assert_eq!(early.next().await, Some("first"));

        let mut late = tee.branch();
        tx.send("second").unwrap();
        drop(tx);
        assert_eq!(late.next().await, Some("second"));
        assert_eq!(early.next().await, Some("second"));
        assert_eq!(late.next().await, None);
        assert_eq!(early.next().await, None);
    }

    #[tokio::test]
    async fn test_branch_woken_when_sibling_pulls() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let tee = Tee::new(stream::poll_fn(move |cx| rx.poll_recv(cx)).boxed());
        let waiting = tokio::spawn(tee.branch().collect::<Vec<u8>>());
        let mut puller = tee.branch();

        tx.send(3).unwrap();
        assert_eq!(puller.next().await, Some(3));
        drop(tx);
        assert_eq!(puller.next().await, None);

        assert_eq!(waiting.await.unwrap(), [3]);
    }

    #[test]
    fn test_dropped_branch_releases_its_queue() {
        let tee = Tee::new(sink(stream::iter([0u8])));
        let kept = tee.branch();
        drop(tee.branch());

        assert_eq!(tee.branches(), 1);
        drop(kept);
        assert_eq!(tee.branches(), 0);
    }
}
