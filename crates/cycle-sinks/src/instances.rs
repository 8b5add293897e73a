//! Sink merging for dynamic collections of component instances.
//!
//! [`pick_merge_sinks`] works against any [`Instances`] implementation.
//! [`InstanceSet`] is an in-memory collection: instances can be added and
//! removed at any time, and every pick-merged channel follows along, however
//! many times the same channel is picked.

use std::collections::HashMap;
use std::fmt;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use futures_util::stream::{SelectAll, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::sinks::{SinkStream, Sinks, unique_channels};
use crate::tee::Tee;

/// A dynamic, keyed set of live component instances.
pub trait Instances<T> {
    /// Merges `channel` across every current (and future) instance.
    fn pick_merge(&self, channel: &str) -> SinkStream<T>;
}

type Picker<I, T> = Box<dyn Fn(&I) -> SinkStream<T> + Send + Sync>;

/// Per-channel overrides for [`pick_merge_sinks`].
///
/// Each override gets the whole collection, so it can correlate channels or
/// pick from instances selectively.
pub struct PickMergeExceptions<I, T> {
    pickers: HashMap<String, Picker<I, T>>,
}

impl<I, T> PickMergeExceptions<I, T> {
    pub fn new() -> Self {
        Self {
            pickers: HashMap::new(),
        }
    }

    #[must_use]
    pub fn with<F>(mut self, channel: impl Into<String>, picker: F) -> Self
    where
        F: Fn(&I) -> SinkStream<T> + Send + Sync + 'static,
    {
        self.pickers.insert(channel.into(), Box::new(picker));
        self
    }

    pub fn contains(&self, channel: &str) -> bool {
        self.pickers.contains_key(channel)
    }
}

impl<I, T> Default for PickMergeExceptions<I, T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<I, T> fmt::Debug for PickMergeExceptions<I, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.pickers.keys()).finish()
    }
}

/// Builds the sinks of a collection component.
///
/// Channels in `channels` come from [`Instances::pick_merge`]; every channel
/// in `exceptions` (listed or not) comes from its override instead.
pub fn pick_merge_sinks<I, T, C>(
    channels: C,
    exceptions: PickMergeExceptions<I, T>,
) -> impl Fn(&I) -> Sinks<T> + Send + Sync
where
    I: Instances<T>,
    C: IntoIterator,
    C::Item: Into<String>,
{
    let merged: Vec<String> = unique_channels(channels)
        .into_iter()
        .filter(|channel| !exceptions.contains(channel))
        .collect();

    move |instances| {
        let mut sinks: Sinks<T> = merged
            .iter()
            .map(|channel| (channel.as_str(), instances.pick_merge(channel)))
            .collect();
        for (channel, picker) in &exceptions.pickers {
            sinks.insert(channel.as_str(), picker(instances));
        }
        sinks
    }
}

/// In-memory [`Instances`] implementation.
///
/// Every pick-merge of a channel sees every instance, including instances
/// added after it was created; each receives its own copy of the events.
/// Cloning yields another handle to the same set. Pick-merged streams end
/// once every handle is dropped and the forwarded instance streams finish.
pub struct InstanceSet<T> {
    state: Arc<Mutex<InstanceState<T>>>,
}

struct InstanceState<T> {
    instances: Vec<Instance<T>>,
    subscribers: HashMap<String, Vec<mpsc::UnboundedSender<SinkStream<T>>>>,
}

struct Instance<T> {
    key: String,
    cancel: CancellationToken,
    channels: HashMap<String, Arc<Tee<T>>>,
}

impl<T> InstanceSet<T> {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(InstanceState {
                instances: Vec::new(),
                subscribers: HashMap::new(),
            })),
        }
    }

    /// Removes the instance under `key`. Its streams stop forwarding events.
    pub fn remove(&self, key: &str) -> bool {
        let removed = self.lock().remove(key);
        if removed {
            tracing::debug!(key = %key, "instance removed");
        }
        removed
    }

    /// Keys of the current instances, in insertion order.
    pub fn keys(&self) -> Vec<String> {
        self.lock()
            .instances
            .iter()
            .map(|instance| instance.key.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().instances.is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, InstanceState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T: Clone + Send + 'static> InstanceSet<T> {
    /// Adds an instance under `key`, tearing down any instance it replaces.
    pub fn insert(&self, key: impl Into<String>, sinks: Sinks<T>) {
        let key = key.into();
        let mut state = self.lock();
        state.remove(&key);
        state.prune_subscribers();

        let cancel = CancellationToken::new();
        let mut channels = HashMap::new();
        for (channel, stream) in sinks {
            let tee = Tee::new(stream.take_until(cancel.clone().cancelled_owned()).boxed());
            for tx in state.subscribers.get(&channel).into_iter().flatten() {
                // A receiver dropped since pruning takes the branch with it.
                let _ = tx.send(tee.branch());
            }
            channels.insert(channel, tee);
        }

        tracing::debug!(key = %key, instances = state.instances.len() + 1, "instance added");
        state.instances.push(Instance {
            key,
            cancel,
            channels,
        });
    }
}

impl<T> InstanceState<T> {
    fn remove(&mut self, key: &str) -> bool {
        let Some(index) = self.instances.iter().position(|i| i.key == key) else {
            return false;
        };
        let instance = self.instances.remove(index);
        instance.cancel.cancel();
        true
    }

    /// Forgets subscriptions whose merged stream was dropped.
    fn prune_subscribers(&mut self) {
        self.subscribers.retain(|channel, senders| {
            senders.retain(|tx| !tx.is_closed());
            if senders.is_empty() {
                tracing::trace!(channel = %channel, "pick-merge unsubscribed");
            }
            !senders.is_empty()
        });
    }
}

impl<T: Clone + Send + 'static> Instances<T> for InstanceSet<T> {
    fn pick_merge(&self, channel: &str) -> SinkStream<T> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.lock();
        state.prune_subscribers();
        for instance in &state.instances {
            if let Some(tee) = instance.channels.get(channel) {
                let _ = tx.send(tee.branch());
            }
        }
        let senders = state.subscribers.entry(channel.to_string()).or_default();
        senders.push(tx);
        tracing::trace!(channel = %channel, subscribers = senders.len(), "pick-merge subscribed");

        PickMerge {
            incoming: rx,
            incoming_closed: false,
            active: SelectAll::new(),
        }
        .boxed()
    }
}

impl<T> Default for InstanceSet<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for InstanceSet<T> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl<T> fmt::Debug for InstanceSet<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f.debug_list()
            .entries(state.instances.iter().map(|i| &i.key))
            .finish()
    }
}

/// Merged view of one channel across a changing set of instance streams.
struct PickMerge<T> {
    incoming: mpsc::UnboundedReceiver<SinkStream<T>>,
    incoming_closed: bool,
    active: SelectAll<SinkStream<T>>,
}

impl<T> Unpin for PickMerge<T> {}

impl<T> Stream for PickMerge<T> {
    type Item = T;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        while !self.incoming_closed {
            match self.incoming.poll_recv(cx) {
                Poll::Ready(Some(stream)) => self.active.push(stream),
                Poll::Ready(None) => self.incoming_closed = true,
                Poll::Pending => break,
            }
        }

        if self.active.is_empty() {
            return if self.incoming_closed {
                Poll::Ready(None)
            } else {
                Poll::Pending
            };
        }

        match self.active.poll_next_unpin(cx) {
            Poll::Ready(None) if !self.incoming_closed => Poll::Pending,
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use futures_util::stream;

    use super::*;
    use crate::sinks::{silent, sink};

    /// Fake collection recording which channels were picked.
    struct Recording {
        picked: Mutex<Vec<String>>,
    }

    impl Instances<String> for Recording {
        fn pick_merge(&self, channel: &str) -> SinkStream<String> {
            self.picked.lock().unwrap().push(channel.to_string());
            sink(stream::iter([format!("merged:{channel}")]))
        }
    }

    #[tokio::test]
    async fn test_exception_gets_whole_collection() {
        let exceptions = PickMergeExceptions::new().with("b", |ins: &Recording| {
            let seen = ins.picked.lock().unwrap().len();
            sink(stream::iter([format!("custom after {seen} picks")]))
        });
        let build = pick_merge_sinks(["a", "b"], exceptions);
        let collection = Recording {
            picked: Mutex::new(Vec::new()),
        };

        let mut sinks = build(&collection);

        assert_eq!(*collection.picked.lock().unwrap(), ["a"]);
        let a: Vec<_> = sinks.take("a").unwrap().collect().await;
        let b: Vec<_> = sinks.take("b").unwrap().collect().await;
        assert_eq!(a, ["merged:a"]);
        assert_eq!(b, ["custom after 1 picks"]);
    }

    #[test]
    fn test_unlisted_exception_still_yields_channel() {
        let exceptions =
            PickMergeExceptions::new().with("state", |_: &Recording| silent::<String>());
        let build = pick_merge_sinks(["dom"], exceptions);
        let collection = Recording {
            picked: Mutex::new(Vec::new()),
        };

        let sinks = build(&collection);

        assert_eq!(sinks.channels().collect::<Vec<_>>(), ["dom", "state"]);
    }

    #[tokio::test]
    async fn test_instance_set_merges_existing_and_later_instances() {
        let set = InstanceSet::new();
        set.insert("first", Sinks::new().with("dom", sink(stream::iter([1]))));

        let mut merged = set.pick_merge("dom");
        assert_eq!(merged.next().await, Some(1));

        set.insert("second", Sinks::new().with("dom", sink(stream::iter([2]))));
        assert_eq!(merged.next().await, Some(2));

        drop(set);
        assert_eq!(merged.next().await, None);
    }

    #[tokio::test]
    async fn test_removed_instance_stops_forwarding() {
        let (tx, mut rx) = mpsc::unbounded_channel::<u32>();
        let live = stream::poll_fn(move |cx| rx.poll_recv(cx)).boxed();

        let set = InstanceSet::new();
        set.insert("row", Sinks::new().with("http", live));
        let mut merged = set.pick_merge("http");

        tx.send(7).unwrap();
        assert_eq!(merged.next().await, Some(7));

        assert!(set.remove("row"));
        assert!(set.is_empty());
        tx.send(8).unwrap();
        drop(set);

        assert_eq!(merged.next().await, None);
    }

    #[tokio::test]
    async fn test_every_built_bundle_follows_new_instances() {
        let rows = InstanceSet::new();
        let exceptions = PickMergeExceptions::<InstanceSet<u32>, u32>::new();
        let build = pick_merge_sinks(["http"], exceptions);
        let mut first = build(&rows);
        let mut second = build(&rows);

        rows.insert("r2", Sinks::new().with("http", sink(stream::iter([42]))));

        let mut first_http = first.take("http").unwrap();
        let mut second_http = second.take("http").unwrap();
        assert_eq!(first_http.next().await, Some(42));
        assert_eq!(second_http.next().await, Some(42));

        drop(rows);
        assert_eq!(first_http.next().await, None);
        assert_eq!(second_http.next().await, None);
    }

    #[tokio::test]
    async fn test_dropped_pick_merge_is_forgotten() {
        let set = InstanceSet::new();
        drop(set.pick_merge("dom"));

        set.insert("row", Sinks::new().with("dom", sink(stream::iter([5u32]))));
        assert!(set.lock().subscribers.is_empty());

        let mut merged = set.pick_merge("dom");
        assert_eq!(set.lock().subscribers["dom"].len(), 1);
        assert_eq!(merged.next().await, Some(5));
    }

    #[test]
    fn test_insert_with_same_key_replaces_instance() {
        let set: InstanceSet<u8> = InstanceSet::new();
        set.insert("a", Sinks::new().with("dom", silent()));
        set.insert("b", Sinks::new());
        set.insert("a", Sinks::new());

        assert_eq!(set.keys(), ["b", "a"]);
        assert_eq!(set.len(), 2);
        assert!(!set.remove("missing"));
    }
}
