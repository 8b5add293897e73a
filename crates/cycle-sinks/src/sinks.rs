//! Sink bundles: a component's outbound streams, keyed by channel name.
//!
//! A bundle is homogeneous in its item type. Components that talk to drivers
//! with different payloads use an enum as `T`.

use std::collections::BTreeMap;
use std::collections::btree_map;
use std::fmt;

use futures_util::StreamExt;
use futures_util::stream::{self, BoxStream, Stream};

/// A boxed outbound stream for a single channel.
pub type SinkStream<T> = BoxStream<'static, T>;

/// Boxes any sendable stream into a [`SinkStream`].
pub fn sink<T, S>(stream: S) -> SinkStream<T>
where
    S: Stream<Item = T> + Send + 'static,
{
    stream.boxed()
}

/// A stream that never emits and never ends.
pub fn silent<T: Send + 'static>() -> SinkStream<T> {
    stream::pending().boxed()
}

/// Mapping from channel name to the stream destined for that channel.
pub struct Sinks<T> {
    channels: BTreeMap<String, SinkStream<T>>,
}

impl<T> Sinks<T> {
    /// Creates an empty bundle.
    pub fn new() -> Self {
        Self {
            channels: BTreeMap::new(),
        }
    }

    /// Builder form of [`Sinks::insert`].
    #[must_use]
    pub fn with(mut self, channel: impl Into<String>, stream: SinkStream<T>) -> Self {
        self.insert(channel, stream);
        self
    }

    /// Sets the stream for `channel`, returning the one it replaced.
    pub fn insert(
        &mut self,
        channel: impl Into<String>,
        stream: SinkStream<T>,
    ) -> Option<SinkStream<T>> {
        self.channels.insert(channel.into(), stream)
    }

    /// Removes and returns the stream for `channel`.
    pub fn take(&mut self, channel: &str) -> Option<SinkStream<T>> {
        self.channels.remove(channel)
    }

    pub fn get_mut(&mut self, channel: &str) -> Option<&mut SinkStream<T>> {
        self.channels.get_mut(channel)
    }

    pub fn contains(&self, channel: &str) -> bool {
        self.channels.contains_key(channel)
    }

    /// Channel names, in sorted order.
    pub fn channels(&self) -> impl Iterator<Item = &str> {
        self.channels.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

impl<T> Default for Sinks<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Sinks<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.channels()).finish()
    }
}

impl<T, K: Into<String>> FromIterator<(K, SinkStream<T>)> for Sinks<T> {
    fn from_iter<I: IntoIterator<Item = (K, SinkStream<T>)>>(iter: I) -> Self {
        Self {
            channels: iter.into_iter().map(|(k, s)| (k.into(), s)).collect(),
        }
    }
}

impl<T, K: Into<String>> Extend<(K, SinkStream<T>)> for Sinks<T> {
    fn extend<I: IntoIterator<Item = (K, SinkStream<T>)>>(&mut self, iter: I) {
        self.channels
            .extend(iter.into_iter().map(|(k, s)| (k.into(), s)));
    }
}

impl<T> IntoIterator for Sinks<T> {
    type Item = (String, SinkStream<T>);
    type IntoIter = btree_map::IntoIter<String, SinkStream<T>>;

    fn into_iter(self) -> Self::IntoIter {
        self.channels.into_iter()
    }
}

/// Collapses repeated channel names, keeping first-seen order.
pub(crate) fn unique_channels<I>(channels: I) -> Vec<String>
where
    I: IntoIterator,
    I::Item: Into<String>,
{
    let mut seen = Vec::<String>::new();
    for channel in channels {
        let channel = channel.into();
        if !seen.contains(&channel) {
            seen.push(channel);
        }
    }
    seen
}

#[cfg(test)]
mod tests {
    use futures_util::stream;

    use super::*;

    #[tokio::test]
    async fn test_insert_replaces_existing_channel() {
        let mut sinks = Sinks::new().with("dom", sink(stream::iter([1])));
        let previous = sinks.insert("dom", sink(stream::iter([2])));

        let previous: Vec<i32> = previous.expect("dom was set").collect().await;
        assert_eq!(previous, vec![1]);

        let current: Vec<i32> = sinks.take("dom").unwrap().collect().await;
        assert_eq!(current, vec![2]);
        assert!(sinks.is_empty());
    }

    #[test]
    fn test_channels_are_listed_sorted() {
        let sinks: Sinks<u8> = [
            ("http", silent()),
            ("dom", silent()),
            ("state", silent()),
        ]
        .into_iter()
        .collect();

        assert_eq!(sinks.channels().collect::<Vec<_>>(), ["dom", "http", "state"]);
        assert_eq!(format!("{sinks:?}"), r#"{"dom", "http", "state"}"#);
    }

    #[test]
    fn test_unique_channels_keeps_first_seen_order() {
        assert_eq!(
            unique_channels(["http", "dom", "http", "state", "dom"]),
            ["http", "dom", "state"]
        );
    }
}
