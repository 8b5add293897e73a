//! Merging several components' sink bundles into one.

use std::collections::HashMap;
use std::fmt;

use anyhow::{Result, ensure};
use futures_util::stream::{self, StreamExt};

use crate::sinks::{SinkStream, Sinks};

type Reducer<T> = Box<dyn Fn(Vec<SinkStream<T>>) -> SinkStream<T> + Send + Sync>;

/// Per-channel overrides for [`merge_sinks`].
///
/// A reducer receives every contributing stream for its channel, in bundle
/// order, and returns the merged stream for that channel. Typical use is a
/// rendering channel where the views must be combined instead of interleaved.
pub struct MergeExceptions<T> {
    reducers: HashMap<String, Reducer<T>>,
}

impl<T> MergeExceptions<T> {
    pub fn new() -> Self {
        Self {
            reducers: HashMap::new(),
        }
    }

    /// Registers `reducer` for `channel`, replacing any earlier one.
    #[must_use]
    pub fn with<F>(mut self, channel: impl Into<String>, reducer: F) -> Self
    where
        F: Fn(Vec<SinkStream<T>>) -> SinkStream<T> + Send + Sync + 'static,
    {
        self.reducers.insert(channel.into(), Box::new(reducer));
        self
    }

    pub fn contains(&self, channel: &str) -> bool {
        self.reducers.contains_key(channel)
    }

    pub fn is_empty(&self) -> bool {
        self.reducers.is_empty()
    }
}

impl<T> Default for MergeExceptions<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for MergeExceptions<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.reducers.keys()).finish()
    }
}

/// Merges sink bundles channel by channel.
///
/// Channels contributed by a single bundle pass through untouched; shared
/// channels are interleaved in arrival order. Channels listed in
/// `exceptions` are handed to their reducer instead, but only when at least
/// one bundle contributes to them.
///
/// # Errors
/// Returns an error if `bundles` is empty.
pub fn merge_sinks<T>(bundles: Vec<Sinks<T>>, exceptions: &MergeExceptions<T>) -> Result<Sinks<T>>
where
    T: Send + 'static,
{
    ensure!(!bundles.is_empty(), "merge_sinks needs at least one bundle");

    let bundle_count = bundles.len();
    let mut order: Vec<String> = Vec::new();
    let mut contributions: HashMap<String, Vec<SinkStream<T>>> = HashMap::new();
    for bundle in bundles {
        for (channel, stream) in bundle {
            let streams = contributions.entry(channel.clone()).or_insert_with(|| {
                order.push(channel);
                Vec::new()
            });
            streams.push(stream);
        }
    }

    let mut merged = Sinks::new();
    for channel in order {
        let Some(streams) = contributions.remove(&channel) else {
            continue;
        };
        let stream = if let Some(reducer) = exceptions.reducers.get(&channel) {
            tracing::trace!(channel = %channel, contributors = streams.len(), "reducing channel");
            reducer(streams)
        } else {
            merge_streams(streams)
        };
        merged.insert(channel, stream);
    }

    tracing::debug!(
        bundles = bundle_count,
        channels = merged.len(),
        "merged sink bundles"
    );
    Ok(merged)
}

/// Interleaves `streams` by arrival, skipping the wrapper for a single stream.
pub fn merge_streams<T>(mut streams: Vec<SinkStream<T>>) -> SinkStream<T>
where
    T: Send + 'static,
{
    match streams.len() {
        0 => stream::empty().boxed(),
        1 => streams.remove(0),
        _ => stream::select_all(streams).boxed(),
    }
}
