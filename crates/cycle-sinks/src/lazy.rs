//! Lazily loaded components.
//!
//! A lazy component looks like any other component (`sources -> sinks`) but
//! resolves its implementation asynchronously the first time its sinks are
//! polled. Until then every requested channel is silent.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use futures_util::future;
use futures_util::stream::{self, StreamExt};

use crate::extract::extract_sinks;
use crate::sinks::{Sinks, sink, unique_channels};

/// Export name used when no name is given to [`load_async`].
pub const DEFAULT_EXPORT: &str = "default";

/// A component: turns driver sources into a sink bundle.
pub type Component<So, T> = Arc<dyn Fn(So) -> Sinks<T> + Send + Sync>;

/// A loaded module: components keyed by export name.
pub struct Module<So, T> {
    exports: HashMap<String, Component<So, T>>,
}

impl<So, T> Module<So, T> {
    pub fn new() -> Self {
        Self {
            exports: HashMap::new(),
        }
    }

    /// Sets the [`DEFAULT_EXPORT`] component.
    #[must_use]
    pub fn with_default<F>(self, component: F) -> Self
    where
        F: Fn(So) -> Sinks<T> + Send + Sync + 'static,
    {
        self.with_export(DEFAULT_EXPORT, component)
    }

    #[must_use]
    pub fn with_export<F>(mut self, name: impl Into<String>, component: F) -> Self
    where
        F: Fn(So) -> Sinks<T> + Send + Sync + 'static,
    {
        self.exports.insert(name.into(), Arc::new(component));
        self
    }

    pub fn export(&self, name: &str) -> Option<Component<So, T>> {
        self.exports.get(name).cloned()
    }
}

impl<So, T> Default for Module<So, T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<So, T> fmt::Debug for Module<So, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Module")
            .field("exports", &self.exports.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Wraps an asynchronously loaded module as a synchronous component.
///
/// Each call to the returned component starts a fresh load via `loader`,
/// picks `export` (or [`DEFAULT_EXPORT`]), runs it on the given sources and
/// exposes its sinks through [`extract_sinks`]. A failed load, or a module
/// without the requested export, is logged and ends every channel without
/// emitting. Use [`load_async_try`] to see the failure on the channels.
pub fn load_async<So, T, L, Fut, C>(
    loader: L,
    channels: C,
    export: Option<&str>,
) -> impl Fn(So) -> Sinks<T> + Send + Sync
where
    So: Send + 'static,
    T: Send + 'static,
    L: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<Module<So, T>>> + Send + 'static,
    C: IntoIterator,
    C::Item: Into<String>,
{
    let channels = unique_channels(channels);
    let export = export.unwrap_or(DEFAULT_EXPORT).to_string();

    move |sources| {
        let resolved = resolve(loader(), export.clone(), sources);
        let lazy = stream::once(resolved).filter_map(|result| {
            future::ready(match result {
                Ok(sinks) => Some(sinks),
                Err(err) => {
                    tracing::error!(error = ?err, "lazy component failed");
                    None
                }
            })
        });
        extract_sinks(lazy, channels.clone())
    }
}

/// Like [`load_async`], but every channel carries `Result`s.
///
/// Events of the loaded component arrive as `Ok`. If the load fails, each
/// requested channel emits a single `Err` describing the failure and ends.
pub fn load_async_try<So, T, L, Fut, C>(
    loader: L,
    channels: C,
    export: Option<&str>,
) -> impl Fn(So) -> Sinks<Result<T>> + Send + Sync
where
    So: Send + 'static,
    T: Send + 'static,
    L: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<Module<So, T>>> + Send + 'static,
    C: IntoIterator,
    C::Item: Into<String>,
{
    let channels = unique_channels(channels);
    let export = export.unwrap_or(DEFAULT_EXPORT).to_string();

    move |sources| {
        let resolved = resolve(loader(), export.clone(), sources);
        let failed_channels = channels.clone();
        let lazy = stream::once(resolved).map(move |result| match result {
            Ok(sinks) => sinks
                .into_iter()
                .map(|(channel, stream)| (channel, stream.map(Ok).boxed()))
                .collect::<Sinks<Result<T>>>(),
            Err(err) => {
                tracing::error!(error = ?err, "lazy component failed");
                let message = format!("{err:#}");
                failed_channels
                    .iter()
                    .map(|channel| {
                        let err = anyhow!("{message}");
                        (channel.as_str(), sink(stream::iter([Err(err)])))
                    })
                    .collect::<Sinks<Result<T>>>()
            }
        });
        extract_sinks(lazy, channels.clone())
    }
}

async fn resolve<So, T, Fut>(load: Fut, export: String, sources: So) -> Result<Sinks<T>>
where
    Fut: Future<Output = Result<Module<So, T>>>,
{
    let module = load.await.context("Failed to load lazy component module")?;
    let component = module
        .export(&export)
        .with_context(|| format!("Lazy module has no export named '{export}'"))?;
    tracing::debug!(export = %export, "lazy component resolved");
    Ok(component(sources))
}
