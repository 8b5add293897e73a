//! Helpers for composing component sinks (bundles of outbound streams).

pub mod extract;
pub mod instances;
pub mod lazy;
pub mod lens;
pub mod manifest;
pub mod merge;
pub mod sinks;
mod tee;
mod wake;

pub use extract::extract_sinks;
pub use instances::{InstanceSet, Instances, PickMergeExceptions, pick_merge_sinks};
pub use lazy::{Component, DEFAULT_EXPORT, Module, load_async, load_async_try};
pub use lens::{Composed, FnLens, IdentityLens, Lens, compose_lenses};
pub use manifest::DriverManifest;
pub use merge::{MergeExceptions, merge_sinks, merge_streams};
pub use sinks::{SinkStream, Sinks, silent, sink};
