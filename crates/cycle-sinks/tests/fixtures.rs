//! Shared helpers for integration tests.
#![allow(dead_code)]

use cycle_sinks::SinkStream;
use futures_util::StreamExt;
use futures_util::stream;
use tokio::sync::mpsc;

/// A sink stream fed by hand through the returned sender.
pub fn manual<T: Send + 'static>() -> (mpsc::UnboundedSender<T>, SinkStream<T>) {
    let (tx, mut rx) = mpsc::unbounded_channel();
    (tx, stream::poll_fn(move |cx| rx.poll_recv(cx)).boxed())
}

/// Routes library logs to the test harness output.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("cycle_sinks=debug")),
        )
        .with_test_writer()
        .try_init();
}
