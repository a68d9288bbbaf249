use std::future::Future;

use tokio::task::JoinHandle;
use tracing::trace;

/// Spawns a library task, tagging it in the trace output.
pub fn spawn_named<F, T>(name: &str, future: F) -> JoinHandle<T>
where
    F: Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    trace!("spawning sonority::{name}");
    tokio::spawn(future)
}
