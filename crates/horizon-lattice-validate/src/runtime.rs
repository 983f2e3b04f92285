//! Background drivers for async predicates.
//!
//! A pending predicate is wrapped in a shared future that settles its node
//! when it resolves. Whoever polls that future first drives it: an awaiting
//! caller, or the detached driver task spawned here. The driver runs on the
//! caller's tokio runtime when there is one, otherwise on a small global
//! runtime built on first use.

use std::future::Future;
use std::sync::OnceLock;

use parking_lot::Mutex;
use tokio::runtime::{Builder, Handle, Runtime};

use crate::logging::targets;

/// Fallback runtime, built on first use outside a tokio context.
static GLOBAL_RUNTIME: OnceLock<Option<Runtime>> = OnceLock::new();

/// Configuration for the fallback runtime, read when it is first built.
static CONFIG: Mutex<Option<DriverRuntimeConfig>> = Mutex::new(None);

/// Configuration for the fallback runtime.
#[derive(Debug, Clone)]
pub struct DriverRuntimeConfig {
    /// Number of worker threads.
    pub worker_threads: usize,
    /// Name prefix for runtime threads.
    pub thread_name: String,
}

impl Default for DriverRuntimeConfig {
    fn default() -> Self {
        Self {
            worker_threads: 1,
            thread_name: "lattice-validate".to_string(),
        }
    }
}

impl DriverRuntimeConfig {
    /// Set the number of worker threads.
    pub fn with_worker_threads(mut self, count: usize) -> Self {
        self.worker_threads = count.max(1);
        self
    }

    /// Set the thread name prefix.
    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }
}

/// Configure the fallback runtime.
///
/// Returns `false` if the runtime was already built, in which case the
/// configuration is ignored.
pub fn configure_runtime(config: DriverRuntimeConfig) -> bool {
    if GLOBAL_RUNTIME.get().is_some() {
        return false;
    }
    *CONFIG.lock() = Some(config);
    true
}

fn global_handle() -> Option<Handle> {
    GLOBAL_RUNTIME
        .get_or_init(|| {
            let config = CONFIG.lock().clone().unwrap_or_default();
            let built = Builder::new_multi_thread()
                .worker_threads(config.worker_threads)
                .thread_name(&config.thread_name)
                .enable_time()
                .build();
            match built {
                Ok(runtime) => Some(runtime),
                Err(err) => {
                    tracing::error!(target: targets::RUNTIME, error = %err, "failed to build driver runtime");
                    None
                }
            }
        })
        .as_ref()
        .map(|runtime| runtime.handle().clone())
}

/// Spawn a driver task.
///
/// If no runtime is available the task is dropped; the future still runs
/// when someone awaits the node's promise.
pub fn spawn<F>(future: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    let handle = match Handle::try_current() {
        Ok(handle) => handle,
        Err(_) => match global_handle() {
            Some(handle) => {
                tracing::trace!(target: targets::RUNTIME, "no ambient runtime; using driver runtime");
                handle
            }
            None => {
                tracing::warn!(target: targets::RUNTIME, "no runtime available; driver not spawned");
                return;
            }
        },
    };

    handle.spawn(future);
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn test_spawn_uses_ambient_runtime() {
        let (tx, rx) = oneshot::channel();
        spawn(async move {
            let _ = tx.send(42);
        });
        assert_eq!(rx.await.ok(), Some(42));
    }

    #[test]
    fn test_spawn_without_runtime_uses_fallback() {
        let (tx, rx) = std::sync::mpsc::channel();
        spawn(async move {
            let _ = tx.send("driven");
        });
        let received = rx.recv_timeout(std::time::Duration::from_secs(5));
        assert_eq!(received.ok(), Some("driven"));
    }

    #[test]
    fn test_config_builder() {
        let config = DriverRuntimeConfig::default()
            .with_worker_threads(0)
            .with_thread_name("validators");
        assert_eq!(config.worker_threads, 1);
        assert_eq!(config.thread_name, "validators");
    }
}
