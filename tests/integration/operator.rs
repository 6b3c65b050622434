//! In-process operator for integration tests.
//!
//! ```rust,ignore
//! let operator = ScopedOperator::start(client.clone()).await;
//! // ... run tests ...
//! // operator is stopped when dropped
//! ```
//!
//! The controller watches every ResourceLimiter in the cluster, so tests
//! rely on unique limiter names rather than watch scoping for isolation.

use kube::Client;
use resource_limiter::crd::v1beta2;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::debug;

/// A controller instance running in a background task.
pub struct ScopedOperator {
    handle: JoinHandle<()>,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl ScopedOperator {
    /// Start the v1beta2 controller. It panics if it exits on its own.
    pub async fn start(client: Client) -> Self {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = resource_limiter::run_controller::<v1beta2::ResourceLimiter>(client, 2, None, None) => {
                    panic!("ResourceLimiter controller exited unexpectedly");
                }
                _ = shutdown_rx => {
                    debug!("Controller received shutdown signal");
                }
            }
        });

        // Give the controller a moment to start watching
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;

        Self {
            handle,
            shutdown_tx: Some(shutdown_tx),
        }
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }
}

impl Drop for ScopedOperator {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        self.handle.abort();
    }
}
