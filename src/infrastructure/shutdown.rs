use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

/// Cloneable handle for requesting and awaiting graceful shutdown.
///
/// This is the single shutdown trigger of the whole application: the OS
/// signal watcher, application jobs and the runner itself all terminate the
/// process by calling [`ShutdownSignal::request`]. The slot is settable
/// exactly once; the first request wins and later ones are no-ops.
///
/// Requesting shutdown is normal control flow, not a fault, and is kept
/// structurally separate from the error taxonomy.
#[derive(Clone)]
pub struct ShutdownSignal {
    tx: broadcast::Sender<()>,
    requested: Arc<AtomicBool>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self {
            tx,
            requested: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Request shutdown. Only the first call has any effect.
    pub fn request(&self) {
        if self.requested.swap(true, Ordering::SeqCst) {
            debug!("shutdown already requested, ignoring");
            return;
        }
        // A send error only means nobody is waiting yet; the latched flag
        // still unblocks any future waiter.
        let _ = self.tx.send(());
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    /// Wait until shutdown has been requested. Resolves immediately if the
    /// request already happened.
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        if self.is_requested() {
            return;
        }
        let _ = rx.recv().await;
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}
