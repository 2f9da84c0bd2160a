use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::runtime;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::infrastructure::shutdown::ShutdownSignal;

/// Delivery point for termination signals.
///
/// Outside a shielded region a delivery requests shutdown through the
/// [`ShutdownSignal`] handle, once per delivery. Inside one it is recorded
/// and reported when the region exits, so start and stop routines are never
/// abandoned half-way through.
///
/// The handle is passed explicitly to whoever needs to deliver: the OS
/// watcher installed by [`SignalGuard`] drives it in production, tests drive
/// it directly.
#[derive(Clone)]
pub struct SignalHandle {
    shutdown: ShutdownSignal,
    shielded: Arc<AtomicBool>,
    pending: Arc<AtomicBool>,
}

impl SignalHandle {
    pub(crate) fn new(shutdown: ShutdownSignal) -> Self {
        Self {
            shutdown,
            shielded: Arc::new(AtomicBool::new(false)),
            pending: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Deliver one termination signal.
    pub fn deliver(&self) {
        if self.shielded.load(Ordering::SeqCst) {
            info!("termination signal received inside shielded region, deferring");
            self.pending.store(true, Ordering::SeqCst);
        } else {
            info!("termination signal received, requesting shutdown");
            self.shutdown.request();
        }
    }

    /// Run `fut` with signal delivery deferred.
    ///
    /// Returns the future's output together with whether a termination
    /// signal arrived while the region was held; a deferred signal is
    /// reported exactly once, as if it had arrived the moment the region
    /// ended.
    pub async fn shielded<F: Future>(&self, fut: F) -> (F::Output, bool) {
        self.shielded.store(true, Ordering::SeqCst);
        let output = fut.await;
        self.shielded.store(false, Ordering::SeqCst);
        let interrupted = self.pending.swap(false, Ordering::SeqCst);
        (output, interrupted)
    }
}

/// Owns the OS termination-signal watcher for one application run.
///
/// The watcher is installed at most once and removed when the guard drops,
/// so repeated runs within one process (tests, mainly) stay clean.
pub struct SignalGuard {
    handle: SignalHandle,
    watcher: Option<JoinHandle<()>>,
}

impl SignalGuard {
    pub fn new(handle: SignalHandle) -> Self {
        Self {
            handle,
            watcher: None,
        }
    }

    /// Spawn the OS watcher on the given runtime. Idempotent.
    pub fn install(&mut self, runtime: &runtime::Handle) {
        if self.watcher.is_some() {
            return;
        }
        let handle = self.handle.clone();
        self.watcher = Some(runtime.spawn(watch_signals(handle)));
        info!("termination signal handler installed");
    }
}

impl Drop for SignalGuard {
    fn drop(&mut self) {
        if let Some(watcher) = self.watcher.take() {
            watcher.abort();
        }
    }
}

#[cfg(unix)]
async fn watch_signals(handle: SignalHandle) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut term = match signal(SignalKind::terminate()) {
        Ok(term) => Some(term),
        Err(err) => {
            warn!("failed to register SIGTERM handler: {err}");
            None
        }
    };

    loop {
        match term.as_mut() {
            Some(term) => {
                tokio::select! {
                    res = tokio::signal::ctrl_c() => {
                        if res.is_err() {
                            break;
                        }
                    }
                    _ = term.recv() => {}
                }
            }
            None => {
                if tokio::signal::ctrl_c().await.is_err() {
                    break;
                }
            }
        }
        handle.deliver();
    }
}

#[cfg(not(unix))]
async fn watch_signals(handle: SignalHandle) {
    while tokio::signal::ctrl_c().await.is_ok() {
        handle.deliver();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deliver_outside_region_requests_shutdown() {
        let shutdown = ShutdownSignal::new();
        let handle = SignalHandle::new(shutdown.clone());

        handle.deliver();
        assert!(shutdown.is_requested());
    }

    #[tokio::test]
    async fn test_deliver_inside_region_is_deferred() {
        let shutdown = ShutdownSignal::new();
        let handle = SignalHandle::new(shutdown.clone());
        let inner = handle.clone();

        let ((), interrupted) = handle
            .shielded(async move {
                inner.deliver();
            })
            .await;

        assert!(interrupted);
        assert!(!shutdown.is_requested());
    }

    #[tokio::test]
    async fn test_quiet_region_reports_no_interrupt() {
        let shutdown = ShutdownSignal::new();
        let handle = SignalHandle::new(shutdown.clone());

        let (value, interrupted) = handle.shielded(async { 42 }).await;
        assert_eq!(value, 42);
        assert!(!interrupted);
    }

    #[tokio::test]
    async fn test_deferred_signal_is_consumed_once() {
        let shutdown = ShutdownSignal::new();
        let handle = SignalHandle::new(shutdown.clone());
        let inner = handle.clone();

        let (_, first) = handle
            .shielded(async move {
                inner.deliver();
            })
            .await;
        let (_, second) = handle.shielded(async {}).await;

        assert!(first);
        assert!(!second);
    }
}
