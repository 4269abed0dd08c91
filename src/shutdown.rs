//! Graceful shutdown coordination.
//!
//! A [`ShutdownCoordinator`] is shared by the signal listener, the scheduler's
//! dispatch loop and every in-flight call. The first Ctrl+C stops new
//! dispatches and lets in-flight items finish and persist; a second one asks
//! the orchestrator to stop waiting for them.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::warn;

/// Shared handle to a shutdown coordinator.
pub type SharedShutdown = Arc<ShutdownCoordinator>;

/// Coordinates graceful shutdown across async tasks.
#[derive(Debug, Default)]
pub struct ShutdownCoordinator {
    is_shutdown: AtomicBool,
    interrupts: AtomicU32,
    requested_at: Mutex<Option<Instant>>,
    notify: Notify,
}

impl ShutdownCoordinator {
    /// Create a new coordinator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new shared coordinator wrapped in [`Arc`].
    pub fn shared() -> SharedShutdown {
        Arc::new(Self::new())
    }

    /// Request shutdown. Every request bumps the interrupt count and wakes
    /// all waiters.
    pub fn request_shutdown(&self) {
        self.requested_at
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get_or_insert_with(Instant::now);
        self.interrupts.fetch_add(1, Ordering::SeqCst);
        self.is_shutdown.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    /// Whether shutdown has been requested.
    pub fn is_shutdown_requested(&self) -> bool {
        self.is_shutdown.load(Ordering::SeqCst)
    }

    /// Whether the operator interrupted more than once and wants out now.
    pub fn is_forced(&self) -> bool {
        self.interrupts.load(Ordering::SeqCst) > 1
    }

    /// When the first shutdown request arrived.
    pub fn requested_at(&self) -> Option<Instant> {
        *self.requested_at.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Wait until shutdown is requested. Returns immediately if already set.
    pub async fn wait_for_shutdown(&self) {
        // Register interest before checking the flag so a request landing in
        // between is not missed.
        let notified = self.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if self.is_shutdown_requested() {
            return;
        }
        notified.await;
    }

    /// Wait until a second interrupt asks to stop waiting for in-flight work.
    pub async fn wait_for_forced(&self) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_forced() {
                return;
            }
            notified.await;
        }
    }

    /// Spawn a task that turns Ctrl+C presses into shutdown requests.
    pub fn listen_for_ctrl_c(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let handle = Arc::clone(self);
        tokio::spawn(async move {
            while tokio::signal::ctrl_c().await.is_ok() {
                if handle.is_shutdown_requested() {
                    warn!("Second Ctrl+C received - abandoning in-flight items");
                } else {
                    warn!("Ctrl+C received - finishing in-flight items, no new work will start");
                }
                handle.request_shutdown();
            }
        })
    }
}
