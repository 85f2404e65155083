//! Connection bookkeeping shared by every clone of the audit store.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use tokio::sync::Notify;

/// Connection flags plus reconnect coordination.
///
/// Only one task reconnects at a time; the others park on `reconnect_done`
/// until the owner's [`ReconnectGuard`] is dropped.
#[derive(Debug, Default)]
pub struct ConnectionState {
    connected: AtomicBool,
    attempts: AtomicU32,
    reconnecting: AtomicBool,
    reconnect_done: Notify,
}

impl ConnectionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Record the link state. A successful connection clears the attempt count.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
        if connected {
            self.attempts.store(0, Ordering::SeqCst);
        }
    }

    /// Count one more reconnect attempt and return the new total.
    pub fn next_attempt(&self) -> u32 {
        self.attempts.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn is_reconnecting(&self) -> bool {
        self.reconnecting.load(Ordering::SeqCst)
    }

    /// Claim the reconnect slot. `None` when another task already holds it.
    pub fn begin_reconnect(&self) -> Option<ReconnectGuard<'_>> {
        (!self.reconnecting.swap(true, Ordering::SeqCst)).then_some(ReconnectGuard { state: self })
    }

    /// Wait until the current reconnect (if any) finishes.
    pub async fn wait_for_reconnect(&self) {
        // Register before checking the flag so a wake-up between the two is not lost
        let notified = self.reconnect_done.notified();
        if self.is_reconnecting() {
            notified.await;
        }
    }
}

/// Releases the reconnect slot and wakes waiters when dropped, including on
/// early return or cancellation of the reconnecting future.
#[derive(Debug)]
pub struct ReconnectGuard<'a> {
    state: &'a ConnectionState,
}

impl Drop for ReconnectGuard<'_> {
    fn drop(&mut self) {
        self.state.reconnecting.store(false, Ordering::SeqCst);
        self.state.reconnect_done.notify_waiters();
    }
}
