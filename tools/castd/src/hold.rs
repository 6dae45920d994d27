//! Process liveness hold.
//!
//! A bus-activated daemon should go away when idle, but never while a
//! recording is running. Holds are scoped tokens: the registry keeps one per
//! tracked recording, and the main loop exits only once the count has stayed
//! at zero for the configured idle timeout.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;

#[derive(Clone)]
pub struct ServiceHold {
    inner: Arc<HoldInner>,
}

struct HoldInner {
    count: AtomicUsize,
    changed: Notify,
}

/// Keeps the process alive while it exists.
pub struct HoldGuard {
    inner: Arc<HoldInner>,
}

impl ServiceHold {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(HoldInner {
                count: AtomicUsize::new(0),
                changed: Notify::new(),
            }),
        }
    }

    pub fn acquire(&self) -> HoldGuard {
        self.inner.count.fetch_add(1, Ordering::SeqCst);
        self.inner.changed.notify_waiters();
        HoldGuard {
            inner: self.inner.clone(),
        }
    }

    pub fn active(&self) -> usize {
        self.inner.count.load(Ordering::SeqCst)
    }

    /// Resolves once the hold count has stayed at zero for `idle_timeout`.
    pub async fn idle_expired(&self, idle_timeout: Duration) {
        loop {
            if self.active() > 0 {
                self.inner.changed.notified().await;
                continue;
            }
            tokio::select! {
                _ = tokio::time::sleep(idle_timeout) => {
                    if self.active() == 0 {
                        return;
                    }
                }
                _ = self.inner.changed.notified() => {}
            }
        }
    }
}

impl Default for ServiceHold {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for HoldGuard {
    fn drop(&mut self) {
        self.inner.count.fetch_sub(1, Ordering::SeqCst);
        self.inner.changed.notify_waiters();
    }
}
