//! Live-connection accounting.
//!
//! Every accepted connection moves through `New` and then exactly one of
//! `Closed` or `Hijacked`. The tracker counts connections between those
//! transitions; a graceful stop waits for the count to reach zero.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::Notify;
use tracing::warn;

/// Connection lifecycle transitions the tracker reacts to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnState {
    New,
    Closed,
    /// The connection left the server's control (e.g. upgraded) and no
    /// longer counts as in flight.
    Hijacked,
}

#[derive(Clone, Default)]
pub struct ConnTracker {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    active: AtomicUsize,
    idle: Notify,
}

impl ConnTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies one lifecycle transition to the counter.
    pub fn observe(&self, state: ConnState) {
        match state {
            ConnState::New => {
                self.inner.active.fetch_add(1, Ordering::AcqRel);
            }
            ConnState::Closed | ConnState::Hijacked => {
                let prev = self.inner.active.fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                    n.checked_sub(1)
                });
                match prev {
                    Ok(1) => self.inner.idle.notify_waiters(),
                    Ok(_) => {}
                    Err(_) => warn!(?state, "connection closed without a matching open"),
                }
            }
        }
    }

    /// Counts a new connection; the guard reports `Closed` when dropped.
    pub fn track(&self) -> ConnGuard {
        self.observe(ConnState::New);
        ConnGuard { tracker: Some(self.clone()) }
    }

    pub fn active(&self) -> usize {
        self.inner.active.load(Ordering::Acquire)
    }

    /// Resolves once no connection is in flight.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            // Register before reading the counter so a drop to zero in
            // between is not missed.
            notified.as_mut().enable();
            if self.active() == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// Keeps one connection counted while alive.
pub struct ConnGuard {
    tracker: Option<ConnTracker>,
}

impl ConnGuard {
    /// Reports `Hijacked` instead of `Closed`.
    ///
    /// For callers that take the socket out of the server's hands, such as
    /// after a protocol upgrade. The connection stops counting as active and
    /// a graceful drain no longer waits for it.
    pub fn hijack(mut self) {
        if let Some(tracker) = self.tracker.take() {
            tracker.observe(ConnState::Hijacked);
        }
    }
}

impl Drop for ConnGuard {
    fn drop(&mut self) {
        if let Some(tracker) = self.tracker.take() {
            tracker.observe(ConnState::Closed);
        }
    }
}
