//! Single-shot stop channel.
//!
//! A server has one [`ShutdownHandle`]. The first stop request decides the
//! mode; later requests, of either mode, change nothing.

use std::future;
use std::sync::Arc;

use tokio::sync::watch;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopMode {
    /// Stop accepting, let in-flight connections finish.
    Graceful,
    /// Stop now without draining.
    Forced,
}

/// Requests a running server to stop.
///
/// Cloneable and usable from any task, including before the server starts.
#[derive(Clone, Debug)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<Option<StopMode>>>,
}

impl ShutdownHandle {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    /// Returns `true` if this call fired the channel.
    pub fn graceful_stop(&self) -> bool {
        self.stop(StopMode::Graceful)
    }

    /// Returns `true` if this call fired the channel.
    pub fn force_stop(&self) -> bool {
        self.stop(StopMode::Forced)
    }

    pub fn stop(&self, mode: StopMode) -> bool {
        self.tx.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(mode);
            true
        })
    }

    /// The mode that fired, if any.
    pub fn mode(&self) -> Option<StopMode> {
        *self.tx.borrow()
    }

    pub(crate) fn subscribe(&self) -> StopSignal {
        StopSignal { rx: self.tx.subscribe() }
    }
}

impl Default for ShutdownHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiving side, one per waiting task.
pub(crate) struct StopSignal {
    rx: watch::Receiver<Option<StopMode>>,
}

impl StopSignal {
    /// Resolves with the mode once the channel fires. Cancel safe.
    pub(crate) async fn recv(&mut self) -> StopMode {
        let fired = self.rx.wait_for(Option::is_some).await.map(|mode| *mode);
        match fired {
            Ok(mode) => mode.unwrap_or(StopMode::Graceful),
            // Every handle is gone: nobody can stop us any more.
            Err(_) => future::pending().await,
        }
    }
}
