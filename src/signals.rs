//! Translates OS signals into server stop requests.

use std::io;

use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::shutdown::{ShutdownHandle, StopMode};

/// Process signals the coordinator knows about.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Signal {
    /// SIGINT / Ctrl-C.
    Interrupt,
    /// SIGQUIT.
    Quit,
    /// SIGTERM.
    Terminate,
    /// SIGKILL. Never delivered to the process; listed so the table is
    /// complete. Use [`ShutdownHandle::force_stop`] instead.
    Kill,
    /// SIGUSR2, reserved for reload.
    UserDefined2,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SignalAction {
    Stop(StopMode),
    /// Aborts the process.
    NotImplemented,
}

impl Signal {
    pub fn action(self) -> SignalAction {
        match self {
            Self::Interrupt | Self::Quit | Self::Terminate => SignalAction::Stop(StopMode::Graceful),
            Self::Kill => SignalAction::Stop(StopMode::Forced),
            Self::UserDefined2 => SignalAction::NotImplemented,
        }
    }
}

/// Applies the action for `signal` to `handle`.
fn deliver(signal: Signal, handle: &ShutdownHandle) {
    match signal.action() {
        SignalAction::Stop(mode) => {
            if handle.stop(mode) {
                info!(?signal, ?mode, "stop signal received");
            }
        }
        SignalAction::NotImplemented => {
            error!(?signal, "signal handling not implemented, aborting");
            std::process::abort();
        }
    }
}

/// Spawns the signal listener task. Fails if a handler cannot be installed.
#[cfg(unix)]
pub(crate) fn listen(handle: ShutdownHandle) -> io::Result<JoinHandle<()>> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut quit = signal(SignalKind::quit())?;
    let mut terminate = signal(SignalKind::terminate())?;
    let mut reload = signal(SignalKind::user_defined2())?;

    Ok(tokio::spawn(async move {
        loop {
            let received = tokio::select! {
                Some(()) = interrupt.recv() => Signal::Interrupt,
                Some(()) = quit.recv() => Signal::Quit,
                Some(()) = terminate.recv() => Signal::Terminate,
                Some(()) = reload.recv() => Signal::UserDefined2,
                else => return,
            };
            deliver(received, &handle);
        }
    }))
}

/// Spawns the signal listener task. Only Ctrl-C exists off Unix.
#[cfg(not(unix))]
pub(crate) fn listen(handle: ShutdownHandle) -> io::Result<JoinHandle<()>> {
    Ok(tokio::spawn(async move {
        loop {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("ctrl-c listener failed: {e}");
                return;
            }
            deliver(Signal::Interrupt, &handle);
        }
    }))
}
