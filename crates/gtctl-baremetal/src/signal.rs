//! Operator signals.

use std::io;

use tokio::signal::unix::{SignalKind, signal};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Cancel `cancel` on SIGINT or SIGTERM.
///
/// The returned task ends after the first signal, or quietly once the token
/// is cancelled by someone else.
pub fn install_signal_handler(cancel: CancellationToken) -> io::Result<JoinHandle<()>> {
    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;

    Ok(tokio::spawn(async move {
        tokio::select! {
            _ = interrupt.recv() => info!("interrupt received, shutting down"),
            _ = terminate.recv() => info!("terminate signal received, shutting down"),
            _ = cancel.cancelled() => return,
        }
        cancel.cancel();
    }))
}
