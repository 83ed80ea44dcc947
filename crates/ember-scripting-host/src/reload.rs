use tokio::sync::watch;
use tracing::{error, info};

/// Why a reload was requested
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadReason {
    /// The process received SIGUSR2
    Signal,
    /// Script files changed on disk
    FilesChanged,
    /// A script called `ReloadScripts()`
    Script,
}

/// A pending reload; the generation increases with every request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReloadRequest {
    pub generation: u64,
    pub reason: ReloadReason,
}

/// Spawn a task forwarding SIGUSR2 as reload requests
///
/// The task ends once every receiver is dropped. Must be called from within a
/// tokio runtime.
#[cfg(unix)]
pub fn spawn_reload_listener() -> watch::Receiver<Option<ReloadRequest>> {
    let (reload_tx, reload_rx) = watch::channel(None);

    tokio::spawn(async move {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigusr2 = match signal(SignalKind::user_defined2()) {
            Ok(s) => s,
            Err(e) => {
                error!(target: "scripting", "Failed to register SIGUSR2 handler: {}", e);
                return;
            }
        };

        let mut generation = 0;
        loop {
            tokio::select! {
                received = sigusr2.recv() => {
                    if received.is_none() {
                        break;
                    }
                }
                _ = reload_tx.closed() => break,
            }

            generation += 1;
            info!(target: "scripting", "Received SIGUSR2 - requesting script reload");
            let request = ReloadRequest {
                generation,
                reason: ReloadReason::Signal,
            };
            if reload_tx.send(Some(request)).is_err() {
                break;
            }
        }
    });

    reload_rx
}

/// Non-Unix platforms have no SIGUSR2; the receiver never fires
#[cfg(not(unix))]
pub fn spawn_reload_listener() -> watch::Receiver<Option<ReloadRequest>> {
    let (reload_tx, reload_rx) = watch::channel(None);
    tracing::warn!(target: "scripting", "SIGUSR2 reload not supported on this platform");
    // Keep the sender alive so `changed()` pends instead of erroring
    std::mem::forget(reload_tx);
    reload_rx
}
