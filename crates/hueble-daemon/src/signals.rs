//! Termination signals for daemon processes.

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Cancel `stop` on SIGINT or SIGTERM.
///
/// The SIGTERM handler is installed before this returns.
///
/// # Errors
///
/// Returns an error if the SIGTERM handler cannot be installed.
pub fn spawn_signal_handler(stop: CancellationToken) -> std::io::Result<JoinHandle<()>> {
    #[cfg(unix)]
    let mut terminate =
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    Ok(tokio::spawn(async move {
        #[cfg(unix)]
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = terminate.recv() => {}
        }
        #[cfg(not(unix))]
        let _ = tokio::signal::ctrl_c().await;

        info!("Termination signal received");
        stop.cancel();
    }))
}
