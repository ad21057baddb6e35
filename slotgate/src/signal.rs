//! Process signals to cancellation.

use tokio_util::sync::CancellationToken;
use tracing::info;

/// Wait for SIGINT or SIGTERM (or for `token` to be cancelled elsewhere),
/// then cancel `token`.
///
/// # Panics
///
/// Panics if signal handlers cannot be installed, which only happens when no
/// tokio runtime with signal support is driving this future. That is a
/// startup misconfiguration and should fail fast.
pub async fn wait_for_shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler - is tokio runtime configured correctly?");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler - is tokio runtime configured correctly?")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT, shutting down...");
        }
        _ = terminate => {
            info!("Received SIGTERM, shutting down...");
        }
        _ = token.cancelled() => {
            return;
        }
    }

    token.cancel();
}
