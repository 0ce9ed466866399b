use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;

/// Cancel the returned token on SIGTERM or SIGINT.
///
/// # Errors
///
/// Fails if either signal handler cannot be installed.
pub fn install_shutdown_handler() -> std::io::Result<CancellationToken> {
    let token = CancellationToken::new();
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    let trigger = token.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM, shutting down fleet node");
            }
            _ = sigint.recv() => {
                tracing::info!("Received SIGINT, shutting down fleet node");
            }
        }
        trigger.cancel();
    });

    Ok(token)
}
