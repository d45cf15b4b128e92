//! Shutdown signal handling.

use tracing::warn;

/// Resolves when the process receives SIGINT or, on Unix, SIGTERM.
pub async fn shutdown() {
  #[cfg(unix)]
  {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate = match signal(SignalKind::terminate()) {
      Ok(terminate) => terminate,
      Err(err) => {
        warn!("Failed to install SIGTERM handler: {}", err);
        let _ = tokio::signal::ctrl_c().await;
        return;
      }
    };
    tokio::select! {
      _ = tokio::signal::ctrl_c() => {}
      _ = terminate.recv() => {}
    }
  }

  #[cfg(not(unix))]
  {
    let _ = tokio::signal::ctrl_c().await;
  }
}
