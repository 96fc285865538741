use std::sync::Arc;

use tokio::signal;

use crate::server::AppState;

/// Wait for a shutdown signal (SIGINT or SIGTERM).
pub async fn wait_for_shutdown() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown...");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown...");
        }
    }
}

/// Report what the process leaves behind. Suspended runs are durable and
/// resume from the store after restart; they only need surfacing, not
/// cleanup.
pub async fn graceful_shutdown(state: &Arc<AppState>) {
    tracing::info!("Starting graceful shutdown...");

    let suspended = match state.engine.store().pending_older_than(chrono::Utc::now()).await {
        Ok(ids) => ids,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to inspect run store during shutdown");
            return;
        }
    };

    if suspended.is_empty() {
        tracing::info!("No suspended runs awaiting approval");
    } else {
        for workflow_id in &suspended {
            tracing::info!(workflow_id = %workflow_id, "Run still awaiting approval; will resume from store");
        }
    }

    tracing::info!("Graceful shutdown complete");
}
