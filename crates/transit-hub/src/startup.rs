//! Hub startup helper for embedding in the engine binary.
//!
//! [`spawn_hub`] launches the HTTP + `WebSocket` server and the heartbeat
//! loop on background Tokio tasks so they run alongside the simulation.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::server::{ServerConfig, ServerError};
use crate::state::AppState;

/// Errors that can occur when spawning the hub.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    /// The server failed to bind or start.
    #[error("server start error: {0}")]
    Server(#[from] ServerError),
}

/// Handles on the hub's background tasks.
#[derive(Debug)]
pub struct HubTasks {
    /// The HTTP server task.
    pub server: JoinHandle<()>,
    /// The heartbeat loop task.
    pub heartbeat: JoinHandle<()>,
    shutdown: watch::Sender<bool>,
}

impl HubTasks {
    /// Stop accepting connections and stop the heartbeat.
    ///
    /// Open sessions end when their sockets close; the server task
    /// finishes once they have.
    pub fn signal_shutdown(&self) {
        // No receivers left means the server already stopped.
        let _ = self.shutdown.send(true);
    }
}

/// Spawn the hub server and heartbeat on background Tokio tasks.
///
/// # Errors
///
/// Returns [`StartupError::Server`] if the configured address does not
/// parse. This is checked before anything is spawned.
pub fn spawn_hub(config: ServerConfig, state: Arc<AppState>) -> Result<HubTasks, StartupError> {
    config.socket_addr()?;

    let (shutdown, mut shutdown_rx) = watch::channel(false);

    let hub = Arc::clone(state.hub());
    let heartbeat = tokio::spawn(async move { hub.run_heartbeat().await });

    let hub = Arc::clone(state.hub());
    let port = config.port;
    let server = tokio::spawn(async move {
        let signal = async move {
            // A dropped sender counts as shutdown too.
            let _ = shutdown_rx.wait_for(|stop| *stop).await;
            hub.request_stop();
        };
        if let Err(e) = crate::server::start_server(&config, state, signal).await {
            tracing::error!(error = %e, "Transit hub exited with error");
        }
    });

    tracing::info!(port, "Transit hub spawned on background task");

    Ok(HubTasks {
        server,
        heartbeat,
        shutdown,
    })
}
