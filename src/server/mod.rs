//! HTTP service
//!
//! Thin axum layer over [`Runtime`] and [`FileStore`]. Handlers translate
//! between JSON and the core types; nothing in here knows about processes.

pub mod error;
pub mod routes;

use crate::config::settings::ServiceConfig;
use crate::runtime::Runtime;
use crate::store::FileStore;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

/// Scratch files older than this at startup belong to a dead process.
const STALE_SCRATCH_AGE: Duration = Duration::from_secs(3600);

/// Shared state handed to every handler. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub runtime: Arc<Runtime>,
    pub store: Arc<FileStore>,
}

impl AppState {
    pub fn new(runtime: Runtime, store: FileStore) -> Self {
        Self {
            runtime: Arc::new(runtime),
            store: Arc::new(store),
        }
    }

    pub fn from_config(config: &ServiceConfig) -> crate::Result<Self> {
        let runtime = Runtime::from_config(config)?;
        if let Err(e) = runtime.executor().scratch().sweep_stale(STALE_SCRATCH_AGE) {
            log::warn!("Stale scratch sweep failed: {}", e);
        }
        Ok(Self::new(runtime, FileStore::new(&config.user_files_dir)))
    }
}

/// Bind and serve until SIGINT or SIGTERM.
pub async fn serve(config: ServiceConfig) -> anyhow::Result<()> {
    let state = AppState::from_config(&config)?;
    let app = routes::router(state);

    let addr = SocketAddr::new(config.host.parse()?, config.port);
    log::info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    log::info!("Graceful shutdown complete");
    Ok(())
}

/// Wait for Ctrl-C or SIGTERM. A handler that cannot be installed just never
/// fires, leaving the other one in charge.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::warn!("Failed to install Ctrl-C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                log::warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        () = ctrl_c => log::info!("Received SIGINT (Ctrl-C), starting graceful shutdown"),
        () = terminate => log::info!("Received SIGTERM, starting graceful shutdown"),
    }
}
