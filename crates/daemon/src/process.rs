//! Service lifecycle: wire the share, overlay, queue, sync processor,
//! and admin API together, and tear them down on shutdown.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

use common::{
    FsTree, HttpTree, OverlayTree, Share, SqliteQueue, SyncProcessor,
};

use crate::http_server;
use crate::state::AppState;

/// Shared service state handed to the admin API and to embedding front
/// ends.
#[derive(Clone)]
pub struct ServiceState {
    share: Arc<Share>,
    queue: Arc<SqliteQueue>,
    overlay: OverlayTree<HttpTree, SqliteQueue>,
    api_addr: SocketAddr,
}

impl ServiceState {
    pub fn share(&self) -> &Share {
        &self.share
    }

    pub fn queue(&self) -> &SqliteQueue {
        &self.queue
    }

    /// The overlay tree a protocol front end serves from.
    pub fn overlay(&self) -> &OverlayTree<HttpTree, SqliteQueue> {
        &self.overlay
    }

    /// Bound address of the admin API.
    pub fn api_addr(&self) -> SocketAddr {
        self.api_addr
    }
}

/// Handle used to stop a spawned service.
pub struct ShutdownHandle {
    tx: watch::Sender<()>,
    tasks: Vec<JoinHandle<()>>,
}

impl ShutdownHandle {
    /// Signal shutdown and wait for the background tasks to finish.
    pub async fn shutdown(self) {
        let _ = self.tx.send(());
        for task in self.tasks {
            if let Err(err) = task.await {
                error!(error = %err, "background task terminated abnormally");
            }
        }
    }
}

/// Spawn the sync processor and admin API for an initialized state.
pub async fn spawn_service(state: AppState) -> anyhow::Result<(ServiceState, ShutdownHandle)> {
    let share = Arc::new(Share::new(state.config.share.clone())?);
    let remote = Arc::new(HttpTree::new(&share.config().remote_prefix)?);
    let queue = Arc::new(
        SqliteQueue::new(&state.queue_db_path)
            .await
            .context("opening request queue")?,
    );
    let overlay = OverlayTree::new(share.clone(), remote.clone(), queue.clone())?;
    let work = FsTree::new(&share.config().work_path)?;

    let (shutdown_tx, shutdown_rx) = watch::channel(());

    let processor = SyncProcessor::new(
        remote,
        queue.clone(),
        work,
        share.events().clone(),
        state.config.sync.clone(),
    )
    .spawn(shutdown_rx.clone());

    let addr = SocketAddr::from(([127, 0, 0, 1], state.config.api_port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding admin API to {}", addr))?;
    let api_addr = listener.local_addr()?;
    info!(addr = %api_addr, "admin API listening");

    let service_state = ServiceState {
        share,
        queue,
        overlay,
        api_addr,
    };

    let router = http_server::router(service_state.clone());
    let mut server_shutdown = shutdown_rx.clone();
    let server = tokio::spawn(async move {
        let serve = axum::serve(listener, router).with_graceful_shutdown(async move {
            let _ = server_shutdown.changed().await;
        });
        if let Err(err) = serve.await {
            error!(error = %err, "admin API server failed");
        }
    });

    Ok((
        service_state,
        ShutdownHandle {
            tx: shutdown_tx,
            tasks: vec![processor, server],
        },
    ))
}

/// Run the service in the foreground until interrupted.
pub async fn start_service(state: AppState) -> anyhow::Result<()> {
    let share_id = state.config.share.id;
    let (_service, handle) = spawn_service(state).await?;
    info!(share = %share_id, "cirrus daemon running");

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    info!("shutdown signal received");

    handle.shutdown().await;
    Ok(())
}
