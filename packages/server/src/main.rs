use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use common::storage::BlobStore;
use common::storage::filesystem::FilesystemBlobStore;
use common::{HashLocks, MetadataLedger};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use server::build_router;
use server::config::AppConfig;
use server::database::init_db;
use server::ledger::SeaOrmLedger;
use server::recovery::RecoveryScanner;
use server::service::ObjectStore;
use server::state::AppState;
use worker::{FfmpegTranscoder, JobQueue, WorkerPool};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = AppConfig::load().context("Failed to load configuration")?;

    let db = init_db(&config.database.url)
        .await
        .context("Failed to initialize database")?;
    let ledger: Arc<dyn MetadataLedger> = Arc::new(SeaOrmLedger::new(db));

    let blobs: Arc<dyn BlobStore> = Arc::new(
        FilesystemBlobStore::new(&config.storage.root)
            .await
            .with_context(|| format!("Failed to open storage at {}", config.storage.root.display()))?,
    );

    let locks = HashLocks::new();
    let (queue, receiver) = JobQueue::bounded(config.worker.queue_capacity);

    let transcoder = Arc::new(FfmpegTranscoder::from_config(&config.worker));
    let pool = WorkerPool::spawn(
        &config.worker,
        receiver,
        Arc::clone(&ledger),
        transcoder,
        locks.clone(),
    );
    info!(
        workers = pool.size(),
        queue_capacity = queue.capacity(),
        ffmpeg = %config.worker.ffmpeg_bin,
        "Worker pool started"
    );

    let recovery = config.recovery.enabled.then(|| {
        let scanner = RecoveryScanner::new(
            Arc::clone(&blobs),
            Arc::clone(&ledger),
            queue.clone(),
            locks.clone(),
            config.recovery.clone(),
        );
        tokio::spawn(scanner.run())
    });

    let store = ObjectStore::new(blobs, ledger, queue, locks, config.storage.clone());
    let app = build_router(AppState {
        store,
        config: config.clone(),
    });

    let listener = tokio::net::TcpListener::bind((config.server.host.as_str(), config.server.port))
        .await
        .with_context(|| format!("Failed to bind {}:{}", config.server.host, config.server.port))?;
    info!("Server running at http://{}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // The router owned the last producer besides the scanner. Once both are
    // gone the workers drain what is buffered and exit.
    if let Some(handle) = recovery {
        handle.abort();
        let _ = handle.await;
    }
    pool.shutdown(SHUTDOWN_GRACE).await;

    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
