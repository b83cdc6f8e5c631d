use anyhow::Result;
use futures::future::join_all;
use kube::Client;
use lb_avi::{AviClient, InMemoryController, Metrics, Pipeline, RestClient, RetryPolicy};
use lb_core::{ObjectStore, Settings, StatusSink, StatusUpdate};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod admin;
mod status_writer;
mod watchers;
mod workers;

use admin::AdminState;
use status_writer::StatusWriter;
use watchers::Dispatcher;
use workers::WorkerPool;

/// Upper bound on waiting for the initial listings before the first full sync
const INITIAL_LIST_TIMEOUT: Duration = Duration::from_secs(120);

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if std::env::var("LOG_FORMAT").map(|v| v == "json").unwrap_or(false) {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    info!("Starting lb-controller...");

    let settings = Arc::new(Settings::load()?);
    info!(
        cluster = %settings.cluster_name,
        tenant = %settings.tenant,
        workers = settings.worker_count,
        dry_run = settings.dry_run,
        "Settings loaded"
    );

    let metrics = Metrics::new()?;
    let avi: Arc<dyn AviClient> = if settings.dry_run {
        info!("Dry run, using the in-memory controller");
        Arc::new(InMemoryController::new())
    } else {
        Arc::new(RestClient::new(&settings.controller)?)
    };
    let client = Client::try_default().await?;

    let (status_tx, status_rx) = mpsc::unbounded_channel::<StatusUpdate>();
    tokio::spawn(StatusWriter::new(client.clone()).run(status_rx));
    let sink: Arc<dyn StatusSink> = Arc::new(status_tx);

    let (pipeline, receivers) = Pipeline::new(
        settings.clone(),
        ObjectStore::new(settings.clone()),
        avi,
        sink,
        metrics.clone(),
        RetryPolicy::default(),
    )?;
    let _retry_handles = pipeline.start_retries(receivers, settings.worker_count);
    let (workers, _worker_handles) = WorkerPool::spawn(pipeline.clone(), settings.worker_count);
    info!("Started {} workers", workers.len());

    let admin_state = Arc::new(AdminState::new(metrics));
    let admin_addr = SocketAddr::from(([0, 0, 0, 0], settings.admin_port));
    let admin = admin_state.clone();
    tokio::spawn(async move {
        if let Err(e) = admin::serve(admin_addr, admin).await {
            error!("Admin server error: {}", e);
        }
    });

    let dispatcher = Arc::new(Dispatcher::new(pipeline.clone(), Arc::new(workers)));
    let (ready, _watch_handles) = watchers::start(client, &settings, dispatcher);

    let listed = ready.len();
    if tokio::time::timeout(INITIAL_LIST_TIMEOUT, join_all(ready)).await.is_err() {
        warn!("Initial listing incomplete after {:?}, syncing anyway", INITIAL_LIST_TIMEOUT);
    } else {
        info!("Listed {} resource kinds", listed);
    }

    pipeline.full_sync().await;
    admin_state.set_ready();

    let interval = Duration::from_secs(settings.full_sync_interval_secs.max(1));
    let periodic = pipeline.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first tick completes immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            periodic.full_sync().await;
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, exiting...");

    Ok(())
}
