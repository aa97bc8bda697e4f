//! Video processing worker binary.

use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use vproc_media::FfmpegMedia;
use vproc_queue::JobQueue;
use vproc_storage::LocalStorage;
use vproc_store::RedisVideoStore;
use vproc_worker::{PipelineExecutor, PipelineSettings, Shutdown, WorkerConfig, WorkerPool};

#[tokio::main]
async fn main() {
    // Load environment variables
    dotenvy::dotenv().ok();

    init_tracing();

    info!("Starting vproc-worker");

    if let Err(e) = run().await {
        error!("Worker error: {:#}", e);
        std::process::exit(1);
    }

    info!("Worker shutdown complete");
}

/// Colored output for dev, JSON for production.
fn init_tracing() {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let mut env_filter = EnvFilter::from_default_env();
    for directive in ["vproc=info", "vproc_worker=info"] {
        if let Ok(directive) = directive.parse() {
            env_filter = env_filter.add_directive(directive);
        }
    }

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }
}

async fn run() -> anyhow::Result<()> {
    let config = WorkerConfig::from_env()?;
    info!("Worker config: {:?}", config);

    if let Some(addr) = config.metrics_addr {
        vproc_worker::metrics::install_prometheus(addr)?;
        info!("Serving metrics on {}", addr);
    }

    let queue = JobQueue::from_env()?;
    queue.init().await?;

    let store = RedisVideoStore::from_env()?;
    let storage = LocalStorage::from_env();
    tokio::fs::create_dir_all(&config.work_dir).await?;

    let shutdown = Shutdown::new();
    let media = FfmpegMedia::new()
        .with_timeout(config.ffmpeg_timeout)
        .with_cancel(shutdown.abort_signal());

    let executor = PipelineExecutor::new(
        Arc::new(store),
        Arc::new(media),
        storage,
        PipelineSettings {
            max_video_duration: config.max_video_duration,
            work_dir: config.work_dir.clone(),
        },
    );

    let pool = WorkerPool::new(config, Arc::new(queue), Arc::new(executor), shutdown);

    // Setup signal handlers
    let handle = pool.shutdown_handle();
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("Received shutdown signal");
        handle.shutdown();
    });

    pool.run().await?;
    Ok(())
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(_) => {
            tokio::signal::ctrl_c().await.ok();
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    tokio::signal::ctrl_c().await.ok();
}
