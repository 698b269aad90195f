//! Server startup: cache population, watcher, router and graceful shutdown.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use larderconf::LarderConfig;
use pantry::AssetCache;
use tracing::{debug, info};

use crate::live::{Broadcaster, ChangeWatcher, LIVE_ENDPOINT};
use crate::web::{self, WebState};

/// Run the server until SIGINT or SIGTERM.
pub async fn run(config: LarderConfig) -> Result<()> {
    info!("🥫 Larder starting");

    let root = config
        .serve
        .root
        .canonicalize()
        .with_context(|| format!("Cannot resolve root {}", config.serve.root.display()))?;
    if !root.is_dir() {
        bail!("Root {} is not a directory", root.display());
    }
    info!("   Root: {}", root.display());

    let cache = Arc::new(AssetCache::new(
        config.cache.capacity_bytes(),
        config.cache.per_file_limit_bytes(),
    ));

    if cache.is_enabled() {
        let walker = Arc::clone(&cache);
        let walk_root = root.clone();
        let stop_when_full = config.cache.stop_walk_when_full;
        let report = tokio::task::spawn_blocking(move || walker.populate(&walk_root, stop_when_full))
            .await
            .context("Cache population task failed")?;

        info!(
            "   Cached {} files ({} of {})",
            report.admitted,
            human_size(cache.current_size()),
            human_size(cache.capacity_bytes())
        );
        debug!(
            too_large = report.too_large,
            rejected_full = report.rejected_full,
            failed = report.failed,
            stopped_early = report.stopped_early,
            "Cache population finished"
        );
    } else {
        info!("   Cache disabled, every request reads from disk");
    }

    let broadcaster = config.live.watch.then(Broadcaster::new);
    let watcher = broadcaster.as_ref().map(|broadcaster| {
        ChangeWatcher::spawn(
            &root,
            Duration::from_millis(config.live.debounce_ms),
            broadcaster.clone(),
        )
    });

    let state = WebState::from_config(&config, root, cache, broadcaster);
    let base_path = state.base_path.clone();
    let app = web::router(state);

    let addr = config.bind.addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    info!("🥫 Larder ready!");
    info!("   Files: GET http://{}{}/", addr, base_path);
    if watcher.as_ref().is_some_and(|w| w.is_active()) {
        info!("   Live reload: ws://{}{}", addr, LIVE_ENDPOINT);
    }

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    if let Some(watcher) = watcher {
        watcher.shutdown().await;
    }

    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received SIGINT, shutting down...");
        }
        _ = async {
            #[cfg(unix)]
            {
                use tokio::signal::unix::{signal, SignalKind};
                match signal(SignalKind::terminate()) {
                    Ok(mut sigterm) => {
                        sigterm.recv().await;
                    }
                    Err(e) => {
                        tracing::warn!("Cannot listen for SIGTERM: {}", e);
                        std::future::pending::<()>().await;
                    }
                }
            }
            #[cfg(not(unix))]
            {
                std::future::pending::<()>().await;
            }
        } => {
            info!("Received SIGTERM, shutting down...");
        }
    }
}

/// Byte count in B, KB or MB (1024-based).
pub fn human_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = 1024 * KB;

    if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
