use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use rentgrid::board::Board;
use rentgrid::config::Config;
use rentgrid::model::Status;
use rentgrid::reconcile::Reconciler;
use rentgrid::store::{MemoryStore, Seed};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env();
    rentgrid::observability::init(config.metrics_port)?;

    let store = match &config.data_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            MemoryStore::with_journal(&dir.join("transitions.journal"))?
        }
        None => MemoryStore::new(),
    };
    let store = Arc::new(store);

    if let Some(path) = &config.seed {
        let seed: Seed = serde_json::from_slice(&std::fs::read(path)?)?;
        info!(
            path = %path.display(),
            lines = seed.lines.len(),
            reservations = seed.reservations.len(),
            "seed loaded"
        );
        store.load_seed(seed).await;
    }

    let window = config.window_or_month_of(Utc::now().date_naive());
    let board = Arc::new(
        Board::new(store.clone(), window.start, window.end, config.actor.clone())?
            .with_labels(config.labels)
            .with_notes(store.clone()),
    );

    info!("rentgrid board on {window}");
    info!("  actor: {}", config.actor);
    info!(
        "  journal: {}",
        config
            .data_dir
            .as_ref()
            .map_or("disabled".to_string(), |d| d.join("transitions.journal").display().to_string())
    );
    info!(
        "  metrics: {}",
        config
            .metrics_port
            .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );

    let reconciler = Reconciler::new(board.clone(), config.retry);
    let cancel = reconciler.cancel_token();
    let task = reconciler.spawn();

    let mut views = board.subscribe();
    let shutdown = async {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    tokio::select! {
                        _ = ctrl_c => {}
                        _ = sigterm.recv() => {}
                    }
                }
                Err(e) => {
                    warn!("no SIGTERM handler: {e}");
                    ctrl_c.await.ok();
                }
            }
        }
        #[cfg(not(unix))]
        {
            ctrl_c.await.ok();
        }
    };
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            changed = views.changed() => {
                if changed.is_err() {
                    break;
                }
                let view = views.borrow_and_update().clone();
                let columns: Vec<String> = Status::ALL
                    .iter()
                    .map(|&s| format!("{s}={}", view.pipeline.column(s).len()))
                    .collect();
                info!(
                    seq = view.seq,
                    window = %view.window,
                    spans = view.grid.spans.len(),
                    overflow = view.grid.overflow.len(),
                    degraded = view.is_degraded(),
                    columns = %columns.join(" "),
                    "view updated"
                );
            }
            _ = &mut shutdown => {
                info!("shutdown signal received");
                break;
            }
        }
    }

    cancel.cancel();
    if let Err(e) = task.await {
        warn!("reconciler task failed: {e}");
    }
    info!("rentgrid stopped");
    Ok(())
}
