use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Instant;

use chrono::{NaiveDate, Utc};
use tracing::{debug, info, warn};

use crate::grid::{self, build_grid, Grid};
use crate::limits::MAX_LINES_PER_VIEW;
use crate::model::*;
use crate::observability::*;
use crate::pipeline::Pipeline;

use super::{Board, BoardError, BoardView, Health};

impl Board {
    /// Switch to a new window and load it. A result that arrives after yet
    /// another window change is discarded with [`BoardError::StaleSnapshot`].
    pub async fn set_window(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Arc<BoardView>, BoardError> {
        let window = grid::window(start, end)?;
        self.target.send_modify(|(generation, w)| {
            *generation += 1;
            *w = window;
        });
        info!(%window, "window changed");
        self.resnapshot().await
    }

    /// Grid for `window`, fetching it first unless it is already shown.
    pub async fn get_grid(&self, start: NaiveDate, end: NaiveDate) -> Result<Arc<Grid>, BoardError> {
        let window = grid::window(start, end)?;
        let current = self.view();
        let (generation, requested) = *self.target.borrow();
        if current.seq > 0 && current.window == window && current.generation == generation {
            return Ok(current.grid.clone());
        }
        let view = if requested == window {
            self.resnapshot().await?
        } else {
            self.set_window(start, end).await?
        };
        Ok(view.grid.clone())
    }

    /// Refetch everything for the requested window and replace the view.
    /// Provisional moves do not survive this.
    pub async fn resnapshot(&self) -> Result<Arc<BoardView>, BoardError> {
        let (generation, window) = *self.target.borrow();
        let seq = self.fetch_seq.fetch_add(1, Ordering::SeqCst) + 1;

        let fetched = async {
            let lines = self.store.list_equipment_lines().await?;
            let reservations = self.store.list_reservations(window).await?;
            Ok::<_, BoardError>((lines, reservations))
        }
        .await;
        let (lines, reservations) = match fetched {
            Ok(data) => data,
            Err(e) => {
                metrics::counter!(RESNAPSHOTS_TOTAL, "outcome" => "failed").increment(1);
                metrics::counter!(FETCH_FAILURES_TOTAL).increment(1);
                return Err(e);
            }
        };

        if self.target.borrow().0 != generation {
            return Err(self.stale(generation, seq));
        }

        let view = build_view(generation, seq, window, lines, reservations)?;
        let mut slot = Some(view);
        let installed = self.view.send_if_modified(|current| {
            let newer = (generation, seq) > (current.generation, current.seq);
            if !newer || self.target.borrow().0 != generation {
                return false;
            }
            match slot.take() {
                Some(view) => {
                    *current = Arc::new(view);
                    true
                }
                None => false,
            }
        });
        if !installed {
            return Err(self.stale(generation, seq));
        }

        metrics::counter!(RESNAPSHOTS_TOTAL, "outcome" => "installed").increment(1);
        metrics::gauge!(DEGRADED).set(0.0);
        let view = self.view();
        debug!(
            generation,
            seq,
            reservations = view.pipeline.len(),
            overflow = view.grid.overflow.len(),
            "snapshot installed"
        );
        Ok(view)
    }

    fn stale(&self, generation: u64, seq: u64) -> BoardError {
        metrics::counter!(RESNAPSHOTS_TOTAL, "outcome" => "stale").increment(1);
        debug!(generation, seq, "discarding superseded snapshot");
        BoardError::StaleSnapshot { generation }
    }

    /// Flag the current view as degraded after repeated fetch failures.
    pub fn mark_degraded(&self, failures: u32, last_error: impl Into<String>) {
        let last_error = last_error.into();
        let first = !self.view().is_degraded();
        self.update_view(|v| {
            v.health = Health::Degraded {
                failures,
                last_error: last_error.clone(),
            };
            true
        });
        metrics::gauge!(DEGRADED).set(1.0);
        if first {
            warn!(failures, error = %last_error, "board degraded: showing last good view");
        }
    }

    pub fn mark_live(&self) {
        let changed = self.update_view(|v| {
            if v.health == Health::Live {
                return false;
            }
            v.health = Health::Live;
            true
        });
        if changed {
            metrics::gauge!(DEGRADED).set(0.0);
            info!("board live again");
        }
    }
}

/// Build a complete view from fetched data. Synchronous and pure apart from
/// metrics.
fn build_view(
    generation: u64,
    seq: u64,
    window: DateSpan,
    lines: Vec<EquipmentLine>,
    reservations: Vec<Reservation>,
) -> Result<BoardView, BoardError> {
    if lines.len() > MAX_LINES_PER_VIEW {
        return Err(BoardError::LimitExceeded("too many equipment lines"));
    }
    let started = Instant::now();
    let grid = build_grid(&lines, &reservations, window.start, window.end)?;
    metrics::counter!(GRID_BUILDS_TOTAL).increment(1);
    metrics::histogram!(GRID_BUILD_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
    if !grid.overflow.is_empty() {
        warn!(
            count = grid.overflow.len(),
            %window,
            "double-booked lines in window; see grid overflow"
        );
    }

    let pipeline = Pipeline::from_snapshot(reservations.into_iter().map(Arc::new));
    Ok(BoardView {
        generation,
        seq,
        window,
        lines: Arc::new(lines),
        grid: Arc::new(grid),
        pipeline,
        health: Health::Live,
        built_at: Utc::now(),
    })
}
