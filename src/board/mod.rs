//! The board: one live view (grid + pipeline) over a window of dates.
//!
//! The current view is an immutable `Arc<BoardView>` published on a
//! `watch` channel. Every change, whether a full resnapshot or an optimistic
//! move, builds a new view and swaps it in; readers never observe a view
//! being modified.

mod error;
mod snapshot;
mod transitions;
#[cfg(test)]
mod tests;

pub use error::BoardError;

use std::sync::atomic::AtomicU64;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::watch;
use ulid::Ulid;

use crate::grid::{self, Grid, PlacedSpan};
use crate::intents::DragController;
use crate::labels::LabelPolicy;
use crate::model::*;
use crate::pipeline::{Pipeline, PipelineColumn};
use crate::store::{NoteStore, ReservationStore};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Health {
    Live,
    /// Fetches keep failing; the view shown is the last good one.
    Degraded { failures: u32, last_error: String },
}

#[derive(Debug, Clone)]
pub struct BoardView {
    /// Window generation this view was fetched for.
    pub generation: u64,
    /// Fetch sequence number; 0 before the first snapshot.
    pub seq: u64,
    pub window: DateSpan,
    pub lines: Arc<Vec<EquipmentLine>>,
    pub grid: Arc<Grid>,
    pub pipeline: Pipeline,
    pub health: Health,
    pub built_at: DateTime<Utc>,
}

impl BoardView {
    fn empty(window: DateSpan) -> Self {
        Self {
            generation: 0,
            seq: 0,
            window,
            lines: Arc::new(Vec::new()),
            grid: Arc::new(Grid::empty(window)),
            pipeline: Pipeline::from_snapshot(Vec::new()),
            health: Health::Live,
            built_at: Utc::now(),
        }
    }

    pub fn reservation(&self, id: &Ulid) -> Option<&Arc<Reservation>> {
        self.pipeline.get(id)
    }

    /// Display text for a placed span.
    pub fn label(&self, span: &PlacedSpan, policy: &LabelPolicy, width: Option<u32>) -> Option<String> {
        let r = self.reservation(&span.reservation_id)?;
        Some(policy.render(r, span.visible, width))
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self.health, Health::Degraded { .. })
    }
}

pub struct Board {
    store: Arc<dyn ReservationStore>,
    notes: Option<Arc<dyn NoteStore>>,
    actor: String,
    labels: LabelPolicy,
    /// Requested `(generation, window)`. Bumped on every window change.
    target: watch::Sender<(u64, DateSpan)>,
    view: watch::Sender<Arc<BoardView>>,
    fetch_seq: AtomicU64,
    /// Reservations with an unresolved transition request, and its target.
    in_flight: DashMap<Ulid, Status>,
    /// Accepted transitions seen by this board, oldest first.
    history: DashMap<Ulid, Vec<TransitionRecord>>,
    drag: Mutex<DragController>,
}

impl Board {
    /// Board over `window_start..=window_end` with an empty view. Call
    /// [`Board::resnapshot`] (or start a reconciler) to load data.
    pub fn new(
        store: Arc<dyn ReservationStore>,
        window_start: chrono::NaiveDate,
        window_end: chrono::NaiveDate,
        actor: impl Into<String>,
    ) -> Result<Self, BoardError> {
        let window = grid::window(window_start, window_end)?;
        let actor = actor.into();
        if actor.len() > crate::limits::MAX_ACTOR_LEN {
            return Err(BoardError::LimitExceeded("actor name too long"));
        }
        let (target, _) = watch::channel((0, window));
        let (view, _) = watch::channel(Arc::new(BoardView::empty(window)));
        Ok(Self {
            store,
            notes: None,
            actor,
            labels: LabelPolicy::default(),
            target,
            view,
            fetch_seq: AtomicU64::new(0),
            in_flight: DashMap::new(),
            history: DashMap::new(),
            drag: Mutex::new(DragController::default()),
        })
    }

    pub fn with_labels(mut self, labels: LabelPolicy) -> Self {
        self.labels = labels;
        self
    }

    /// Accepted transition comments are also filed as notes here.
    pub fn with_notes(mut self, notes: Arc<dyn NoteStore>) -> Self {
        self.notes = Some(notes);
        self
    }

    /// Build the board and load its first snapshot.
    pub async fn open(
        store: Arc<dyn ReservationStore>,
        window_start: chrono::NaiveDate,
        window_end: chrono::NaiveDate,
        actor: impl Into<String>,
    ) -> Result<Arc<Self>, BoardError> {
        let board = Arc::new(Self::new(store, window_start, window_end, actor)?);
        board.resnapshot().await?;
        Ok(board)
    }

    pub(crate) fn store(&self) -> &Arc<dyn ReservationStore> {
        &self.store
    }

    pub fn actor(&self) -> &str {
        &self.actor
    }

    pub fn labels(&self) -> &LabelPolicy {
        &self.labels
    }

    /// Current view. Cheap; the view itself is immutable.
    pub fn view(&self) -> Arc<BoardView> {
        self.view.borrow().clone()
    }

    /// Receiver notified on every view swap.
    pub fn subscribe(&self) -> watch::Receiver<Arc<BoardView>> {
        self.view.subscribe()
    }

    /// Window most recently requested; the view may still show an older one.
    pub fn requested_window(&self) -> DateSpan {
        self.target.borrow().1
    }

    pub fn get_columns(&self) -> Vec<PipelineColumn> {
        self.view().pipeline.columns().to_vec()
    }

    pub fn label(&self, span: &PlacedSpan, width: Option<u32>) -> Option<String> {
        self.view().label(span, &self.labels, width)
    }

    pub fn history(&self, id: &Ulid) -> Vec<TransitionRecord> {
        self.history
            .get(id)
            .map(|h| h.value().clone())
            .unwrap_or_default()
    }

    pub async fn notes(&self, id: Ulid) -> Result<Vec<Note>, BoardError> {
        match &self.notes {
            Some(notes) => Ok(notes.list_notes(id).await?),
            None => Ok(Vec::new()),
        }
    }

    /// Swap in a copy of the current view changed by `f`. `f` returns
    /// `false` to leave the view untouched.
    fn update_view(&self, f: impl FnOnce(&mut BoardView) -> bool) -> bool {
        self.view.send_if_modified(|current| {
            let mut next = BoardView::clone(current);
            if !f(&mut next) {
                return false;
            }
            *current = Arc::new(next);
            true
        })
    }
}
