use std::sync::{Arc, PoisonError};
use std::time::Instant;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::intents::{Intent, Outcome, TransitionIntent};
use crate::limits::MAX_COMMENT_LEN;
use crate::model::*;
use crate::observability::*;
use crate::store::StoreError;

use super::{Board, BoardError};

/// Marks a reservation as having a request in flight until dropped, so a
/// cancelled request future still releases it.
struct InFlight<'a> {
    map: &'a DashMap<Ulid, Status>,
    id: Ulid,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.map.remove(&self.id);
    }
}

impl Board {
    fn begin(&self, id: Ulid, to: Status) -> Result<InFlight<'_>, BoardError> {
        match self.in_flight.entry(id) {
            Entry::Occupied(_) => {
                metrics::counter!(TRANSITIONS_TOTAL, "outcome" => "in_flight", "to" => to.as_str())
                    .increment(1);
                debug!(reservation = %id, %to, "transition already in flight; dropped");
                Err(BoardError::TransitionInFlight(id))
            }
            Entry::Vacant(slot) => {
                slot.insert(to);
                Ok(InFlight {
                    map: &self.in_flight,
                    id,
                })
            }
        }
    }

    pub fn is_in_flight(&self, id: &Ulid) -> bool {
        self.in_flight.contains_key(id)
    }

    /// Show `id` in `to`'s column right away, ahead of confirmation. Returns
    /// the column it was displayed in before.
    pub fn apply_optimistic(&self, id: Ulid, to: Status) -> Result<Status, BoardError> {
        let mut from = None;
        self.update_view(|v| {
            from = v.pipeline.apply_optimistic(id, to);
            from.is_some_and(|f| f != to)
        });
        from.ok_or(BoardError::NotFound(id))
    }

    /// Undo a provisional move. Safe to call any number of times.
    pub fn revert(&self, id: &Ulid) -> bool {
        self.update_view(|v| v.pipeline.revert(id))
    }

    /// Cosmetic reorder inside a column. Never reaches the store.
    pub fn reorder(&self, id: &Ulid, index: usize) -> bool {
        self.update_view(|v| v.pipeline.reorder(id, index))
    }

    /// Ask the store to move `id` to `to`. The local view only changes once
    /// the store answers: accepted moves are confirmed in place, refused ones
    /// snap back to the last confirmed column.
    pub async fn request_transition(
        &self,
        id: Ulid,
        to: Status,
        comment: Option<String>,
    ) -> Result<TransitionRecord, BoardError> {
        check_comment(comment.as_deref())?;
        let guard = self.begin(id, to)?;
        let result = self.send_transition(id, to, comment).await;
        drop(guard);
        result
    }

    /// Optimistic move followed by the store request: the drag-and-drop path.
    pub async fn submit(
        &self,
        intent: TransitionIntent,
        comment: Option<String>,
    ) -> Result<TransitionRecord, BoardError> {
        check_comment(comment.as_deref())?;
        let guard = self.begin(intent.id, intent.to)?;
        self.apply_optimistic(intent.id, intent.to)?;
        let result = self.send_transition(intent.id, intent.to, comment).await;
        drop(guard);
        result
    }

    /// Fire-and-forget [`Board::submit`]; failures are logged.
    pub fn spawn_submit(
        self: &Arc<Self>,
        intent: TransitionIntent,
        comment: Option<String>,
    ) -> JoinHandle<Result<TransitionRecord, BoardError>> {
        let board = self.clone();
        tokio::spawn(async move {
            let result = board.submit(intent, comment).await;
            if let Err(e) = &result {
                debug!(reservation = %intent.id, error = %e, "submitted transition failed");
            }
            result
        })
    }

    /// Feed one presentation intent through the drag controller. Cosmetic
    /// reorders are applied immediately; transitions are returned for the
    /// caller to submit.
    pub fn handle_intent(&self, intent: Intent) -> Option<Outcome> {
        let view = self.view();
        let outcome = self
            .drag
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .handle(intent, &view.pipeline);
        if let Some(Outcome::Reorder { id, index }) = outcome {
            self.reorder(&id, index);
        }
        outcome
    }

    /// [`Board::handle_intent`], spawning a submit for any transition.
    pub fn dispatch(
        self: &Arc<Self>,
        intent: Intent,
    ) -> Option<JoinHandle<Result<TransitionRecord, BoardError>>> {
        match self.handle_intent(intent)? {
            Outcome::Transition(t) => Some(self.spawn_submit(t, None)),
            Outcome::Reorder { .. } => None,
        }
    }

    async fn send_transition(
        &self,
        id: Ulid,
        to: Status,
        comment: Option<String>,
    ) -> Result<TransitionRecord, BoardError> {
        let started = Instant::now();
        let result = self
            .store
            .request_status_change(id, to, comment.clone(), &self.actor)
            .await;
        metrics::histogram!(TRANSITION_DURATION_SECONDS).record(started.elapsed().as_secs_f64());

        match result {
            Ok(record) => {
                metrics::counter!(TRANSITIONS_TOTAL, "outcome" => "accepted", "to" => to.as_str())
                    .increment(1);
                info!(reservation = %id, from = %record.from, to = %record.to, actor = %record.actor, "transition accepted");
                self.confirm(&record);
                if let (Some(notes), Some(text)) = (&self.notes, record.comment.clone())
                    && let Err(e) = notes.append_note(id, text, &self.actor).await
                {
                    warn!(reservation = %id, error = %e, "could not file transition comment as note");
                }
                Ok(record)
            }
            Err(StoreError::Rejected(reason)) => {
                metrics::counter!(TRANSITIONS_TOTAL, "outcome" => "rejected", "to" => to.as_str())
                    .increment(1);
                warn!(reservation = %id, %to, %reason, "transition rejected");
                self.revert(&id);
                Err(BoardError::TransitionRejected { id, reason })
            }
            Err(e) => {
                metrics::counter!(TRANSITIONS_TOTAL, "outcome" => "failed", "to" => to.as_str())
                    .increment(1);
                warn!(reservation = %id, %to, error = %e, "transition failed");
                self.revert(&id);
                Err(e.into())
            }
        }
    }

    fn confirm(&self, record: &TransitionRecord) {
        self.history
            .entry(record.reservation_id)
            .or_default()
            .push(record.clone());
        self.update_view(|v| v.pipeline.confirm(record.reservation_id, record.to, record.at));
    }
}

fn check_comment(comment: Option<&str>) -> Result<(), BoardError> {
    if comment.is_some_and(|c| c.len() > MAX_COMMENT_LEN) {
        return Err(BoardError::LimitExceeded("comment too long"));
    }
    Ok(())
}
