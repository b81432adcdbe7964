use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio_test::{assert_err, assert_ok};

use super::*;
use crate::intents::{Direction, Intent, Outcome, TransitionIntent};
use crate::model::fixtures::*;
use crate::store::{ChangeStream, MemoryStore, Seed, StoreError};

/// Wraps a [`MemoryStore`] and can park the next N list or transition calls
/// until released.
#[derive(Default)]
struct GatedStore {
    inner: MemoryStore,
    hold_lists: AtomicUsize,
    hold_transitions: AtomicUsize,
    entered: Notify,
    release: Notify,
    list_calls: AtomicUsize,
    transition_calls: AtomicUsize,
}

impl GatedStore {
    fn take(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    async fn gate(&self, counter: &AtomicUsize) {
        if Self::take(counter) {
            self.entered.notify_one();
            self.release.notified().await;
        }
    }
}

#[async_trait]
impl ReservationStore for GatedStore {
    async fn list_equipment_lines(&self) -> Result<Vec<EquipmentLine>, StoreError> {
        self.inner.list_equipment_lines().await
    }

    async fn list_reservations(&self, window: DateSpan) -> Result<Vec<Reservation>, StoreError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        self.gate(&self.hold_lists).await;
        self.inner.list_reservations(window).await
    }

    async fn request_status_change(
        &self,
        id: Ulid,
        to: Status,
        comment: Option<String>,
        actor: &str,
    ) -> Result<TransitionRecord, StoreError> {
        self.transition_calls.fetch_add(1, Ordering::SeqCst);
        self.gate(&self.hold_transitions).await;
        self.inner.request_status_change(id, to, comment, actor).await
    }

    async fn subscribe_changes(&self) -> Result<ChangeStream, StoreError> {
        self.inner.subscribe_changes().await
    }
}

/// Fails the next N fetches with `Unavailable`.
#[derive(Default)]
struct FlakyStore {
    inner: MemoryStore,
    failures: AtomicU32,
}

#[async_trait]
impl ReservationStore for FlakyStore {
    async fn list_equipment_lines(&self) -> Result<Vec<EquipmentLine>, StoreError> {
        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(StoreError::Unavailable("connection reset".into()));
        }
        self.inner.list_equipment_lines().await
    }

    async fn list_reservations(&self, window: DateSpan) -> Result<Vec<Reservation>, StoreError> {
        self.inner.list_reservations(window).await
    }

    async fn request_status_change(
        &self,
        id: Ulid,
        to: Status,
        comment: Option<String>,
        actor: &str,
    ) -> Result<TransitionRecord, StoreError> {
        self.inner.request_status_change(id, to, comment, actor).await
    }

    async fn subscribe_changes(&self) -> Result<ChangeStream, StoreError> {
        self.inner.subscribe_changes().await
    }
}

/// Two lines; `r1` on line a for days 1-5, `r2` on line a for 3-7 and
/// `r3` on line b for 10-12.
async fn seeded(store: &MemoryStore) -> Vec<Reservation> {
    let a = line("a");
    let b = line("b");
    let r1 = reservation(&[&a], 1, 5);
    let r2 = reservation(&[&a], 3, 7);
    let r3 = reservation(&[&b], 10, 12);
    store
        .load_seed(Seed {
            lines: vec![a, b],
            reservations: vec![r1.clone(), r2.clone(), r3.clone()],
        })
        .await;
    vec![r1, r2, r3]
}

async fn open_memory() -> (Arc<MemoryStore>, Arc<Board>, Vec<Reservation>) {
    let store = Arc::new(MemoryStore::new());
    let rs = seeded(&store).await;
    let board = Board::open(store.clone(), day(1), day(31), "admin")
        .await
        .unwrap();
    (store, board, rs)
}

#[tokio::test]
async fn open_loads_grid_and_pipeline() {
    let (_store, board, rs) = open_memory().await;
    let view = board.view();

    assert_eq!(view.seq, 1);
    assert_eq!(view.window, DateSpan::new(day(1), day(31)));
    assert_eq!(view.lines.len(), 2);
    assert_eq!(view.grid.spans.len(), 2);
    assert_eq!(view.grid.overflow.len(), 1);
    assert_eq!(view.grid.overflow[0].reservation_id, rs[1].id);
    assert_eq!(view.grid.overflow[0].blocked_by, rs[0].id);

    let columns = board.get_columns();
    assert_eq!(columns.len(), Status::ALL.len());
    assert_eq!(columns[Status::Pending.index()].len(), 3);
    assert!(columns[Status::Confirmed.index()].is_empty());
}

#[tokio::test]
async fn rejects_inverted_window() {
    let store: Arc<dyn ReservationStore> = Arc::new(MemoryStore::new());
    let err = Board::new(store.clone(), day(5), day(1), "admin").err();
    assert!(matches!(err, Some(BoardError::InvalidWindow(_))));

    let board = Board::new(store, day(1), day(5), "admin").unwrap();
    let err = assert_err!(board.set_window(day(9), day(2)).await);
    assert!(matches!(err, BoardError::InvalidWindow(_)));
    assert_eq!(board.requested_window(), DateSpan::new(day(1), day(5)));
}

#[tokio::test]
async fn single_day_window_is_valid() {
    let (_store, board, rs) = open_memory().await;
    let view = assert_ok!(board.set_window(day(3), day(3)).await);
    assert_eq!(view.grid.days(), 1);
    assert_eq!(view.grid.spans.len(), 1);
    assert_eq!(view.grid.spans[0].reservation_id, rs[0].id);
}

#[tokio::test]
async fn accepted_transition_is_confirmed_in_place() {
    let store = Arc::new(MemoryStore::new());
    let rs = seeded(&store).await;
    let board = Arc::new(
        Board::new(store.clone(), day(1), day(31), "anna")
            .unwrap()
            .with_notes(store.clone()),
    );
    board.resnapshot().await.unwrap();
    let id = rs[0].id;

    let record = assert_ok!(
        board
            .request_transition(id, Status::Confirmed, Some("paid deposit".into()))
            .await
    );
    assert_eq!(record.from, Status::Pending);
    assert_eq!(record.to, Status::Confirmed);
    assert_eq!(record.actor, "anna");

    let view = board.view();
    assert_eq!(view.pipeline.column_of(&id), Some(Status::Confirmed));
    assert!(!view.pipeline.is_provisional(&id));
    assert!(!board.is_in_flight(&id));
    assert_eq!(store.get(&id).unwrap().status, Status::Confirmed);

    let history = board.history(&id);
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].comment.as_deref(), Some("paid deposit"));

    let notes = board.notes(id).await.unwrap();
    assert_eq!(notes.len(), 1);
    assert_eq!(notes[0].text, "paid deposit");
    assert_eq!(notes[0].author, "anna");
}

#[tokio::test]
async fn rejected_submit_snaps_back() {
    let (store, board, rs) = open_memory().await;
    let id = rs[0].id;
    let intent = TransitionIntent {
        id,
        from: Status::Pending,
        to: Status::Completed,
    };

    let err = board.submit(intent, None).await.unwrap_err();
    assert!(matches!(err, BoardError::TransitionRejected { id: rid, .. } if rid == id));

    let view = board.view();
    assert_eq!(view.pipeline.column_of(&id), Some(Status::Pending));
    assert!(!view.pipeline.is_provisional(&id));
    assert!(view.pipeline.column(Status::Completed).is_empty());
    assert_eq!(store.get(&id).unwrap().status, Status::Pending);
    assert!(board.history(&id).is_empty());
    assert!(!board.is_in_flight(&id));
}

#[tokio::test]
async fn overlong_comment_is_refused_before_sending() {
    let store = Arc::new(GatedStore::default());
    let rs = seeded(&store.inner).await;
    let board = Board::open(store.clone(), day(1), day(31), "admin")
        .await
        .unwrap();

    let comment = "x".repeat(crate::limits::MAX_COMMENT_LEN + 1);
    let err = board
        .request_transition(rs[0].id, Status::Confirmed, Some(comment))
        .await
        .unwrap_err();
    assert!(matches!(err, BoardError::LimitExceeded(_)));
    assert_eq!(store.transition_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn second_request_while_in_flight_is_dropped() {
    let store = Arc::new(GatedStore::default());
    let rs = seeded(&store.inner).await;
    let board = Board::open(store.clone(), day(1), day(31), "admin")
        .await
        .unwrap();
    let id = rs[0].id;
    store.hold_transitions.store(1, Ordering::SeqCst);

    let first = board.spawn_submit(
        TransitionIntent {
            id,
            from: Status::Pending,
            to: Status::Confirmed,
        },
        None,
    );
    store.entered.notified().await;

    assert!(board.is_in_flight(&id));
    assert!(board.view().pipeline.is_provisional(&id));
    assert_eq!(board.view().pipeline.column_of(&id), Some(Status::Confirmed));

    let err = board
        .request_transition(id, Status::Cancelled, None)
        .await
        .unwrap_err();
    assert_eq!(err, BoardError::TransitionInFlight(id));

    // A different reservation is not blocked.
    assert_ok!(board.request_transition(rs[2].id, Status::Confirmed, None).await);

    store.release.notify_one();
    let record = first.await.unwrap().unwrap();
    assert_eq!(record.to, Status::Confirmed);
    assert_eq!(store.transition_calls.load(Ordering::SeqCst), 2);
    assert_eq!(store.inner.transitions(&id).len(), 1);
    assert!(!board.is_in_flight(&id));
    assert!(!board.view().pipeline.is_provisional(&id));
}

#[tokio::test]
async fn repeated_identical_request_is_not_sent_twice() {
    let store = Arc::new(GatedStore::default());
    let rs = seeded(&store.inner).await;
    let board = Board::open(store.clone(), day(1), day(31), "admin")
        .await
        .unwrap();
    let id = rs[0].id;
    store.hold_transitions.store(1, Ordering::SeqCst);

    let first = {
        let board = board.clone();
        tokio::spawn(async move { board.request_transition(id, Status::Confirmed, None).await })
    };
    store.entered.notified().await;

    let err = assert_err!(board.request_transition(id, Status::Confirmed, None).await);
    assert_eq!(err, BoardError::TransitionInFlight(id));

    store.release.notify_one();
    let record = assert_ok!(first.await.unwrap());
    assert_eq!(record.from, Status::Pending);
    assert_eq!(record.to, Status::Confirmed);
    assert_eq!(store.transition_calls.load(Ordering::SeqCst), 1);
    assert_eq!(store.inner.transitions(&id).len(), 1);
    assert_eq!(board.view().pipeline.column_of(&id), Some(Status::Confirmed));
}

#[tokio::test]
async fn abandoned_request_releases_in_flight_slot() {
    let store = Arc::new(GatedStore::default());
    let rs = seeded(&store.inner).await;
    let board = Board::open(store.clone(), day(1), day(31), "admin")
        .await
        .unwrap();
    let id = rs[0].id;
    store.hold_transitions.store(1, Ordering::SeqCst);

    let task = {
        let board = board.clone();
        tokio::spawn(async move { board.request_transition(id, Status::Confirmed, None).await })
    };
    store.entered.notified().await;
    assert!(board.is_in_flight(&id));

    task.abort();
    assert!(task.await.unwrap_err().is_cancelled());
    assert!(!board.is_in_flight(&id));
}

#[tokio::test]
async fn resnapshot_discards_optimistic_moves() {
    let (store, board, rs) = open_memory().await;
    let id = rs[0].id;

    assert_eq!(board.apply_optimistic(id, Status::PickedUp), Ok(Status::Pending));
    assert!(board.view().pipeline.is_provisional(&id));

    // Someone else confirms it meanwhile.
    let mut changed = store.get(&id).unwrap();
    changed.status = Status::Confirmed;
    store.upsert_reservation(changed);

    let view = board.resnapshot().await.unwrap();
    assert_eq!(view.pipeline.pending_moves(), 0);
    assert_eq!(view.pipeline.column_of(&id), Some(Status::Confirmed));
}

#[tokio::test]
async fn optimistic_move_on_unknown_reservation_fails() {
    let (_store, board, _rs) = open_memory().await;
    let ghost = Ulid::new();
    assert_eq!(
        board.apply_optimistic(ghost, Status::Confirmed),
        Err(BoardError::NotFound(ghost))
    );
    assert!(!board.revert(&ghost));
}

#[tokio::test]
async fn superseded_window_fetch_is_discarded() {
    let store = Arc::new(GatedStore::default());
    seeded(&store.inner).await;
    let board = Board::open(store.clone(), day(1), day(31), "admin")
        .await
        .unwrap();
    store.hold_lists.store(1, Ordering::SeqCst);

    let slow = {
        let board = board.clone();
        tokio::spawn(async move { board.set_window(day(1), day(7)).await })
    };
    store.entered.notified().await;

    let fast = board.set_window(day(8), day(14)).await.unwrap();
    assert_eq!(fast.window, DateSpan::new(day(8), day(14)));

    store.release.notify_one();
    let err = slow.await.unwrap().unwrap_err();
    assert!(matches!(err, BoardError::StaleSnapshot { .. }));

    let view = board.view();
    assert_eq!(view.window, DateSpan::new(day(8), day(14)));
    assert_eq!(view.grid.spans.len(), 1);
}

#[tokio::test]
async fn get_grid_reuses_current_view() {
    let store = Arc::new(GatedStore::default());
    seeded(&store.inner).await;
    let board = Board::open(store.clone(), day(1), day(31), "admin")
        .await
        .unwrap();
    assert_eq!(store.list_calls.load(Ordering::SeqCst), 1);

    let grid = board.get_grid(day(1), day(31)).await.unwrap();
    assert_eq!(store.list_calls.load(Ordering::SeqCst), 1);
    assert!(Arc::ptr_eq(&grid, &board.view().grid));

    let other = board.get_grid(day(2), day(4)).await.unwrap();
    assert_eq!(store.list_calls.load(Ordering::SeqCst), 2);
    assert_eq!(other.days(), 3);
    assert_eq!(board.requested_window(), DateSpan::new(day(2), day(4)));
}

#[tokio::test]
async fn failed_fetch_keeps_last_good_view() {
    let store = Arc::new(FlakyStore::default());
    seeded(&store.inner).await;
    let board = Board::open(store.clone(), day(1), day(31), "admin")
        .await
        .unwrap();
    let before = board.view();

    store.failures.store(1, Ordering::SeqCst);
    let err = board.resnapshot().await.unwrap_err();
    assert!(err.is_transient());
    assert!(Arc::ptr_eq(&before, &board.view()));

    board.mark_degraded(3, err.to_string());
    let view = board.view();
    assert!(view.is_degraded());
    assert_eq!(view.seq, before.seq);
    assert_eq!(view.grid.spans, before.grid.spans);

    board.resnapshot().await.unwrap();
    assert_eq!(board.view().health, Health::Live);
}

#[tokio::test]
async fn mark_live_only_notifies_on_change() {
    let (_store, board, _rs) = open_memory().await;
    let mut rx = board.subscribe();
    rx.mark_unchanged();

    board.mark_live();
    assert!(!rx.has_changed().unwrap());

    board.mark_degraded(1, "timeout");
    assert!(rx.has_changed().unwrap());
    rx.mark_unchanged();

    board.mark_live();
    assert!(rx.has_changed().unwrap());
    assert!(!board.view().is_degraded());
}

#[tokio::test]
async fn same_column_drop_reorders_without_store() {
    let store = Arc::new(GatedStore::default());
    seeded(&store.inner).await;
    let board = Board::open(store.clone(), day(1), day(31), "admin")
        .await
        .unwrap();
    let before = board.view().pipeline.column(Status::Pending).ids();

    assert_eq!(board.handle_intent(Intent::DragStart { id: before[0] }), None);
    let outcome = board.handle_intent(Intent::DragEnd {
        over: Some(Status::Pending),
        index: Some(2),
    });
    assert_eq!(
        outcome,
        Some(Outcome::Reorder {
            id: before[0],
            index: 2
        })
    );

    let after = board.view().pipeline.column(Status::Pending).ids();
    assert_eq!(after, vec![before[1], before[2], before[0]]);
    assert_eq!(store.transition_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn dispatch_key_move_submits_transition() {
    let (store, board, rs) = open_memory().await;
    let id = rs[2].id;

    let handle = board
        .dispatch(Intent::KeyMove {
            id,
            direction: Direction::Next,
        })
        .unwrap();
    let record = handle.await.unwrap().unwrap();
    assert_eq!(record.to, Status::Confirmed);
    assert_eq!(store.get(&id).unwrap().status, Status::Confirmed);
    assert_eq!(board.view().pipeline.column_of(&id), Some(Status::Confirmed));

    // Nothing before the first column.
    assert!(
        board
            .dispatch(Intent::KeyMove {
                id: rs[0].id,
                direction: Direction::Prev,
            })
            .is_none()
    );
}

#[tokio::test]
async fn labels_follow_span_width() {
    let (_store, board, rs) = open_memory().await;
    let view = board.view();
    let span = view.grid.spans_for(&rs[0].id).next().unwrap();
    let label = board.label(span, Some(400)).unwrap();
    assert!(label.starts_with("Kowalski"));
    assert!(label.contains("09:00 - 17:00"));
}
