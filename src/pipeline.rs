//! Kanban view of reservations bucketed by status.
//!
//! A [`Pipeline`] is built from one snapshot and then only changed through
//! local, provisional operations: optimistic moves, their reversal, confirmed
//! moves and cosmetic reordering. None of these reach the store; the next
//! snapshot replaces the whole thing.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use ulid::Ulid;

use crate::model::{Reservation, Status};

/// A reservation's column is its status.
pub fn classify(reservation: &Reservation) -> Status {
    reservation.status
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnEntry {
    pub reservation: Arc<Reservation>,
    /// Shown here ahead of store confirmation.
    pub provisional: bool,
}

impl ColumnEntry {
    pub fn id(&self) -> Ulid {
        self.reservation.id
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PipelineColumn {
    pub status: Status,
    pub entries: Vec<ColumnEntry>,
}

impl PipelineColumn {
    pub fn ids(&self) -> Vec<Ulid> {
        self.entries.iter().map(ColumnEntry::id).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn position(&self, id: &Ulid) -> Option<usize> {
        self.entries.iter().position(|e| &e.reservation.id == id)
    }

    /// Insert keeping update-time order; equal times fall back to id.
    fn insert_ordered(&mut self, entry: ColumnEntry) {
        let key = (entry.reservation.updated_at, entry.reservation.id);
        let pos = self
            .entries
            .partition_point(|e| (e.reservation.updated_at, e.reservation.id) <= key);
        self.entries.insert(pos, entry);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pipeline {
    columns: Vec<PipelineColumn>,
    /// Confirmed reservation data from the snapshot, updated by `confirm`.
    confirmed: HashMap<Ulid, Arc<Reservation>>,
    /// Provisional column per reservation, when it differs from confirmed.
    optimistic: HashMap<Ulid, Status>,
}

impl Pipeline {
    pub fn from_snapshot<I>(reservations: I) -> Self
    where
        I: IntoIterator<Item = Arc<Reservation>>,
    {
        let mut columns: Vec<PipelineColumn> = Status::ALL
            .iter()
            .map(|&status| PipelineColumn {
                status,
                entries: Vec::new(),
            })
            .collect();
        let mut confirmed = HashMap::new();
        for r in reservations {
            confirmed.insert(r.id, r.clone());
        }
        for r in confirmed.values() {
            columns[classify(r).index()].entries.push(ColumnEntry {
                reservation: r.clone(),
                provisional: false,
            });
        }
        for col in &mut columns {
            col.entries
                .sort_by_key(|e| (e.reservation.updated_at, e.reservation.id));
        }
        Self {
            columns,
            confirmed,
            optimistic: HashMap::new(),
        }
    }

    pub fn columns(&self) -> &[PipelineColumn] {
        &self.columns
    }

    pub fn column(&self, status: Status) -> &PipelineColumn {
        &self.columns[status.index()]
    }

    pub fn len(&self) -> usize {
        self.confirmed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.confirmed.is_empty()
    }

    pub fn get(&self, id: &Ulid) -> Option<&Arc<Reservation>> {
        self.confirmed.get(id)
    }

    /// Column the reservation is displayed in, provisional moves included.
    pub fn column_of(&self, id: &Ulid) -> Option<Status> {
        self.optimistic
            .get(id)
            .copied()
            .or_else(|| self.confirmed.get(id).map(|r| classify(r)))
    }

    pub fn confirmed_status(&self, id: &Ulid) -> Option<Status> {
        self.confirmed.get(id).map(|r| classify(r))
    }

    pub fn is_provisional(&self, id: &Ulid) -> bool {
        self.optimistic.contains_key(id)
    }

    pub fn pending_moves(&self) -> usize {
        self.optimistic.len()
    }

    /// Show `id` in `to`'s column before the store has answered. Returns the
    /// column it left, or `None` if the reservation is not in this view.
    pub fn apply_optimistic(&mut self, id: Ulid, to: Status) -> Option<Status> {
        let current = self.column_of(&id)?;
        if current == to {
            return Some(current);
        }
        let confirmed = self.confirmed_status(&id)?;
        let mut entry = self.detach(&id, current)?;
        if to == confirmed {
            self.optimistic.remove(&id);
            entry.provisional = false;
            self.columns[to.index()].insert_ordered(entry);
        } else {
            self.optimistic.insert(id, to);
            entry.provisional = true;
            self.columns[to.index()].entries.push(entry);
        }
        Some(current)
    }

    /// Drop a provisional move and put the reservation back in its confirmed
    /// column. Idempotent: returns `false` when there was nothing to undo.
    pub fn revert(&mut self, id: &Ulid) -> bool {
        let Some(shown) = self.optimistic.remove(id) else {
            return false;
        };
        let Some(confirmed) = self.confirmed_status(id) else {
            return false;
        };
        if let Some(mut entry) = self.detach(id, shown) {
            entry.provisional = false;
            self.columns[confirmed.index()].insert_ordered(entry);
        }
        true
    }

    /// Record a store-accepted status change.
    pub fn confirm(&mut self, id: Ulid, to: Status, at: chrono::DateTime<chrono::Utc>) -> bool {
        let Some(shown) = self.column_of(&id) else {
            return false;
        };
        let Some(old) = self.confirmed.get(&id) else {
            return false;
        };
        let mut updated = Reservation::clone(old);
        updated.status = to;
        updated.updated_at = at;
        let updated = Arc::new(updated);
        self.confirmed.insert(id, updated.clone());
        self.optimistic.remove(&id);

        self.detach(&id, shown);
        // Accepted moves land at the end: they are the newest update.
        self.columns[to.index()].entries.push(ColumnEntry {
            reservation: updated,
            provisional: false,
        });
        true
    }

    /// Move `id` to `index` within its current column. Display only; lost on
    /// the next snapshot.
    pub fn reorder(&mut self, id: &Ulid, index: usize) -> bool {
        let Some(status) = self.column_of(id) else {
            return false;
        };
        let col = &mut self.columns[status.index()];
        let Some(from) = col.position(id) else {
            return false;
        };
        let entry = col.entries.remove(from);
        let to = index.min(col.entries.len());
        col.entries.insert(to, entry);
        true
    }

    fn detach(&mut self, id: &Ulid, from: Status) -> Option<ColumnEntry> {
        let col = &mut self.columns[from.index()];
        let pos = col.position(id)?;
        Some(col.entries.remove(pos))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures::*;
    use chrono::{DateTime, Duration};

    fn snapshot(n: usize) -> (Pipeline, Vec<Arc<Reservation>>) {
        let a = line("a");
        let base = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let rs: Vec<_> = (0..n)
            .map(|i| {
                let mut r = reservation(&[&a], 1, 2);
                r.updated_at = base + Duration::minutes(i as i64);
                Arc::new(r)
            })
            .collect();
        (Pipeline::from_snapshot(rs.clone()), rs)
    }

    #[test]
    fn columns_follow_status_order() {
        let (p, _) = snapshot(0);
        let statuses: Vec<_> = p.columns().iter().map(|c| c.status).collect();
        assert_eq!(statuses, Status::ALL.to_vec());
    }

    #[test]
    fn snapshot_orders_by_update_time() {
        let (p, rs) = snapshot(3);
        // Feed in reverse; order must still be by updated_at.
        let reversed = Pipeline::from_snapshot(rs.iter().rev().cloned());
        let expected: Vec<_> = rs.iter().map(|r| r.id).collect();
        assert_eq!(p.column(Status::Pending).ids(), expected);
        assert_eq!(reversed.column(Status::Pending).ids(), expected);
    }

    #[test]
    fn optimistic_move_and_revert() {
        let (mut p, rs) = snapshot(3);
        let id = rs[1].id;
        assert_eq!(p.apply_optimistic(id, Status::Confirmed), Some(Status::Pending));
        assert_eq!(p.column_of(&id), Some(Status::Confirmed));
        assert_eq!(p.confirmed_status(&id), Some(Status::Pending));
        assert!(p.column(Status::Confirmed).entries[0].provisional);
        assert_eq!(p.column(Status::Pending).len(), 2);

        assert!(p.revert(&id));
        assert!(!p.revert(&id));
        assert_eq!(p.column_of(&id), Some(Status::Pending));
        // Back in its original slot.
        assert_eq!(
            p.column(Status::Pending).ids(),
            rs.iter().map(|r| r.id).collect::<Vec<_>>()
        );
        assert!(p.column(Status::Confirmed).is_empty());
    }

    #[test]
    fn optimistic_back_to_confirmed_clears_overlay() {
        let (mut p, rs) = snapshot(1);
        let id = rs[0].id;
        p.apply_optimistic(id, Status::Cancelled);
        p.apply_optimistic(id, Status::Pending);
        assert!(!p.is_provisional(&id));
        assert!(!p.column(Status::Pending).entries[0].provisional);
        assert_eq!(p.pending_moves(), 0);
    }

    #[test]
    fn optimistic_unknown_is_none() {
        let (mut p, _) = snapshot(1);
        assert_eq!(p.apply_optimistic(Ulid::new(), Status::Confirmed), None);
    }

    #[test]
    fn confirm_moves_to_end_and_clears_provisional() {
        let (mut p, rs) = snapshot(2);
        let id = rs[0].id;
        p.apply_optimistic(id, Status::Confirmed);
        let at = rs[1].updated_at + Duration::hours(1);
        assert!(p.confirm(id, Status::Confirmed, at));
        assert_eq!(p.confirmed_status(&id), Some(Status::Confirmed));
        assert!(!p.is_provisional(&id));
        let col = p.column(Status::Confirmed);
        assert_eq!(col.ids(), vec![id]);
        assert!(!col.entries[0].provisional);
        assert_eq!(col.entries[0].reservation.updated_at, at);
        // Reverting after confirmation is a no-op.
        assert!(!p.revert(&id));
    }

    #[test]
    fn confirm_without_optimistic_move() {
        let (mut p, rs) = snapshot(1);
        let id = rs[0].id;
        assert!(p.confirm(id, Status::Cancelled, rs[0].updated_at));
        assert_eq!(p.column_of(&id), Some(Status::Cancelled));
        assert!(p.column(Status::Pending).is_empty());
    }

    #[test]
    fn reorder_is_within_column() {
        let (mut p, rs) = snapshot(3);
        assert!(p.reorder(&rs[2].id, 0));
        assert_eq!(
            p.column(Status::Pending).ids(),
            vec![rs[2].id, rs[0].id, rs[1].id]
        );
        assert!(p.reorder(&rs[2].id, 99));
        assert_eq!(p.column(Status::Pending).ids()[2], rs[2].id);
        assert!(!p.reorder(&Ulid::new(), 0));
    }

    #[test]
    fn classify_is_status() {
        let a = line("a");
        let mut r = reservation(&[&a], 1, 1);
        r.status = Status::PickedUp;
        assert_eq!(classify(&r), Status::PickedUp);
    }
}
