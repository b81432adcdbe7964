use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use futures::StreamExt;
use serde::Deserialize;
use tokio::sync::{broadcast, Mutex, RwLock};
use tracing::{debug, info};
use ulid::Ulid;

use crate::journal::Journal;
use crate::limits::*;
use crate::model::*;
use crate::notify::{NotifyHub, RESERVATIONS};

use super::{ChangeStream, NoteStore, ReservationStore, StoreError};

/// Initial data for a [`MemoryStore`], usually read from JSON.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Seed {
    #[serde(default)]
    pub lines: Vec<EquipmentLine>,
    #[serde(default)]
    pub reservations: Vec<Reservation>,
}

/// In-process reference store. Enforces the default transition policy,
/// keeps an audit trail (optionally journaled to disk) and broadcasts every
/// change on the `reservations` collection.
pub struct MemoryStore {
    lines: RwLock<Vec<EquipmentLine>>,
    reservations: DashMap<Ulid, Reservation>,
    notes: DashMap<Ulid, Vec<Note>>,
    history: DashMap<Ulid, Vec<TransitionRecord>>,
    /// Serializes status changes; holds the journal when one is configured.
    commit: Mutex<Option<Journal>>,
    notify: Arc<NotifyHub>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            lines: RwLock::new(Vec::new()),
            reservations: DashMap::new(),
            notes: DashMap::new(),
            history: DashMap::new(),
            commit: Mutex::new(None),
            notify: Arc::new(NotifyHub::new()),
        }
    }

    /// Store whose transitions are journaled at `path`. Existing records are
    /// replayed into the audit history; a damaged tail is cut off first.
    pub fn with_journal(path: &Path) -> std::io::Result<Self> {
        let (journal, replayed) = Journal::recover(path)?;
        let mut store = Self::new();
        info!(path = %path.display(), records = replayed.len(), "audit journal opened");
        for record in replayed {
            store
                .history
                .entry(record.reservation_id)
                .or_default()
                .push(record);
        }
        store.commit = Mutex::new(Some(journal));
        Ok(store)
    }

    pub async fn load_seed(&self, seed: Seed) {
        *self.lines.write().await = seed.lines;
        for r in seed.reservations {
            self.reservations.insert(r.id, r);
        }
        self.notify.send(RESERVATIONS, ChangeEvent::Resync);
    }

    pub async fn set_lines(&self, lines: Vec<EquipmentLine>) {
        *self.lines.write().await = lines;
        self.notify.send(RESERVATIONS, ChangeEvent::LinesChanged);
    }

    /// Insert or replace a reservation as-is (another admin editing it).
    pub fn upsert_reservation(&self, reservation: Reservation) {
        let id = reservation.id;
        self.reservations.insert(id, reservation);
        self.notify
            .send(RESERVATIONS, ChangeEvent::ReservationUpserted { id });
    }

    pub fn remove_reservation(&self, id: &Ulid) -> Option<Reservation> {
        let removed = self.reservations.remove(id).map(|(_, r)| r);
        if removed.is_some() {
            self.notify
                .send(RESERVATIONS, ChangeEvent::ReservationRemoved { id: *id });
        }
        removed
    }

    pub fn get(&self, id: &Ulid) -> Option<Reservation> {
        self.reservations.get(id).map(|r| r.value().clone())
    }

    pub fn reservation_count(&self) -> usize {
        self.reservations.len()
    }

    /// Audit trail for one reservation, oldest first.
    pub fn transitions(&self, id: &Ulid) -> Vec<TransitionRecord> {
        self.history
            .get(id)
            .map(|h| h.value().clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ReservationStore for MemoryStore {
    async fn list_equipment_lines(&self) -> Result<Vec<EquipmentLine>, StoreError> {
        Ok(self.lines.read().await.clone())
    }

    async fn list_reservations(&self, window: DateSpan) -> Result<Vec<Reservation>, StoreError> {
        let mut hits: Vec<Reservation> = self
            .reservations
            .iter()
            .filter(|r| r.dates.overlaps(&window))
            .map(|r| r.value().clone())
            .collect();
        hits.sort_by(|a, b| a.dates.start.cmp(&b.dates.start).then(a.id.cmp(&b.id)));
        Ok(hits)
    }

    async fn request_status_change(
        &self,
        id: Ulid,
        to: Status,
        comment: Option<String>,
        actor: &str,
    ) -> Result<TransitionRecord, StoreError> {
        if comment.as_ref().is_some_and(|c| c.len() > MAX_COMMENT_LEN) {
            return Err(StoreError::LimitExceeded("comment too long"));
        }
        if actor.len() > MAX_ACTOR_LEN {
            return Err(StoreError::LimitExceeded("actor name too long"));
        }

        let mut journal = self.commit.lock().await;

        let from = self
            .reservations
            .get(&id)
            .map(|r| r.status)
            .ok_or(StoreError::NotFound(id))?;
        if !from.policy_allows(to) {
            return Err(StoreError::Rejected(format!(
                "transition {from} -> {to} is not allowed"
            )));
        }

        let record = TransitionRecord {
            reservation_id: id,
            from,
            to,
            at: Utc::now(),
            comment: comment.filter(|c| !c.trim().is_empty()),
            actor: actor.to_string(),
        };
        if let Some(journal) = journal.as_mut() {
            journal.append(&record)?;
        }

        match self.reservations.get_mut(&id) {
            Some(mut r) => {
                r.status = to;
                r.updated_at = record.at;
            }
            // Removed while we were journaling.
            None => return Err(StoreError::NotFound(id)),
        }
        self.history.entry(id).or_default().push(record.clone());
        drop(journal);

        debug!(reservation = %id, %from, %to, actor, "status changed");
        self.notify
            .send(RESERVATIONS, ChangeEvent::StatusChanged { id, to });
        Ok(record)
    }

    async fn subscribe_changes(&self) -> Result<ChangeStream, StoreError> {
        let rx = self.notify.subscribe(RESERVATIONS);
        let stream = futures::stream::unfold(rx, |mut rx| async move {
            match rx.recv().await {
                Ok(event) => Some((event, rx)),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    debug!(missed, "change subscriber lagged");
                    Some((ChangeEvent::Resync, rx))
                }
                Err(broadcast::error::RecvError::Closed) => None,
            }
        });
        Ok(stream.boxed())
    }
}

#[async_trait]
impl NoteStore for MemoryStore {
    async fn append_note(
        &self,
        reservation_id: Ulid,
        text: String,
        author: &str,
    ) -> Result<Note, StoreError> {
        if text.len() > MAX_NOTE_LEN {
            return Err(StoreError::LimitExceeded("note too long"));
        }
        if !self.reservations.contains_key(&reservation_id) {
            return Err(StoreError::NotFound(reservation_id));
        }
        let note = Note {
            id: Ulid::new(),
            reservation_id,
            text,
            author: author.to_string(),
            at: Utc::now(),
        };
        self.notes
            .entry(reservation_id)
            .or_default()
            .push(note.clone());
        Ok(note)
    }

    async fn list_notes(&self, reservation_id: Ulid) -> Result<Vec<Note>, StoreError> {
        let mut notes = self
            .notes
            .get(&reservation_id)
            .map(|n| n.value().clone())
            .unwrap_or_default();
        notes.reverse();
        Ok(notes)
    }
}
