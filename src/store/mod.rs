//! Contracts for the collaborators that own durable data.
//!
//! The board never mutates a reservation itself: every change goes through
//! [`ReservationStore::request_status_change`], and the store alone decides
//! whether the change is legal.

mod memory;

pub use memory::{MemoryStore, Seed};

use async_trait::async_trait;
use futures::stream::BoxStream;
use ulid::Ulid;

use crate::model::*;

/// Endless stream of change notifications for the reservation collection.
pub type ChangeStream = BoxStream<'static, ChangeEvent>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The store refused the request. Carries the reason shown to the user.
    Rejected(String),
    NotFound(Ulid),
    LimitExceeded(&'static str),
    /// Transport or storage failure; the request may be retried.
    Unavailable(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Rejected(reason) => write!(f, "rejected: {reason}"),
            StoreError::NotFound(id) => write!(f, "not found: {id}"),
            StoreError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            StoreError::Unavailable(msg) => write!(f, "store unavailable: {msg}"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::Unavailable(e.to_string())
    }
}

#[async_trait]
pub trait ReservationStore: Send + Sync {
    /// Grid rows, in display order.
    async fn list_equipment_lines(&self) -> Result<Vec<EquipmentLine>, StoreError>;

    /// Every reservation whose dates intersect `window`.
    async fn list_reservations(&self, window: DateSpan) -> Result<Vec<Reservation>, StoreError>;

    /// Ask the store to move a reservation to `to`. On success the returned
    /// record has already been appended to the audit trail.
    async fn request_status_change(
        &self,
        id: Ulid,
        to: Status,
        comment: Option<String>,
        actor: &str,
    ) -> Result<TransitionRecord, StoreError>;

    async fn subscribe_changes(&self) -> Result<ChangeStream, StoreError>;
}

#[async_trait]
pub trait NoteStore: Send + Sync {
    async fn append_note(
        &self,
        reservation_id: Ulid,
        text: String,
        author: &str,
    ) -> Result<Note, StoreError>;

    /// Newest first.
    async fn list_notes(&self, reservation_id: Ulid) -> Result<Vec<Note>, StoreError>;
}
