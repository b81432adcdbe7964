//! Abstract user intents from the presentation layer.
//!
//! Pointer drags, keyboard moves and action clicks all resolve through
//! [`transition_to`], so every input method yields the same transition
//! requests.

use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::model::Status;
use crate::pipeline::Pipeline;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Prev,
    Next,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Intent {
    DragStart { id: Ulid },
    /// `over` is the column under the pointer, `index` the slot within it.
    DragEnd {
        over: Option<Status>,
        index: Option<usize>,
    },
    DragCancel,
    /// Move a focused card to the neighbouring column.
    KeyMove { id: Ulid, direction: Direction },
    /// Status action button on a card.
    Click { id: Ulid, target: Status },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TransitionIntent {
    pub id: Ulid,
    pub from: Status,
    pub to: Status,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Outcome {
    Transition(TransitionIntent),
    /// Same-column drop: cosmetic reorder, never sent to the store.
    Reorder { id: Ulid, index: usize },
}

/// Resolve a request to show `id` in `to`'s column. `None` when the
/// reservation is unknown or already displayed there.
pub fn transition_to(pipeline: &Pipeline, id: Ulid, to: Status) -> Option<TransitionIntent> {
    let from = pipeline.column_of(&id)?;
    (from != to).then_some(TransitionIntent { id, from, to })
}

fn neighbour(status: Status, direction: Direction) -> Option<Status> {
    let i = status.index();
    let j = match direction {
        Direction::Prev => i.checked_sub(1)?,
        Direction::Next => i + 1,
    };
    Status::ALL.get(j).copied()
}

/// Tracks the card being dragged between `DragStart` and `DragEnd`.
#[derive(Debug, Default)]
pub struct DragController {
    pinned: Option<Ulid>,
}

impl DragController {
    pub fn pinned(&self) -> Option<Ulid> {
        self.pinned
    }

    pub fn handle(&mut self, intent: Intent, pipeline: &Pipeline) -> Option<Outcome> {
        match intent {
            Intent::DragStart { id } => {
                self.pinned = pipeline.column_of(&id).map(|_| id);
                None
            }
            Intent::DragCancel => {
                self.pinned = None;
                None
            }
            Intent::DragEnd { over, index } => {
                let id = self.pinned.take()?;
                let over = over?;
                match transition_to(pipeline, id, over) {
                    Some(t) => Some(Outcome::Transition(t)),
                    None => index.map(|index| Outcome::Reorder { id, index }),
                }
            }
            Intent::KeyMove { id, direction } => {
                let to = neighbour(pipeline.column_of(&id)?, direction)?;
                transition_to(pipeline, id, to).map(Outcome::Transition)
            }
            Intent::Click { id, target } => {
                transition_to(pipeline, id, target).map(Outcome::Transition)
            }
        }
    }
}
