use ulid::Ulid;

use crate::grid::GridError;
use crate::store::StoreError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BoardError {
    InvalidWindow(GridError),
    /// The store refused the transition; the card is back in its column.
    TransitionRejected { id: Ulid, reason: String },
    /// A transition for this reservation has not resolved yet. Nothing sent.
    TransitionInFlight(Ulid),
    /// A newer window or fetch superseded this result; it was discarded.
    StaleSnapshot { generation: u64 },
    NotFound(Ulid),
    LimitExceeded(&'static str),
    Unavailable(String),
}

impl BoardError {
    /// Worth retrying with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, BoardError::Unavailable(_))
    }
}

impl std::fmt::Display for BoardError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BoardError::InvalidWindow(e) => write!(f, "{e}"),
            BoardError::TransitionRejected { id, reason } => {
                write!(f, "transition of {id} rejected: {reason}")
            }
            BoardError::TransitionInFlight(id) => {
                write!(f, "transition of {id} already in flight")
            }
            BoardError::StaleSnapshot { generation } => {
                write!(f, "stale snapshot for window generation {generation}")
            }
            BoardError::NotFound(id) => write!(f, "not found: {id}"),
            BoardError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            BoardError::Unavailable(msg) => write!(f, "store unavailable: {msg}"),
        }
    }
}

impl std::error::Error for BoardError {}

impl From<GridError> for BoardError {
    fn from(e: GridError) -> Self {
        BoardError::InvalidWindow(e)
    }
}

impl From<StoreError> for BoardError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(id) => BoardError::NotFound(id),
            StoreError::LimitExceeded(msg) => BoardError::LimitExceeded(msg),
            StoreError::Unavailable(msg) => BoardError::Unavailable(msg),
            // A refused read. Transition requests match `Rejected` before converting.
            StoreError::Rejected(reason) => BoardError::Unavailable(format!("refused: {reason}")),
        }
    }
}
