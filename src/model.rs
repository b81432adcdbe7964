use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Amount in minor currency units (grosze, cents).
pub type Money = i64;

/// Closed, inclusive calendar-day interval `[start, end]`.
///
/// Dates are local calendar days of the rental business. No timezone
/// conversion is ever applied to them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawDateSpan")]
pub struct DateSpan {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

/// Unchecked wire form; ordering is enforced on conversion.
#[derive(Deserialize)]
struct RawDateSpan {
    start: NaiveDate,
    end: NaiveDate,
}

impl TryFrom<RawDateSpan> for DateSpan {
    type Error = String;

    fn try_from(raw: RawDateSpan) -> Result<Self, Self::Error> {
        DateSpan::checked(raw.start, raw.end)
            .ok_or_else(|| format!("date span ends {} before it starts {}", raw.end, raw.start))
    }
}

impl DateSpan {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        debug_assert!(start <= end, "DateSpan start must not be after end");
        Self { start, end }
    }

    /// Returns `None` when `end < start`.
    pub fn checked(start: NaiveDate, end: NaiveDate) -> Option<Self> {
        (start <= end).then_some(Self { start, end })
    }

    /// Number of calendar days covered, both ends included.
    pub fn days(&self) -> u32 {
        ((self.end - self.start).num_days() + 1) as u32
    }

    pub fn contains_day(&self, day: NaiveDate) -> bool {
        self.start <= day && day <= self.end
    }

    /// Closed intervals: sharing a single day counts as overlapping.
    pub fn overlaps(&self, other: &DateSpan) -> bool {
        self.start <= other.end && other.start <= self.end
    }

    pub fn intersect(&self, other: &DateSpan) -> Option<DateSpan> {
        DateSpan::checked(self.start.max(other.start), self.end.min(other.end))
    }

    /// Zero-based offset of `day` from `start`. Caller guarantees `day >= start`.
    pub fn offset_of(&self, day: NaiveDate) -> usize {
        (day - self.start).num_days() as usize
    }

    pub fn iter_days(&self) -> impl Iterator<Item = NaiveDate> + use<> {
        let end = self.end;
        self.start.iter_days().take_while(move |d| *d <= end)
    }
}

impl fmt::Display for DateSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.start, self.end)
    }
}

/// Reservation lifecycle. Closed set; column order follows declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Pending,
    Confirmed,
    PickedUp,
    Completed,
    Cancelled,
    Archived,
}

impl Status {
    pub const ALL: [Status; 6] = [
        Status::Pending,
        Status::Confirmed,
        Status::PickedUp,
        Status::Completed,
        Status::Cancelled,
        Status::Archived,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Pending => "pending",
            Status::Confirmed => "confirmed",
            Status::PickedUp => "picked_up",
            Status::Completed => "completed",
            Status::Cancelled => "cancelled",
            Status::Archived => "archived",
        }
    }

    /// Position in the column list.
    pub fn index(&self) -> usize {
        *self as usize
    }

    /// Transitions offered by default policy. Presentation hint only: the
    /// store decides what is actually legal.
    pub fn policy_targets(&self) -> &'static [Status] {
        match self {
            Status::Pending => &[Status::Confirmed, Status::Cancelled],
            Status::Confirmed => &[Status::PickedUp, Status::Cancelled],
            Status::PickedUp => &[Status::Completed, Status::Cancelled],
            Status::Completed | Status::Cancelled => &[Status::Archived],
            Status::Archived => &[],
        }
    }

    pub fn policy_allows(&self, to: Status) -> bool {
        self.policy_targets().contains(&to)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Status::ALL
            .into_iter()
            .find(|st| st.as_str() == s)
            .ok_or_else(|| format!("unknown status: {s}"))
    }
}

/// One grid row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EquipmentLine {
    pub id: Ulid,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub equipment_id: Ulid,
    pub quantity: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    pub surname: String,
    #[serde(default)]
    pub given_name: Option<String>,
}

impl Customer {
    /// `"Nowak, Jan"`, or just the surname.
    pub fn full_name(&self) -> String {
        match &self.given_name {
            Some(given) if !given.is_empty() => format!("{}, {}", self.surname, given),
            _ => self.surname.clone(),
        }
    }

    pub fn initial(&self) -> Option<char> {
        self.given_name.as_deref().and_then(|g| g.chars().next())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub dates: DateSpan,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub lines: Vec<LineItem>,
    pub status: Status,
    pub total: Money,
    pub customer: Customer,
    pub updated_at: DateTime<Utc>,
}

impl Reservation {
    pub fn uses_line(&self, equipment_id: &Ulid) -> bool {
        self.lines.iter().any(|l| &l.equipment_id == equipment_id)
    }
}

/// Immutable audit entry for an accepted status change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub reservation_id: Ulid,
    pub from: Status,
    pub to: Status,
    pub at: DateTime<Utc>,
    pub comment: Option<String>,
    pub actor: String,
}

/// Free-text note attached to a reservation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    pub id: Ulid,
    pub reservation_id: Ulid,
    pub text: String,
    pub author: String,
    pub at: DateTime<Utc>,
}

/// Change notification from the persistence side. Never interpreted beyond
/// "something changed".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEvent {
    ReservationUpserted { id: Ulid },
    ReservationRemoved { id: Ulid },
    StatusChanged { id: Ulid, to: Status },
    LinesChanged,
    /// The subscriber fell behind and events were dropped.
    Resync,
}
