use std::collections::HashMap;

use chrono::NaiveDate;
use serde::Serialize;
use ulid::Ulid;

use crate::limits::MAX_WINDOW_DAYS;
use crate::model::*;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GridError {
    InvalidWindow { start: NaiveDate, end: NaiveDate },
    WindowTooWide { days: u32, max: u32 },
}

impl std::fmt::Display for GridError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GridError::InvalidWindow { start, end } => {
                write!(f, "invalid window: end {end} is before start {start}")
            }
            GridError::WindowTooWide { days, max } => {
                write!(f, "window of {days} days exceeds the {max}-day maximum")
            }
        }
    }
}

impl std::error::Error for GridError {}

/// Validate a visible window. Shared by the grid builder and the board.
pub fn window(start: NaiveDate, end: NaiveDate) -> Result<DateSpan, GridError> {
    let span = DateSpan::checked(start, end).ok_or(GridError::InvalidWindow { start, end })?;
    if span.days() > MAX_WINDOW_DAYS {
        return Err(GridError::WindowTooWide {
            days: span.days(),
            max: MAX_WINDOW_DAYS,
        });
    }
    Ok(span)
}

/// One reservation drawn as a single merged block on one row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlacedSpan {
    pub reservation_id: Ulid,
    pub line_id: Ulid,
    pub row: usize,
    /// First visible day offset (the anchor cell).
    pub offset: usize,
    /// Visible length in days.
    pub days: u32,
    pub visible: DateSpan,
    /// The reservation starts before the window.
    pub clipped_start: bool,
    /// The reservation ends after the window.
    pub clipped_end: bool,
}

/// A reservation that could not be drawn because its row was already
/// occupied on some of its days.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Overflow {
    pub reservation_id: Ulid,
    pub line_id: Ulid,
    pub visible: DateSpan,
    pub days: u32,
    /// Occupant of the first conflicting cell.
    pub blocked_by: Ulid,
}

/// Cell contents. `Anchor` and `Continuation` index into [`Grid::spans`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Cell {
    Empty,
    Anchor(usize),
    Continuation(usize),
}

impl Cell {
    pub fn span_index(&self) -> Option<usize> {
        match self {
            Cell::Empty => None,
            Cell::Anchor(i) | Cell::Continuation(i) => Some(*i),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Grid {
    pub window: DateSpan,
    pub line_ids: Vec<Ulid>,
    /// `rows[row][day_offset]`
    pub rows: Vec<Vec<Cell>>,
    pub spans: Vec<PlacedSpan>,
    pub overflow: Vec<Overflow>,
}

impl Grid {
    /// Grid with no rows, used before the first snapshot arrives.
    pub fn empty(window: DateSpan) -> Self {
        Self {
            window,
            line_ids: Vec::new(),
            rows: Vec::new(),
            spans: Vec::new(),
            overflow: Vec::new(),
        }
    }

    pub fn days(&self) -> u32 {
        self.window.days()
    }

    pub fn row_of(&self, line_id: &Ulid) -> Option<usize> {
        self.line_ids.iter().position(|id| id == line_id)
    }

    /// Cell at `(line, offset)`; `None` when either is out of range.
    pub fn cell(&self, line_id: &Ulid, offset: usize) -> Option<Cell> {
        let row = self.row_of(line_id)?;
        self.rows[row].get(offset).copied()
    }

    pub fn cell_on(&self, line_id: &Ulid, day: NaiveDate) -> Option<Cell> {
        if !self.window.contains_day(day) {
            return None;
        }
        self.cell(line_id, self.window.offset_of(day))
    }

    /// Spans anchored on a row, left to right.
    pub fn row_spans(&self, row: usize) -> impl Iterator<Item = &PlacedSpan> {
        self.rows
            .get(row)
            .into_iter()
            .flatten()
            .filter_map(move |cell| match cell {
                Cell::Anchor(i) => Some(&self.spans[*i]),
                _ => None,
            })
    }

    pub fn spans_for(&self, reservation_id: &Ulid) -> impl Iterator<Item = &PlacedSpan> {
        self.spans
            .iter()
            .filter(move |s| &s.reservation_id == reservation_id)
    }

    pub fn occupied_cells(&self) -> usize {
        self.rows
            .iter()
            .flatten()
            .filter(|c| !matches!(c, Cell::Empty))
            .count()
    }
}

/// Build the occupancy grid for `window_start..=window_end`.
///
/// Pure: equal inputs give equal grids. Reservations referencing lines that
/// are not in `lines` are ignored. When two reservations want the same cell
/// on one row, the one with the earliest true start keeps the row and the
/// other is reported in [`Grid::overflow`] with its whole visible span.
pub fn build_grid(
    lines: &[EquipmentLine],
    reservations: &[Reservation],
    window_start: NaiveDate,
    window_end: NaiveDate,
) -> Result<Grid, GridError> {
    let window = window(window_start, window_end)?;
    let width = window.days() as usize;

    let mut grid = Grid {
        window,
        line_ids: lines.iter().map(|l| l.id).collect(),
        rows: vec![vec![Cell::Empty; width]; lines.len()],
        spans: Vec::new(),
        overflow: Vec::new(),
    };

    // Only reservations visible in the window, bucketed by row.
    let mut rows_of: HashMap<Ulid, Vec<usize>> = HashMap::new();
    for (row, line) in lines.iter().enumerate() {
        rows_of.entry(line.id).or_default().push(row);
    }
    let mut candidates: Vec<Vec<(&Reservation, DateSpan)>> = vec![Vec::new(); lines.len()];
    for r in reservations {
        let Some(visible) = r.dates.intersect(&window) else {
            continue;
        };
        let mut seen: Vec<Ulid> = Vec::with_capacity(r.lines.len());
        for item in &r.lines {
            if seen.contains(&item.equipment_id) {
                continue;
            }
            seen.push(item.equipment_id);
            if let Some(rows) = rows_of.get(&item.equipment_id) {
                for &row in rows {
                    candidates[row].push((r, visible));
                }
            }
        }
    }

    for (row, mut cands) in candidates.into_iter().enumerate() {
        cands.sort_by(|(a, _), (b, _)| {
            a.dates
                .start
                .cmp(&b.dates.start)
                .then(a.dates.end.cmp(&b.dates.end))
                .then(a.id.cmp(&b.id))
        });
        let line_id = grid.line_ids[row];

        for (r, visible) in cands {
            let first = window.offset_of(visible.start);
            let last = window.offset_of(visible.end);
            let cells = &mut grid.rows[row][first..=last];

            if let Some(taken) = cells.iter().find_map(Cell::span_index) {
                let blocked_by = grid.spans[taken].reservation_id;
                tracing::warn!(
                    reservation = %r.id,
                    line = %line_id,
                    %blocked_by,
                    "overlapping reservations on one line; reservation moved to overflow"
                );
                metrics::counter!(crate::observability::OVERLAP_CONFLICTS_TOTAL).increment(1);
                grid.overflow.push(Overflow {
                    reservation_id: r.id,
                    line_id,
                    visible,
                    days: visible.days(),
                    blocked_by,
                });
                continue;
            }

            let index = grid.spans.len();
            cells[0] = Cell::Anchor(index);
            for cell in &mut cells[1..] {
                *cell = Cell::Continuation(index);
            }
            grid.spans.push(PlacedSpan {
                reservation_id: r.id,
                line_id,
                row,
                offset: first,
                days: visible.days(),
                visible,
                clipped_start: visible.start != r.dates.start,
                clipped_end: visible.end != r.dates.end,
            });
        }
    }

    Ok(grid)
}
