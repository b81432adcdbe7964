use chrono::{Datelike, NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};

use crate::model::{DateSpan, Reservation};

/// Content-density heuristic for span labels. Thresholds are in visible
/// days; `min_full_width` is the rendering width (presentation units) below
/// which names and ranges are abbreviated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelPolicy {
    /// Spans up to this length get the compact label.
    pub compact_max_days: u32,
    /// Spans up to this length get the medium label; longer get the full one.
    pub medium_max_days: u32,
    pub min_full_width: u32,
}

impl Default for LabelPolicy {
    fn default() -> Self {
        Self {
            compact_max_days: 1,
            medium_max_days: 3,
            min_full_width: 100,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelDensity {
    Compact,
    Medium,
    Full,
}

impl LabelPolicy {
    pub fn density(&self, span_days: u32, width: Option<u32>) -> LabelDensity {
        if span_days <= self.compact_max_days {
            LabelDensity::Compact
        } else if span_days <= self.medium_max_days || self.constrained(width) {
            LabelDensity::Medium
        } else {
            LabelDensity::Full
        }
    }

    fn constrained(&self, width: Option<u32>) -> bool {
        width.is_some_and(|w| w < self.min_full_width)
    }

    /// Two-line label: name, then dates. `visible` is the part of the
    /// booking on screen; the compact label names its first day, while the
    /// wider labels print the booking's true range.
    pub fn render(&self, r: &Reservation, visible: DateSpan, width: Option<u32>) -> String {
        let (start, end) = (r.dates.start, r.dates.end);
        match self.density(visible.days(), width) {
            LabelDensity::Compact => {
                format!("{}\n{}", r.customer.surname, visible.start.day())
            }
            LabelDensity::Medium => {
                let name = if self.constrained(width) {
                    match r.customer.initial() {
                        Some(i) => format!("{} {i}.", r.customer.surname),
                        None => r.customer.surname.clone(),
                    }
                } else {
                    r.customer.full_name()
                };
                format!("{name}\n{} - {}", short_date(start), short_date(end))
            }
            LabelDensity::Full => format!(
                "{}\n{} - {} {} - {}",
                r.customer.full_name(),
                short_date(start),
                short_date(end),
                clock(r.start_time),
                clock(r.end_time),
            ),
        }
    }
}

/// `3.10` for 3 October.
fn short_date(d: NaiveDate) -> String {
    format!("{}.{}", d.day(), d.month())
}

fn clock(t: NaiveTime) -> String {
    t.format("%H:%M").to_string()
}
