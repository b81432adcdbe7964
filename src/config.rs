use std::path::PathBuf;
use std::time::Duration;

use chrono::{Datelike, Months, NaiveDate};

use crate::labels::LabelPolicy;
use crate::model::DateSpan;
use crate::reconcile::RetryPolicy;

/// Runtime settings, read from `RENTGRID_*` environment variables.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub metrics_port: Option<u16>,
    /// Directory for the audit journal. No journal when unset.
    pub data_dir: Option<PathBuf>,
    /// JSON file with initial lines and reservations.
    pub seed: Option<PathBuf>,
    pub actor: String,
    /// Explicit window; the current month when unset.
    pub window: Option<DateSpan>,
    pub labels: LabelPolicy,
    pub retry: RetryPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            metrics_port: None,
            data_dir: None,
            seed: None,
            actor: "admin".into(),
            window: None,
            labels: LabelPolicy::default(),
            retry: RetryPolicy::default(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Unparseable values fall back to defaults.
    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Self {
        let parse = |key: &str| var(key).and_then(|s| s.trim().parse::<u64>().ok());
        let parse_u32 = |key: &str| parse(key).and_then(|v| u32::try_from(v).ok());
        let defaults = Config::default();

        let window = match (
            var("RENTGRID_WINDOW_START").and_then(|s| s.parse::<NaiveDate>().ok()),
            var("RENTGRID_WINDOW_END").and_then(|s| s.parse::<NaiveDate>().ok()),
        ) {
            (Some(start), Some(end)) => DateSpan::checked(start, end),
            (Some(start), None) => Some(month_of(start)),
            _ => None,
        };

        let labels = LabelPolicy {
            compact_max_days: parse_u32("RENTGRID_LABEL_COMPACT_DAYS")
                .unwrap_or(defaults.labels.compact_max_days),
            medium_max_days: parse_u32("RENTGRID_LABEL_MEDIUM_DAYS")
                .unwrap_or(defaults.labels.medium_max_days),
            min_full_width: parse_u32("RENTGRID_LABEL_FULL_WIDTH")
                .unwrap_or(defaults.labels.min_full_width),
        };

        let retry = RetryPolicy {
            base: parse("RENTGRID_RETRY_BASE_MS")
                .map_or(defaults.retry.base, Duration::from_millis),
            max: parse("RENTGRID_RETRY_MAX_MS").map_or(defaults.retry.max, Duration::from_millis),
            degraded_after: parse_u32("RENTGRID_DEGRADED_AFTER")
                .unwrap_or(defaults.retry.degraded_after),
        };

        Self {
            metrics_port: var("RENTGRID_METRICS_PORT").and_then(|s| s.parse().ok()),
            data_dir: var("RENTGRID_DATA_DIR").map(PathBuf::from),
            seed: var("RENTGRID_SEED").map(PathBuf::from),
            actor: var("RENTGRID_ACTOR").unwrap_or(defaults.actor),
            window,
            labels,
            retry,
        }
    }

    /// The configured window, or the month containing `today`.
    pub fn window_or_month_of(&self, today: NaiveDate) -> DateSpan {
        self.window.unwrap_or_else(|| month_of(today))
    }
}

/// First to last day of the month containing `day`.
pub fn month_of(day: NaiveDate) -> DateSpan {
    let first = day.with_day(1).unwrap_or(day);
    let last = first
        .checked_add_months(Months::new(1))
        .and_then(|next| next.pred_opt())
        .unwrap_or(first);
    DateSpan::new(first, last)
}
