//! Work item generation
//!
//! Calendar mode walks fixed-size date windows from the watermark up to today. Entity
//! modes turn candidate keys into one work item each, preserving input order.

use chrono::NaiveDate;

use crate::error::ConfigError;
use crate::models::{EntityKey, ExtractionMode, ExtractionWindow, WorkItem};

/// Longest accepted window, one century
pub const MAX_RANGE_DAYS: i64 = 36_500;

/// Window length in days. Validated once at startup, never mid-stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeDays(i64);

impl RangeDays {
    pub fn new(days: i64) -> Result<Self, ConfigError> {
        if days <= 0 || days > MAX_RANGE_DAYS {
            return Err(ConfigError::InvalidRangeDays(days));
        }
        Ok(Self(days))
    }

    pub fn get(&self) -> i64 {
        self.0
    }
}

/// Lazy sequence of consecutive, non-overlapping windows starting at the watermark.
///
/// Windows are produced while their start is before `now`, so the last one may reach past
/// `now`; the total is `ceil((now - watermark) / range_days)`. Cloning yields a fresh copy
/// of the remaining sequence, and the sequence depends only on its inputs.
#[derive(Debug, Clone)]
pub struct CalendarWindows {
    next_start: NaiveDate,
    now: NaiveDate,
    range_days: RangeDays,
}

impl CalendarWindows {
    pub fn new(watermark: NaiveDate, now: NaiveDate, range_days: RangeDays) -> Self {
        Self {
            next_start: watermark,
            now,
            range_days,
        }
    }

    /// Number of windows left to produce
    pub fn remaining(&self) -> usize {
        let days = (self.now - self.next_start).num_days();
        if days <= 0 {
            return 0;
        }
        let range = self.range_days.get();
        ((days + range - 1) / range) as usize
    }
}

impl Iterator for CalendarWindows {
    type Item = ExtractionWindow;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next_start >= self.now {
            return None;
        }
        let window = ExtractionWindow::new(self.next_start, self.range_days);
        self.next_start = window.end_date;
        Some(window)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.remaining();
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for CalendarWindows {}

/// One work item per candidate key, in input order.
///
/// Keys without a date are skipped for history extraction since the request window is
/// anchored on that date.
pub fn entity_items(
    mode: ExtractionMode,
    keys: impl IntoIterator<Item = EntityKey>,
) -> impl Iterator<Item = WorkItem> {
    keys.into_iter().filter_map(move |key| match mode {
        ExtractionMode::Profile => Some(WorkItem::EntityProfile(key.symbol)),
        ExtractionMode::HistoricalPriceFull => key.date.map(|date| WorkItem::EntityHistory {
            symbol: key.symbol,
            date,
        }),
        ExtractionMode::EarningCalendar => None,
    })
}
