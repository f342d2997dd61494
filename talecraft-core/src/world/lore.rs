//! World background: lore, eras and game time.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Hours per in-game day.
pub const HOURS_PER_DAY: u32 = 24;
/// Days per in-game month.
pub const DAYS_PER_MONTH: u32 = 30;
/// Months per in-game year.
pub const MONTHS_PER_YEAR: u32 = 12;

/// The world background document, one per file (template) or session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lore {
    pub title: String,
    /// Narrative background paragraphs.
    #[serde(default)]
    pub background: Vec<String>,
    /// Era/time-period identifier (e.g. "late bronze age").
    #[serde(default)]
    pub time_period: String,
    /// Keyed historical events.
    #[serde(default)]
    pub events: Vec<WorldEvent>,
    /// Current game time. Monotonically non-decreasing.
    pub game_time: GameTime,
    /// Ordered eras. `current_era_index` is monotonically non-decreasing.
    #[serde(default)]
    pub eras: Vec<Era>,
    #[serde(default)]
    pub current_era_index: usize,
}

/// One keyed historical event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorldEvent {
    pub year: i64,
    pub title: String,
    pub description: String,
}

/// A named historical period with a year range and growth hints.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Era {
    pub title: String,
    pub start_year: i64,
    pub end_year: i64,
    #[serde(default)]
    pub description: String,
    /// Attribute growth applied when the player skips into this era.
    #[serde(default)]
    pub stats_growth: BTreeMap<String, i64>,
    /// Flat currency bonus granted when the player skips into this era.
    #[serde(default)]
    pub currency_bonus: Option<i64>,
}

/// In-game wall clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameTime {
    pub year: i64,
    /// 0-based month within the year.
    pub month_index: u32,
    /// 0-based day within the month.
    pub day_index: u32,
    /// 0-based hour within the day.
    pub hour_index: u32,
}

impl GameTime {
    pub fn new(year: i64) -> Self {
        Self {
            year,
            month_index: 0,
            day_index: 0,
            hour_index: 0,
        }
    }

    /// Advance by whole hours, rolling days, months and years.
    pub fn advance_hours(&mut self, hours: u32) {
        let total = self.hour_index + hours;
        self.hour_index = total % HOURS_PER_DAY;
        let mut days = self.day_index + total / HOURS_PER_DAY;
        self.day_index = days % DAYS_PER_MONTH;
        days /= DAYS_PER_MONTH;
        let months = self.month_index + days;
        self.month_index = months % MONTHS_PER_YEAR;
        self.year += i64::from(months / MONTHS_PER_YEAR);
    }

    /// Short human-readable form used in prompts.
    pub fn display(&self) -> String {
        format!(
            "year {}, month {}, day {}, hour {}",
            self.year,
            self.month_index + 1,
            self.day_index + 1,
            self.hour_index
        )
    }
}

impl Lore {
    /// The era the world is currently in, if any eras are defined.
    pub fn current_era(&self) -> Option<&Era> {
        self.eras.get(self.current_era_index)
    }

    /// The era after the current one, if it exists.
    pub fn next_era(&self) -> Option<&Era> {
        self.eras.get(self.current_era_index + 1)
    }

    /// Whether the current era is the final defined era.
    pub fn at_last_era(&self) -> bool {
        self.eras.is_empty() || self.current_era_index + 1 >= self.eras.len()
    }

    /// Lore background joined and truncated for prompt use.
    pub fn background_summary(&self, max_chars: usize) -> String {
        let joined = self.background.join(" ");
        if joined.chars().count() <= max_chars {
            return joined;
        }
        let truncated: String = joined.chars().take(max_chars).collect();
        format!("{truncated}…")
    }
}
