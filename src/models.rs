use std::collections::BTreeMap;
use std::fmt;
use std::ops::RangeInclusive;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Cycle {
    pub id: Uuid,
    pub start_date: NaiveDate,
    /// Set only once the user has confirmed the actual end of the period.
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
    #[serde(default)]
    pub period_length: Option<i64>,
    /// Forecast made when the cycle was recorded. Kept after confirmation.
    #[serde(default)]
    pub predicted_end_date: Option<NaiveDate>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl Cycle {
    /// A bare record under a fresh id, stamped now.
    pub fn new(start_date: NaiveDate) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            start_date,
            end_date: None,
            period_length: None,
            predicted_end_date: None,
            created_at: now,
            updated_at: now,
        }
    }
}

pub const CYCLE_LENGTH_RANGE: RangeInclusive<i64> = 15..=60;
pub const PERIOD_LENGTH_RANGE: RangeInclusive<i64> = 1..=14;
pub const OVULATION_OFFSET_RANGE: RangeInclusive<i64> = -10..=10;

/// User-configured fallbacks used until there is enough history to average.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct Defaults {
    pub cycle_length: i64,
    pub period_length: i64,
    /// Signed day shift applied to the computed ovulation date.
    pub ovulation_offset: i64,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            cycle_length: 28,
            period_length: 5,
            ovulation_offset: 0,
        }
    }
}

impl Defaults {
    /// Every field pulled into its accepted range.
    pub fn clamped(self) -> Self {
        let clamp = |value: i64, range: RangeInclusive<i64>| value.clamp(*range.start(), *range.end());
        Self {
            cycle_length: clamp(self.cycle_length, CYCLE_LENGTH_RANGE),
            period_length: clamp(self.period_length, PERIOD_LENGTH_RANGE),
            ovulation_offset: clamp(self.ovulation_offset, OVULATION_OFFSET_RANGE),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Averages {
    pub avg_cycle_length: i64,
    pub avg_period_length: i64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Prediction {
    pub predicted_end_date: NaiveDate,
    pub ovulation_date: NaiveDate,
    pub fertile_start: NaiveDate,
    pub fertile_end: NaiveDate,
    pub next_cycle_date: NaiveDate,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Menstruation,
    Follicular,
    Ovulation,
    Luteal,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Menstruation => "Menstruation",
            Phase::Follicular => "Follicular phase",
            Phase::Ovulation => "Ovulation",
            Phase::Luteal => "Luteal phase",
        };
        f.write_str(name)
    }
}

/// Visual classification of a calendar day.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum DayType {
    Menstruation,
    MenstruationPredicted,
    Ovulation,
    Fertile,
}

impl DayType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DayType::Menstruation => "menstruation",
            DayType::MenstruationPredicted => "menstruation-predicted",
            DayType::Ovulation => "ovulation",
            DayType::Fertile => "fertile",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DayState {
    #[serde(rename = "type")]
    pub kind: DayType,
    /// `None` for days projected from the not-yet-started cycle.
    pub cycle_id: Option<Uuid>,
}

/// Date to classification. Ordered by date, which matches the lexicographic
/// order of the `YYYY-MM-DD` keys it serializes to.
pub type DateStateMap = BTreeMap<NaiveDate, DayState>;

/// The whole persisted dataset.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct AppData {
    pub cycles: Vec<Cycle>,
    #[serde(default)]
    pub settings: Defaults,
}

/// Where the latest cycle stands on a given day.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CycleStatus {
    pub cycle_start: NaiveDate,
    /// `None` when the day lies outside the cycle's active window.
    pub cycle_day: Option<i64>,
    pub phase: Option<Phase>,
    /// Omitted once the period end is in the past.
    pub period_end: Option<NaiveDate>,
    pub ovulation_date: NaiveDate,
    pub next_cycle_date: NaiveDate,
    pub days_until_next: i64,
    pub progress_percent: u8,
}

/// One row of the history view.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub id: Uuid,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    /// Days until the following cycle started; `None` for the latest cycle.
    pub cycle_length: Option<i64>,
    pub period_length: Option<i64>,
}

/// Everything a front end needs after a data change.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Overview {
    pub averages: Averages,
    pub status: Option<CycleStatus>,
    pub date_map: DateStateMap,
}

/// Data returned for a month view
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthData {
    pub year: i32,
    pub month: u32,
    pub days: DateStateMap,
    pub averages: Averages,
}
