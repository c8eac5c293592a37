//! Calendar projection: which days are period, ovulation or fertile.
//!
//! The map is produced by an ordered list of rules applied to an empty map.
//! Period rules overwrite; every other rule only fills days that are still
//! unmapped. Rule order is therefore what decides precedence on boundary
//! days, and it must stay exactly as built by `rules`.

use chrono::NaiveDate;
use uuid::Uuid;

use crate::dates::{add_days, DateRange};
use crate::models::{Averages, Cycle, DateStateMap, DayState, DayType, Defaults};
use crate::prediction::{calc_averages, predict_cycle};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Write {
    Overwrite,
    IfAbsent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Label {
    Fixed(DayType),
    /// Start day is always confirmed; the rest only once the end is known.
    Period { start: NaiveDate, confirmed: bool },
}

impl Label {
    fn for_day(&self, day: NaiveDate) -> DayType {
        match *self {
            Label::Fixed(kind) => kind,
            Label::Period { start, confirmed } if confirmed || day == start => {
                DayType::Menstruation
            }
            Label::Period { .. } => DayType::MenstruationPredicted,
        }
    }
}

#[derive(Debug, Clone)]
struct Rule {
    days: DateRange,
    label: Label,
    cycle_id: Option<Uuid>,
    write: Write,
}

impl Rule {
    fn apply(&self, map: &mut DateStateMap) {
        for day in self.days.clone() {
            let state = DayState {
                kind: self.label.for_day(day),
                cycle_id: self.cycle_id,
            };
            match self.write {
                Write::Overwrite => {
                    map.insert(day, state);
                }
                Write::IfAbsent => {
                    map.entry(day).or_insert(state);
                }
            }
        }
    }
}

/// `[from, to]` clipped to `[lo, hi)`.
fn clipped(from: NaiveDate, to: NaiveDate, lo: NaiveDate, hi: NaiveDate) -> DateRange {
    DateRange::inclusive(from.max(lo), to.min(add_days(hi, -1)))
}

fn rules(cycles: &[Cycle], averages: &Averages, ovulation_offset: i64) -> Vec<Rule> {
    let mut out = Vec::new();
    let predict = |start| {
        predict_cycle(
            start,
            averages.avg_cycle_length,
            averages.avg_period_length,
            ovulation_offset,
        )
    };

    for (i, cycle) in cycles.iter().enumerate() {
        let prediction = predict(cycle.start_date);
        let id = Some(cycle.id);
        let actual_end = cycle.end_date.unwrap_or(prediction.predicted_end_date);

        out.push(Rule {
            days: DateRange::inclusive(cycle.start_date, actual_end),
            label: Label::Period {
                start: cycle.start_date,
                confirmed: cycle.end_date.is_some(),
            },
            cycle_id: id,
            write: Write::Overwrite,
        });
        if let Some(end) = cycle.end_date {
            out.push(Rule {
                days: DateRange::inclusive(cycle.start_date, end),
                label: Label::Fixed(DayType::Menstruation),
                cycle_id: id,
                write: Write::Overwrite,
            });
        }

        // projections never reach into the next recorded cycle
        let boundary = cycles
            .get(i + 1)
            .map_or(prediction.next_cycle_date, |next| next.start_date);
        out.push(Rule {
            days: clipped(
                prediction.ovulation_date,
                prediction.ovulation_date,
                cycle.start_date,
                boundary,
            ),
            label: Label::Fixed(DayType::Ovulation),
            cycle_id: id,
            write: Write::IfAbsent,
        });
        out.push(Rule {
            days: clipped(
                prediction.fertile_start,
                prediction.fertile_end,
                cycle.start_date,
                boundary,
            ),
            label: Label::Fixed(DayType::Fertile),
            cycle_id: id,
            write: Write::IfAbsent,
        });

        if i + 1 == cycles.len() {
            let upcoming = predict(prediction.next_cycle_date);
            out.push(Rule {
                days: DateRange::inclusive(prediction.next_cycle_date, upcoming.predicted_end_date),
                label: Label::Fixed(DayType::MenstruationPredicted),
                cycle_id: None,
                write: Write::IfAbsent,
            });
            out.push(Rule {
                days: DateRange::inclusive(upcoming.ovulation_date, upcoming.ovulation_date),
                label: Label::Fixed(DayType::Ovulation),
                cycle_id: None,
                write: Write::IfAbsent,
            });
            out.push(Rule {
                days: DateRange::inclusive(upcoming.fertile_start, upcoming.fertile_end),
                label: Label::Fixed(DayType::Fertile),
                cycle_id: None,
                write: Write::IfAbsent,
            });
        }
    }
    out
}

/// Classify every relevant calendar day for `cycles` (ascending by start).
///
/// Averages are recomputed from `cycles`, and the user's ovulation offset is
/// applied to every forecast. The latest cycle also projects one upcoming
/// cycle whose days carry no cycle id.
pub fn build_date_map(cycles: &[Cycle], defaults: &Defaults) -> DateStateMap {
    let averages = calc_averages(cycles, defaults);
    let mut map = DateStateMap::new();
    for rule in rules(cycles, &averages, defaults.ovulation_offset) {
        rule.apply(&mut map);
    }
    map
}

/// Days of one calendar month taken from a full map.
pub fn month_slice(map: &DateStateMap, year: i32, month: u32) -> Option<DateStateMap> {
    let first = NaiveDate::from_ymd_opt(year, month, 1)?;
    let next_first = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    }?;
    Some(
        map.range(first..next_first)
            .map(|(day, state)| (*day, *state))
            .collect(),
    )
}
