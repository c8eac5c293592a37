use chrono::NaiveDate;

use crate::dates::{add_days, diff_days};
use crate::models::{Averages, Cycle, CycleStatus, Defaults, HistoryEntry, Phase, Prediction};

/// Only the most recent samples are averaged.
const RECENT_SAMPLES: usize = 6;
/// Fewer qualifying samples than this fall back to the configured default.
const MIN_SAMPLES: usize = 3;
/// Cycle lengths outside (0, 60) are treated as data-entry anomalies.
const MAX_CYCLE_SAMPLE: i64 = 60;
/// Period lengths outside (0, 15) are treated as data-entry anomalies.
const MAX_PERIOD_SAMPLE: i64 = 15;
/// Fixed luteal phase: ovulation is 14 days before the next cycle.
const LUTEAL_DAYS: i64 = 14;
/// Days a late cycle is still treated as active past its expected length.
const LATE_GRACE_DAYS: i64 = 14;

/// Rolling average cycle and period length over `cycles` (ascending by start).
///
/// Each series falls back to the matching `defaults` value until it has at
/// least three qualifying samples.
pub fn calc_averages(cycles: &[Cycle], defaults: &Defaults) -> Averages {
    let cycle_lengths: Vec<i64> = cycles
        .windows(2)
        .map(|w| diff_days(w[0].start_date, w[1].start_date))
        .filter(|&len| len > 0 && len < MAX_CYCLE_SAMPLE)
        .collect();

    let period_lengths: Vec<i64> = cycles
        .iter()
        .filter_map(|c| c.end_date.map(|end| diff_days(c.start_date, end) + 1))
        .filter(|&len| len > 0 && len < MAX_PERIOD_SAMPLE)
        .collect();

    Averages {
        avg_cycle_length: recent_mean(&cycle_lengths).unwrap_or(defaults.cycle_length),
        avg_period_length: recent_mean(&period_lengths).unwrap_or(defaults.period_length),
    }
}

/// Mean of the last `RECENT_SAMPLES` values rounded to the nearest day,
/// halves rounding up.
fn recent_mean(samples: &[i64]) -> Option<i64> {
    let recent = &samples[samples.len().saturating_sub(RECENT_SAMPLES)..];
    if recent.len() < MIN_SAMPLES {
        return None;
    }
    let n = recent.len() as i64;
    let sum: i64 = recent.iter().sum();
    Some((2 * sum + n).div_euclid(2 * n))
}

/// Forecast period end, ovulation, fertile window and next start for a cycle
/// beginning on `start`.
pub fn predict_cycle(
    start: NaiveDate,
    avg_cycle_length: i64,
    avg_period_length: i64,
    ovulation_offset: i64,
) -> Prediction {
    let ovulation_date = add_days(start, avg_cycle_length - LUTEAL_DAYS - 1 + ovulation_offset);
    Prediction {
        predicted_end_date: add_days(start, avg_period_length - 1),
        ovulation_date,
        fertile_start: add_days(ovulation_date, -5),
        fertile_end: add_days(ovulation_date, 1),
        next_cycle_date: add_days(start, avg_cycle_length),
    }
}

/// 1-based day number of `target` within a cycle that began on `cycle_start`.
pub fn get_cycle_day(cycle_start: NaiveDate, target: NaiveDate) -> i64 {
    diff_days(cycle_start, target) + 1
}

/// Whether `day` falls in a cycle's active window, including the grace days
/// allowed for a late cycle.
pub fn is_active_day(day: i64, avg_cycle_length: i64) -> bool {
    day >= 1 && day <= avg_cycle_length + LATE_GRACE_DAYS
}

/// Phase for a cycle day. Where windows overlap, menstruation wins over
/// ovulation, which wins over follicular, which wins over luteal.
pub fn get_phase(
    cycle_day: i64,
    period_end_day: i64,
    fertile_start_day: i64,
    fertile_end_day: i64,
) -> Phase {
    if cycle_day <= period_end_day {
        Phase::Menstruation
    } else if cycle_day >= fertile_start_day && cycle_day <= fertile_end_day {
        Phase::Ovulation
    } else if cycle_day < fertile_start_day {
        Phase::Follicular
    } else {
        Phase::Luteal
    }
}

/// Cycle day of `date` within whichever cycle covers it. A cycle stops
/// covering dates at its successor's start.
pub fn cycle_day_for_date(cycles: &[Cycle], averages: &Averages, date: NaiveDate) -> Option<i64> {
    let idx = cycles.iter().rposition(|c| c.start_date <= date)?;
    if let Some(next) = cycles.get(idx + 1) {
        if date >= next.start_date {
            return None;
        }
    }
    let day = get_cycle_day(cycles[idx].start_date, date);
    is_active_day(day, averages.avg_cycle_length).then_some(day)
}

/// Status of the latest cycle as seen on `today`. `None` without any cycles.
pub fn cycle_status(
    cycles: &[Cycle],
    averages: &Averages,
    defaults: &Defaults,
    today: NaiveDate,
) -> Option<CycleStatus> {
    let last = cycles.last()?;
    let prediction = predict_cycle(
        last.start_date,
        averages.avg_cycle_length,
        averages.avg_period_length,
        defaults.ovulation_offset,
    );

    let day = get_cycle_day(last.start_date, today);
    let active = is_active_day(day, averages.avg_cycle_length);

    let period_end_day = match last.end_date {
        Some(end) => diff_days(last.start_date, end) + 1,
        None => averages.avg_period_length,
    };
    let phase = active.then(|| {
        get_phase(
            day,
            period_end_day,
            get_cycle_day(last.start_date, prediction.fertile_start),
            get_cycle_day(last.start_date, prediction.fertile_end),
        )
    });

    let period_end = last.end_date.unwrap_or(prediction.predicted_end_date);
    let progress = if active && averages.avg_cycle_length > 0 {
        let pct = (2 * day * 100 + averages.avg_cycle_length) / (2 * averages.avg_cycle_length);
        pct.clamp(0, 100) as u8
    } else {
        0
    };

    Some(CycleStatus {
        cycle_start: last.start_date,
        cycle_day: active.then_some(day),
        phase,
        period_end: (period_end >= today).then_some(period_end),
        ovulation_date: prediction.ovulation_date,
        next_cycle_date: prediction.next_cycle_date,
        days_until_next: diff_days(today, prediction.next_cycle_date),
        progress_percent: progress,
    })
}

/// History rows, newest first.
pub fn history(cycles: &[Cycle]) -> Vec<HistoryEntry> {
    cycles
        .iter()
        .enumerate()
        .rev()
        .map(|(i, c)| HistoryEntry {
            id: c.id,
            start_date: c.start_date,
            end_date: c.end_date,
            cycle_length: cycles
                .get(i + 1)
                .map(|next| diff_days(c.start_date, next.start_date)),
            period_length: c.end_date.map(|end| diff_days(c.start_date, end) + 1),
        })
        .collect()
}

/// Plain-text summary suitable for sharing.
pub fn stats_report(cycles: &[Cycle], averages: &Averages) -> String {
    let mut out = String::from("Cycle statistics\n\n");
    out.push_str(&format!("Avg. cycle: {} days\n", averages.avg_cycle_length));
    out.push_str(&format!("Avg. period: {} days\n\n", averages.avg_period_length));
    for entry in history(cycles) {
        let mut line = entry.start_date.format("%-d %b %Y").to_string();
        if let Some(len) = entry.period_length {
            line.push_str(&format!(" | Period: {len} days"));
        }
        if let Some(len) = entry.cycle_length {
            line.push_str(&format!(" | Cycle: {len} days"));
        }
        out.push_str(&line);
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dates::parse_date;

    fn d(s: &str) -> NaiveDate {
        parse_date(s).unwrap()
    }

    fn make_cycle(start: &str, end: Option<&str>) -> Cycle {
        Cycle {
            end_date: end.map(d),
            ..Cycle::new(d(start))
        }
    }

    fn starts(dates: &[&str]) -> Vec<Cycle> {
        dates.iter().map(|s| make_cycle(s, None)).collect()
    }

    #[test]
    fn averages_recent_cycle_lengths() {
        let cycles = starts(&["2024-01-01", "2024-01-29", "2024-02-26", "2024-03-25"]);
        let avgs = calc_averages(&cycles, &Defaults::default());
        assert_eq!(avgs.avg_cycle_length, 28);
        // no confirmed ends
        assert_eq!(avgs.avg_period_length, 5);
    }

    #[test]
    fn falls_back_below_three_samples() {
        let defaults = Defaults {
            cycle_length: 31,
            period_length: 6,
            ovulation_offset: 0,
        };
        for n in 0..=3 {
            let all = ["2024-01-01", "2024-01-25", "2024-02-18", "2024-03-13"];
            let cycles = starts(&all[..n]);
            assert_eq!(calc_averages(&cycles, &defaults).avg_cycle_length, 31, "{n} cycles");
        }
        let cycles = vec![
            make_cycle("2024-01-01", Some("2024-01-03")),
            make_cycle("2024-01-25", Some("2024-01-27")),
        ];
        assert_eq!(calc_averages(&cycles, &defaults).avg_period_length, 6);
    }

    #[test]
    fn discards_anomalous_samples() {
        // 70-day gap is dropped, leaving two samples
        let defaults = Defaults {
            cycle_length: 30,
            ..Defaults::default()
        };
        let cycles = starts(&["2024-01-01", "2024-03-11", "2024-04-08", "2024-05-06"]);
        assert_eq!(calc_averages(&cycles, &defaults).avg_cycle_length, 30);

        let cycles = vec![
            make_cycle("2024-01-01", Some("2024-01-20")),
            make_cycle("2024-02-01", Some("2024-02-04")),
            make_cycle("2024-03-01", Some("2024-03-04")),
            make_cycle("2024-04-01", Some("2024-04-04")),
        ];
        assert_eq!(calc_averages(&cycles, &Defaults::default()).avg_period_length, 4);
    }

    #[test]
    fn only_last_six_samples_count() {
        // six 40-day gaps after two 20-day gaps
        let mut date = d("2023-01-01");
        let mut cycles = vec![make_cycle("2023-01-01", None)];
        for gap in [20, 20, 40, 40, 40, 40, 40, 40] {
            date = add_days(date, gap);
            cycles.push(Cycle {
                start_date: date,
                ..make_cycle("2023-01-01", None)
            });
        }
        assert_eq!(calc_averages(&cycles, &Defaults::default()).avg_cycle_length, 40);
    }

    #[test]
    fn mean_rounds_half_up() {
        // 28, 28, 29, 29 -> 28.5
        let cycles = starts(&["2024-01-01", "2024-01-29", "2024-02-26", "2024-03-26", "2024-04-24"]);
        assert_eq!(calc_averages(&cycles, &Defaults::default()).avg_cycle_length, 29);
    }

    #[test]
    fn averages_are_deterministic() {
        let cycles = vec![
            make_cycle("2024-01-01", Some("2024-01-05")),
            make_cycle("2024-01-30", Some("2024-02-03")),
            make_cycle("2024-02-27", Some("2024-03-02")),
            make_cycle("2024-03-26", None),
        ];
        let defaults = Defaults::default();
        assert_eq!(calc_averages(&cycles, &defaults), calc_averages(&cycles, &defaults));
    }

    #[test]
    fn predicts_standard_cycle() {
        let p = predict_cycle(d("2024-01-01"), 28, 5, 0);
        assert_eq!(p.predicted_end_date, d("2024-01-05"));
        assert_eq!(p.next_cycle_date, d("2024-01-29"));
        assert_eq!(p.ovulation_date, d("2024-01-14"));
        assert_eq!(p.fertile_start, d("2024-01-09"));
        assert_eq!(p.fertile_end, d("2024-01-15"));
    }

    #[test]
    fn ovulation_offset_shifts_window() {
        let p = predict_cycle(d("2024-01-01"), 28, 5, -2);
        assert_eq!(p.ovulation_date, d("2024-01-12"));
        assert_eq!(p.fertile_start, d("2024-01-07"));
        assert_eq!(p.fertile_end, d("2024-01-13"));
        // period and next start are unaffected
        assert_eq!(p.predicted_end_date, d("2024-01-05"));
        assert_eq!(p.next_cycle_date, d("2024-01-29"));
    }

    #[test]
    fn phase_boundaries() {
        assert_eq!(get_phase(5, 5, 9, 15), Phase::Menstruation);
        assert_eq!(get_phase(6, 5, 9, 15), Phase::Follicular);
        assert_eq!(get_phase(9, 5, 9, 15), Phase::Ovulation);
        assert_eq!(get_phase(15, 5, 9, 15), Phase::Ovulation);
        assert_eq!(get_phase(16, 5, 9, 15), Phase::Luteal);
        // overlapping windows: menstruation wins
        assert_eq!(get_phase(9, 10, 9, 15), Phase::Menstruation);
    }

    #[test]
    fn cycle_day_is_one_based() {
        assert_eq!(get_cycle_day(d("2024-01-01"), d("2024-01-01")), 1);
        assert_eq!(get_cycle_day(d("2024-01-01"), d("2024-01-28")), 28);
        assert_eq!(get_cycle_day(d("2024-01-01"), d("2023-12-31")), 0);
        assert!(!is_active_day(0, 28));
        assert!(is_active_day(42, 28));
        assert!(!is_active_day(43, 28));
    }

    #[test]
    fn cycle_day_for_date_respects_successor_and_grace() {
        let cycles = starts(&["2024-01-01", "2024-01-29"]);
        let avgs = Averages {
            avg_cycle_length: 28,
            avg_period_length: 5,
        };
        assert_eq!(cycle_day_for_date(&cycles, &avgs, d("2023-12-31")), None);
        assert_eq!(cycle_day_for_date(&cycles, &avgs, d("2024-01-28")), Some(28));
        assert_eq!(cycle_day_for_date(&cycles, &avgs, d("2024-01-29")), Some(1));
        assert_eq!(cycle_day_for_date(&cycles, &avgs, d("2024-03-10")), Some(42));
        assert_eq!(cycle_day_for_date(&cycles, &avgs, d("2024-03-11")), None);
    }

    #[test]
    fn status_of_latest_cycle() {
        let cycles = vec![make_cycle("2024-01-01", None)];
        let avgs = Averages {
            avg_cycle_length: 28,
            avg_period_length: 5,
        };
        let defaults = Defaults::default();

        let status = cycle_status(&cycles, &avgs, &defaults, d("2024-01-03")).unwrap();
        assert_eq!(status.cycle_day, Some(3));
        assert_eq!(status.phase, Some(Phase::Menstruation));
        assert_eq!(status.period_end, Some(d("2024-01-05")));
        assert_eq!(status.days_until_next, 26);
        assert_eq!(status.progress_percent, 11);

        let status = cycle_status(&cycles, &avgs, &defaults, d("2024-01-20")).unwrap();
        assert_eq!(status.phase, Some(Phase::Luteal));
        assert_eq!(status.period_end, None);

        let status = cycle_status(&cycles, &avgs, &defaults, d("2024-03-01")).unwrap();
        assert_eq!(status.cycle_day, None);
        assert_eq!(status.phase, None);
        assert_eq!(status.progress_percent, 0);

        assert!(cycle_status(&[], &avgs, &defaults, d("2024-01-01")).is_none());
    }

    #[test]
    fn history_is_newest_first_with_lengths() {
        let cycles = vec![
            make_cycle("2024-01-01", Some("2024-01-05")),
            make_cycle("2024-01-29", None),
        ];
        let rows = history(&cycles);
        assert_eq!(rows[0].start_date, d("2024-01-29"));
        assert_eq!(rows[0].cycle_length, None);
        assert_eq!(rows[1].cycle_length, Some(28));
        assert_eq!(rows[1].period_length, Some(5));

        let report = stats_report(&cycles, &Averages {
            avg_cycle_length: 28,
            avg_period_length: 5,
        });
        assert!(report.contains("Avg. cycle: 28 days"));
        assert!(report.contains("1 Jan 2024 | Period: 5 days | Cycle: 28 days"));
    }
}
