//! End-to-end tracker use: recording periods, reopening the vault, and
//! backup export/import.

use chrono::NaiveDate;
use cycle_tracker::dates::parse_date;
use cycle_tracker::models::AppData;
use cycle_tracker::storage::{
    CycleRepository, EncryptedFileVault, MemoryVault, NewCycle, Vault,
};
use cycle_tracker::tracker::SettingsUpdate;
use cycle_tracker::{build_date_map, calc_averages, DayType, Defaults, Tracker, TrackerError};

fn d(s: &str) -> NaiveDate {
    parse_date(s).unwrap()
}

fn record(tracker: &Tracker<MemoryVault>, periods: &[(&str, Option<&str>)]) {
    for (start, end) in periods {
        tracker.start_period(start).unwrap();
        if let Some(end) = end {
            tracker.confirm_end(end).unwrap();
        }
    }
}

#[test]
fn recorded_history_drives_forecasts() {
    let tracker = Tracker::new(MemoryVault::new());
    tracker.setup("pass").unwrap();
    record(
        &tracker,
        &[
            ("2024-01-01", Some("2024-01-04")),
            ("2024-01-29", Some("2024-02-01")),
            ("2024-02-26", Some("2024-02-29")),
            ("2024-03-25", None),
        ],
    );

    let averages = tracker.averages().unwrap();
    assert_eq!(averages.avg_cycle_length, 28);
    assert_eq!(averages.avg_period_length, 4);

    let overview = tracker.overview(d("2024-03-26")).unwrap();
    let status = overview.status.unwrap();
    assert_eq!(status.cycle_day, Some(2));
    assert_eq!(status.next_cycle_date, d("2024-04-22"));
    assert_eq!(
        overview.date_map[&d("2024-03-28")].kind,
        DayType::MenstruationPredicted
    );
    assert_eq!(overview.date_map[&d("2024-04-22")].cycle_id, None);

    let report = tracker.stats_report().unwrap();
    assert!(report.contains("Avg. period: 4 days"));
}

#[test]
fn reopening_repairs_interrupted_sessions() {
    let vault = MemoryVault::new();
    let mut data = AppData::default();
    for start in ["2024-01-01", "2024-01-29", "2024-02-26"] {
        data.add_cycle(NewCycle {
            start_date: d(start),
            end_date: None,
            period_length: None,
            predicted_end_date: None,
        })
        .unwrap();
    }
    vault.save("pass", &data).unwrap();

    let tracker = Tracker::new(vault);
    assert!(tracker.unlock("pass").unwrap());
    let cycles = tracker.cycles().unwrap();
    assert_eq!(cycles[0].end_date, Some(d("2024-01-05")));
    assert_eq!(cycles[1].end_date, Some(d("2024-02-02")));
    assert_eq!(cycles[2].end_date, None);

    // the repair was persisted
    tracker.lock();
    assert!(tracker.unlock("pass").unwrap());
    assert_eq!(tracker.cycles().unwrap()[0].period_length, Some(5));
}

#[test]
fn export_then_import_reproduces_forecasts() {
    let source = Tracker::new(MemoryVault::new());
    source.setup("pass").unwrap();
    record(
        &source,
        &[
            ("2024-01-01", Some("2024-01-05")),
            ("2024-01-30", Some("2024-02-03")),
            ("2024-02-27", Some("2024-03-02")),
            ("2024-03-27", None),
        ],
    );
    source
        .update_settings(SettingsUpdate {
            ovulation_offset: Some(1),
            ..Default::default()
        })
        .unwrap();
    let json = source.export_data().unwrap();

    let target = Tracker::new(MemoryVault::new());
    target.setup("other").unwrap();
    record(&target, &[("2023-06-01", None)]);
    assert_eq!(target.import_data(&json).unwrap(), 4);

    let before = source.cycles().unwrap();
    let after = target.cycles().unwrap();
    assert_eq!(before.len(), after.len());
    for (a, b) in before.iter().zip(&after) {
        assert_ne!(a.id, b.id);
        assert_eq!(a.start_date, b.start_date);
        assert_eq!(a.end_date, b.end_date);
        assert_eq!(a.period_length, b.period_length);
        assert_eq!(a.predicted_end_date, b.predicted_end_date);
    }

    let defaults = source.settings().unwrap();
    assert_eq!(target.settings().unwrap(), defaults);
    assert_eq!(
        calc_averages(&before, &defaults),
        calc_averages(&after, &defaults)
    );
    let strip = |map: cycle_tracker::DateStateMap| {
        map.into_iter()
            .map(|(day, state)| (day, state.kind))
            .collect::<Vec<_>>()
    };
    assert_eq!(
        strip(build_date_map(&before, &defaults)),
        strip(build_date_map(&after, &defaults))
    );
}

#[test]
fn malformed_import_changes_nothing() {
    let tracker = Tracker::new(MemoryVault::new());
    tracker.setup("pass").unwrap();
    record(&tracker, &[("2024-01-01", None)]);

    let err = tracker
        .import_data(r#"{"cycles": [{"startDate": "2024-02-31"}]}"#)
        .unwrap_err();
    assert!(matches!(err, TrackerError::Backup(_)));
    assert_eq!(tracker.cycles().unwrap().len(), 1);
}

#[test]
fn oversized_settings_are_clamped_on_import() {
    let tracker = Tracker::new(MemoryVault::new());
    tracker.setup("pass").unwrap();
    let count = tracker
        .import_data(
            r#"{"cycles": [{"startDate": "2024-01-01"}], "settings": {"cycleLength": 1000000000}}"#,
        )
        .unwrap();
    assert_eq!(count, 1);
    assert_eq!(tracker.settings().unwrap().cycle_length, 60);

    let map = tracker.date_map().unwrap();
    assert_eq!(map[&d("2024-03-01")].kind, DayType::MenstruationPredicted);
    assert!(tracker.overview(d("2024-01-10")).unwrap().status.is_some());
    assert!(tracker.month(2024, 1).is_ok());
}

#[test]
fn oversized_period_length_is_rejected_on_import() {
    let tracker = Tracker::new(MemoryVault::new());
    tracker.setup("pass").unwrap();
    record(&tracker, &[("2023-06-01", None)]);

    let err = tracker
        .import_data(
            r#"{"cycles": [
                {"startDate": "2024-01-01", "periodLength": 1000000000},
                {"startDate": "2024-01-29"}
            ]}"#,
        )
        .unwrap_err();
    assert!(matches!(err, TrackerError::Backup(_)));

    // still usable afterwards
    let cycles = tracker.cycles().unwrap();
    assert_eq!(cycles.len(), 1);
    assert_eq!(cycles[0].start_date, d("2023-06-01"));
    tracker.start_period("2023-07-01").unwrap();
}

#[test]
fn out_of_range_stored_settings_are_clamped_on_unlock() {
    let vault = MemoryVault::new();
    let mut data = AppData::default();
    data.set_defaults(Defaults {
        cycle_length: 1_000_000_000,
        period_length: 5,
        ovulation_offset: 0,
    });
    data.add_cycle(NewCycle {
        start_date: d("2024-01-01"),
        end_date: None,
        period_length: None,
        predicted_end_date: None,
    })
    .unwrap();
    vault.save("pass", &data).unwrap();

    let tracker = Tracker::new(vault);
    assert!(tracker.unlock("pass").unwrap());
    assert_eq!(tracker.settings().unwrap().cycle_length, 60);
    assert!(!tracker.date_map().unwrap().is_empty());
}

#[test]
fn encrypted_file_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("data.cycle");

    let tracker = Tracker::new(EncryptedFileVault::new(&path));
    assert!(!tracker.is_setup().unwrap());
    tracker.setup("correct horse").unwrap();
    tracker.start_period("2024-01-01").unwrap();
    tracker.lock();

    let reopened = Tracker::new(EncryptedFileVault::new(&path));
    assert!(reopened.is_setup().unwrap());
    assert!(!reopened.unlock("battery staple").unwrap());
    assert!(reopened.unlock("correct horse").unwrap());
    assert_eq!(reopened.cycles().unwrap()[0].start_date, d("2024-01-01"));
}
