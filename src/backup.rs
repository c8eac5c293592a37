//! JSON backup format: `{ "cycles": [...], "settings": {...} }`.
//!
//! Imports are validated here so the store never sees a malformed record.
//! Record ids in the file are ignored and reassigned by the store, which also
//! lets backups carrying numeric ids load.

use std::collections::BTreeSet;

use chrono::NaiveDate;
use serde::Deserialize;

use crate::dates::{parse_date, DateError};
use crate::models::{AppData, Defaults, PERIOD_LENGTH_RANGE};
use crate::storage::NewCycle;

#[derive(Debug, thiserror::Error)]
pub enum BackupError {
    #[error("invalid backup file: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Date(#[from] DateError),
    #[error("cycle starting {start} ends before it starts")]
    EndBeforeStart { start: NaiveDate },
    #[error("cycle starting {start} has invalid period length {length}")]
    InvalidPeriodLength { start: NaiveDate, length: i64 },
    #[error("more than one cycle starts on {0}")]
    DuplicateStart(NaiveDate),
}

#[derive(Debug, Deserialize)]
struct BackupFile {
    cycles: Vec<BackupCycle>,
    #[serde(default)]
    settings: Option<BackupSettings>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BackupCycle {
    start_date: String,
    #[serde(default)]
    end_date: Option<String>,
    #[serde(default)]
    period_length: Option<i64>,
    #[serde(default)]
    predicted_end_date: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BackupSettings {
    cycle_length: Option<i64>,
    period_length: Option<i64>,
    ovulation_offset: Option<i64>,
}

/// Validated content of a backup file.
#[derive(Debug, Clone, PartialEq)]
pub struct Backup {
    pub cycles: Vec<NewCycle>,
    pub defaults: Defaults,
}

/// Serialize the dataset as pretty JSON.
pub fn export(data: &AppData) -> Result<String, serde_json::Error> {
    let mut data = data.clone();
    data.cycles.sort_by_key(|c| c.start_date);
    serde_json::to_string_pretty(&data)
}

/// Parse and validate a backup. Settings missing from the file keep the
/// values in `current`; out-of-range settings are clamped.
pub fn import(json: &str, current: Defaults) -> Result<Backup, BackupError> {
    let file: BackupFile = serde_json::from_str(json)?;

    let mut seen = BTreeSet::new();
    let mut cycles = Vec::with_capacity(file.cycles.len());
    for raw in file.cycles {
        let start_date = parse_date(&raw.start_date)?;
        let end_date = raw.end_date.as_deref().map(parse_date).transpose()?;
        let predicted_end_date = raw.predicted_end_date.as_deref().map(parse_date).transpose()?;

        if end_date.is_some_and(|end| end < start_date) {
            return Err(BackupError::EndBeforeStart { start: start_date });
        }
        if let Some(length) = raw
            .period_length
            .filter(|len| !PERIOD_LENGTH_RANGE.contains(len))
        {
            return Err(BackupError::InvalidPeriodLength {
                start: start_date,
                length,
            });
        }
        if !seen.insert(start_date) {
            return Err(BackupError::DuplicateStart(start_date));
        }
        cycles.push(NewCycle {
            start_date,
            end_date,
            period_length: raw.period_length,
            predicted_end_date,
        });
    }
    cycles.sort_by_key(|c| c.start_date);

    let mut defaults = current;
    if let Some(settings) = file.settings {
        // zero means "unset" in older backups
        if let Some(len) = settings.cycle_length.filter(|&l| l > 0) {
            defaults.cycle_length = len;
        }
        if let Some(len) = settings.period_length.filter(|&l| l > 0) {
            defaults.period_length = len;
        }
        if let Some(offset) = settings.ovulation_offset {
            defaults.ovulation_offset = offset;
        }
    }

    Ok(Backup {
        cycles,
        defaults: defaults.clamped(),
    })
}
