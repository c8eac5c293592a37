use std::sync::Mutex;

use chrono::NaiveDate;
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::backup::{self, BackupError};
use crate::crypto::CryptoError;
use crate::date_map::{build_date_map, month_slice};
use crate::dates::{add_days, diff_days, parse_date, DateError};
use crate::models::*;
use crate::prediction::{self, calc_averages, predict_cycle};
use crate::storage::{CyclePatch, CycleRepository, NewCycle, StorageError, Vault};

#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    #[error("app is locked")]
    Locked,
    #[error("internal state lock poisoned")]
    Poisoned,
    #[error(transparent)]
    Date(#[from] DateError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Backup(#[from] BackupError),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("a cycle already starts on {0}")]
    AlreadyStarted(NaiveDate),
    #[error("dates overlap the cycle starting {0}")]
    Overlap(NaiveDate),
    #[error("end date {end} is before start date {start}")]
    EndBeforeStart { start: NaiveDate, end: NaiveDate },
    #[error("no cycle covers {0}")]
    NoCycle(NaiveDate),
    #[error("cycle {0} not found")]
    NotFound(Uuid),
}

impl<T> From<std::sync::PoisonError<T>> for TrackerError {
    fn from(_: std::sync::PoisonError<T>) -> Self {
        TrackerError::Poisoned
    }
}

/// What `remove_mark` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveOutcome {
    CycleDeleted(Uuid),
    EndCleared(Uuid),
    /// The cycle is not the latest, so its end was refilled from the
    /// average period length instead of staying open.
    EndEstimated(Uuid),
    Unchanged,
}

/// Requested settings changes; out-of-range values are clamped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SettingsUpdate {
    pub cycle_length: Option<i64>,
    pub period_length: Option<i64>,
    pub ovulation_offset: Option<i64>,
}

/// Backfill the end of every cycle except the latest that never had its end
/// recorded, e.g. because a new period was marked before the previous one was
/// closed. Uses the current average period length where the cycle has no
/// stored length of its own. Returns how many cycles were changed.
pub fn repair_open_cycles<R: CycleRepository>(repo: &mut R) -> Result<usize, StorageError> {
    let cycles = repo.all_cycles();
    let averages = calc_averages(&cycles, &repo.defaults());
    let mut repaired = 0;
    for cycle in cycles.iter().rev().skip(1) {
        if cycle.end_date.is_some() {
            continue;
        }
        let length = cycle.period_length.unwrap_or(averages.avg_period_length);
        repo.update_cycle(
            cycle.id,
            CyclePatch {
                end_date: Some(Some(add_days(cycle.start_date, length - 1))),
                period_length: Some(Some(length)),
                ..Default::default()
            },
        )?;
        repaired += 1;
    }
    Ok(repaired)
}

/// Application service over an encrypted dataset. Holds the passphrase and
/// the decrypted data while unlocked.
pub struct Tracker<V: Vault> {
    vault: V,
    passphrase: Mutex<Option<Zeroizing<String>>>,
    data: Mutex<Option<AppData>>,
}

impl<V: Vault> Tracker<V> {
    pub fn new(vault: V) -> Self {
        Self {
            vault,
            passphrase: Mutex::new(None),
            data: Mutex::new(None),
        }
    }

    pub fn is_setup(&self) -> Result<bool, TrackerError> {
        Ok(self.vault.exists()?)
    }

    /// Create an empty dataset under `passphrase` and unlock it.
    pub fn setup(&self, passphrase: &str) -> Result<(), TrackerError> {
        let data = AppData::default();
        self.vault.save(passphrase, &data)?;
        self.install(passphrase, data)?;
        tracing::info!("new dataset created");
        Ok(())
    }

    /// Decrypt the dataset. Returns `false` for a wrong passphrase.
    pub fn unlock(&self, passphrase: &str) -> Result<bool, TrackerError> {
        let mut data = match self.vault.load(passphrase) {
            Ok(data) => data,
            Err(StorageError::Crypto(CryptoError::Decryption)) => {
                tracing::warn!("unlock rejected");
                return Ok(false);
            }
            Err(e) => return Err(e.into()),
        };
        let settings = data.defaults().clamped();
        let normalized = settings != data.defaults();
        if normalized {
            tracing::warn!("stored settings out of range, clamped");
            data.set_defaults(settings);
        }
        let repaired = repair_open_cycles(&mut data)?;
        if repaired > 0 {
            tracing::info!(repaired, "closed out cycles left open by an earlier session");
        }
        if normalized || repaired > 0 {
            self.vault.save(passphrase, &data)?;
        }
        self.install(passphrase, data)?;
        Ok(true)
    }

    fn install(&self, passphrase: &str, data: AppData) -> Result<(), TrackerError> {
        *self.passphrase.lock()? = Some(Zeroizing::new(passphrase.to_string()));
        *self.data.lock()? = Some(data);
        Ok(())
    }

    /// Forget the passphrase and drop the decrypted data.
    pub fn lock(&self) {
        if let Ok(mut pass) = self.passphrase.lock() {
            *pass = None;
        }
        if let Ok(mut data) = self.data.lock() {
            *data = None;
        }
    }

    pub fn is_unlocked(&self) -> bool {
        self.data.lock().map(|d| d.is_some()).unwrap_or(false)
    }

    fn read<T>(&self, f: impl FnOnce(&AppData) -> T) -> Result<T, TrackerError> {
        let guard = self.data.lock()?;
        let data = guard.as_ref().ok_or(TrackerError::Locked)?;
        Ok(f(data))
    }

    /// Apply `f` to a copy of the data, repair it, persist it, and only then
    /// make it current.
    fn mutate<T>(
        &self,
        f: impl FnOnce(&mut AppData) -> Result<T, TrackerError>,
    ) -> Result<T, TrackerError> {
        let pass_guard = self.passphrase.lock()?;
        let pass = pass_guard.as_ref().ok_or(TrackerError::Locked)?;
        let mut guard = self.data.lock()?;
        let current = guard.as_mut().ok_or(TrackerError::Locked)?;

        let mut draft = current.clone();
        let out = f(&mut draft)?;
        let repaired = repair_open_cycles(&mut draft)?;
        if repaired > 0 {
            tracing::debug!(repaired, "backfilled open cycles");
        }
        self.vault.save(pass, &draft)?;
        *current = draft;
        Ok(out)
    }

    pub fn cycles(&self) -> Result<Vec<Cycle>, TrackerError> {
        self.read(|data| data.all_cycles())
    }

    pub fn averages(&self) -> Result<Averages, TrackerError> {
        self.read(|data| calc_averages(&data.all_cycles(), &data.defaults()))
    }

    pub fn date_map(&self) -> Result<DateStateMap, TrackerError> {
        self.read(|data| build_date_map(&data.all_cycles(), &data.defaults()))
    }

    /// Averages, status and date map, recomputed from scratch.
    pub fn overview(&self, today: NaiveDate) -> Result<Overview, TrackerError> {
        self.read(|data| {
            let cycles = data.all_cycles();
            let defaults = data.defaults();
            let averages = calc_averages(&cycles, &defaults);
            let date_map = build_date_map(&cycles, &defaults);
            tracing::debug!(cycles = cycles.len(), days = date_map.len(), "recomputed overview");
            Overview {
                averages,
                status: prediction::cycle_status(&cycles, &averages, &defaults, today),
                date_map,
            }
        })
    }

    pub fn status(&self, today: NaiveDate) -> Result<Option<CycleStatus>, TrackerError> {
        self.read(|data| {
            let cycles = data.all_cycles();
            let defaults = data.defaults();
            let averages = calc_averages(&cycles, &defaults);
            prediction::cycle_status(&cycles, &averages, &defaults, today)
        })
    }

    pub fn cycle_day(&self, date: &str) -> Result<Option<i64>, TrackerError> {
        let date = parse_date(date)?;
        self.read(|data| {
            let cycles = data.all_cycles();
            let averages = calc_averages(&cycles, &data.defaults());
            prediction::cycle_day_for_date(&cycles, &averages, date)
        })
    }

    pub fn month(&self, year: i32, month: u32) -> Result<MonthData, TrackerError> {
        self.read(|data| {
            let cycles = data.all_cycles();
            let defaults = data.defaults();
            let map = build_date_map(&cycles, &defaults);
            month_slice(&map, year, month).map(|days| MonthData {
                year,
                month,
                days,
                averages: calc_averages(&cycles, &defaults),
            })
        })?
        .ok_or_else(|| DateError::Invalid(format!("{year:04}-{month:02}-01")).into())
    }

    pub fn history(&self) -> Result<Vec<HistoryEntry>, TrackerError> {
        self.read(|data| prediction::history(&data.all_cycles()))
    }

    pub fn stats_report(&self) -> Result<String, TrackerError> {
        self.read(|data| {
            let cycles = data.all_cycles();
            let averages = calc_averages(&cycles, &data.defaults());
            prediction::stats_report(&cycles, &averages)
        })
    }

    /// Mark `date` as the first day of a period.
    ///
    /// A period starting after the latest cycle closes that cycle out first.
    pub fn start_period(&self, date: &str) -> Result<Cycle, TrackerError> {
        let date = parse_date(date)?;
        let cycle = self.mutate(|data| {
            let cycles = data.all_cycles();
            let defaults = data.defaults();
            let averages = calc_averages(&cycles, &defaults);
            let prediction = predict_cycle(
                date,
                averages.avg_cycle_length,
                averages.avg_period_length,
                defaults.ovulation_offset,
            );

            if cycles.iter().any(|c| c.start_date == date) {
                return Err(TrackerError::AlreadyStarted(date));
            }
            ensure_no_overlap(&cycles, None, date, prediction.predicted_end_date, &averages, &defaults)?;

            if let Some(last) = cycles.last().filter(|last| date > last.start_date) {
                let length = last.period_length.unwrap_or(averages.avg_period_length);
                let end = last
                    .end_date
                    .unwrap_or_else(|| add_days(last.start_date, length - 1))
                    .min(add_days(date, -1));
                data.update_cycle(
                    last.id,
                    CyclePatch {
                        end_date: Some(Some(end)),
                        period_length: Some(Some(diff_days(last.start_date, end) + 1)),
                        ..Default::default()
                    },
                )?;
            }

            Ok(data.add_cycle(NewCycle {
                start_date: date,
                end_date: None,
                period_length: Some(averages.avg_period_length),
                predicted_end_date: Some(prediction.predicted_end_date),
            })?)
        })?;
        tracing::info!(start = %cycle.start_date, "period started");
        Ok(cycle)
    }

    /// Confirm `date` as the last day of the period of the cycle covering it.
    pub fn confirm_end(&self, date: &str) -> Result<Cycle, TrackerError> {
        let date = parse_date(date)?;
        let cycle = self.mutate(|data| {
            let cycles = data.all_cycles();
            let idx = cycles
                .iter()
                .rposition(|c| c.start_date <= date)
                .ok_or(TrackerError::NoCycle(date))?;
            if let Some(next) = cycles.get(idx + 1) {
                if date >= next.start_date {
                    return Err(TrackerError::Overlap(next.start_date));
                }
            }
            let cycle = &cycles[idx];
            Ok(data.update_cycle(
                cycle.id,
                CyclePatch {
                    end_date: Some(Some(date)),
                    period_length: Some(Some(diff_days(cycle.start_date, date) + 1)),
                    ..Default::default()
                },
            )?)
        })?;
        tracing::info!(start = %cycle.start_date, end = %date, "period end confirmed");
        Ok(cycle)
    }

    /// Undo a mark on `date`: a cycle start deletes the cycle, a confirmed end
    /// is cleared. Only the latest cycle can stay open; an earlier one gets an
    /// estimated end back. Any other day is left alone.
    pub fn remove_mark(&self, date: &str) -> Result<RemoveOutcome, TrackerError> {
        let date = parse_date(date)?;
        let outcome = self.mutate(|data| {
            let cycles = data.all_cycles();
            if let Some(c) = cycles.iter().find(|c| c.start_date == date) {
                data.delete_cycle(c.id)?;
                return Ok(RemoveOutcome::CycleDeleted(c.id));
            }
            if let Some(pos) = cycles.iter().position(|c| c.end_date == Some(date)) {
                let c = &cycles[pos];
                data.update_cycle(
                    c.id,
                    CyclePatch {
                        end_date: Some(None),
                        period_length: Some(None),
                        ..Default::default()
                    },
                )?;
                if pos + 1 < cycles.len() {
                    return Ok(RemoveOutcome::EndEstimated(c.id));
                }
                return Ok(RemoveOutcome::EndCleared(c.id));
            }
            Ok(RemoveOutcome::Unchanged)
        })?;
        tracing::info!(?outcome, %date, "mark removed");
        Ok(outcome)
    }

    /// Replace a cycle's dates. The new span must not touch any other cycle.
    ///
    /// The stored forecast is recomputed from the current averages.
    pub fn edit_cycle(
        &self,
        id: Uuid,
        start: &str,
        end: Option<&str>,
    ) -> Result<Cycle, TrackerError> {
        let start = parse_date(start)?;
        let end = end.map(parse_date).transpose()?;
        if let Some(end) = end.filter(|&end| end < start) {
            return Err(TrackerError::EndBeforeStart { start, end });
        }

        let result = self.mutate(|data| {
            let cycles = data.all_cycles();
            if !cycles.iter().any(|c| c.id == id) {
                return Err(TrackerError::NotFound(id));
            }
            let defaults = data.defaults();
            let averages = calc_averages(&cycles, &defaults);
            let prediction = predict_cycle(
                start,
                averages.avg_cycle_length,
                averages.avg_period_length,
                defaults.ovulation_offset,
            );
            if cycles.iter().any(|c| c.id != id && c.start_date == start) {
                return Err(TrackerError::AlreadyStarted(start));
            }
            let span_end = end.unwrap_or(prediction.predicted_end_date);
            ensure_no_overlap(&cycles, Some(id), start, span_end, &averages, &defaults)?;

            Ok(data.update_cycle(
                id,
                CyclePatch {
                    start_date: Some(start),
                    end_date: Some(end),
                    period_length: Some(end.map(|end| diff_days(start, end) + 1)),
                    predicted_end_date: Some(Some(prediction.predicted_end_date)),
                },
            )?)
        });
        match result {
            Ok(cycle) => {
                tracing::info!(%id, "cycle edited");
                Ok(cycle)
            }
            Err(e) => {
                tracing::warn!(%id, error = %e, "cycle edit rejected");
                Err(e)
            }
        }
    }

    pub fn delete_cycle(&self, id: Uuid) -> Result<(), TrackerError> {
        self.mutate(|data| {
            data.delete_cycle(id).map_err(|e| match e {
                StorageError::NotFound(id) => TrackerError::NotFound(id),
                other => other.into(),
            })
        })?;
        tracing::info!(%id, "cycle deleted");
        Ok(())
    }

    pub fn settings(&self) -> Result<Defaults, TrackerError> {
        self.read(|data| data.defaults())
    }

    pub fn update_settings(&self, update: SettingsUpdate) -> Result<Defaults, TrackerError> {
        self.mutate(|data| {
            let current = data.defaults();
            let defaults = Defaults {
                cycle_length: update.cycle_length.unwrap_or(current.cycle_length),
                period_length: update.period_length.unwrap_or(current.period_length),
                ovulation_offset: update.ovulation_offset.unwrap_or(current.ovulation_offset),
            }
            .clamped();
            data.set_defaults(defaults);
            Ok(defaults)
        })
    }

    pub fn export_data(&self) -> Result<String, TrackerError> {
        self.read(backup::export)?.map_err(Into::into)
    }

    /// Replace all cycles and settings with the content of a backup.
    /// Returns the number of cycles imported.
    pub fn import_data(&self, json: &str) -> Result<usize, TrackerError> {
        let current = self.settings()?;
        let backup = match backup::import(json, current) {
            Ok(backup) => backup,
            Err(e) => {
                tracing::warn!(error = %e, "import rejected");
                return Err(e.into());
            }
        };
        let count = backup.cycles.len();
        self.mutate(|data| Ok(data.replace_all(backup.cycles, backup.defaults)?))?;
        tracing::info!(count, "backup imported");
        Ok(count)
    }

    /// Lock and permanently delete the dataset.
    pub fn wipe_all_data(&self) -> Result<(), TrackerError> {
        self.lock();
        self.vault.wipe()?;
        tracing::info!("all data wiped");
        Ok(())
    }
}

/// Reject `[start, end]` if it intersects the span of any cycle other than
/// `except`. A cycle's span ends at its confirmed end, else its forecast end.
fn ensure_no_overlap(
    cycles: &[Cycle],
    except: Option<Uuid>,
    start: NaiveDate,
    end: NaiveDate,
    averages: &Averages,
    defaults: &Defaults,
) -> Result<(), TrackerError> {
    for other in cycles.iter().filter(|c| Some(c.id) != except) {
        let other_end = other.end_date.unwrap_or_else(|| {
            predict_cycle(
                other.start_date,
                averages.avg_cycle_length,
                averages.avg_period_length,
                defaults.ovulation_offset,
            )
            .predicted_end_date
        });
        if !(end < other.start_date || start > other_end) {
            return Err(TrackerError::Overlap(other.start_date));
        }
    }
    Ok(())
}
