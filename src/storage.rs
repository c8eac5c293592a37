use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

use chrono::{NaiveDate, Utc};
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::crypto;
use crate::models::{AppData, Cycle, Defaults};

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("crypto error: {0}")]
    Crypto(#[from] crypto::CryptoError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("data directory not found")]
    NoDataDir,
    #[error("no saved data")]
    Missing,
    #[error("a cycle already starts on {0}")]
    DuplicateStart(NaiveDate),
    #[error("cycle {0} not found")]
    NotFound(Uuid),
}

/// Fields of a cycle that does not have an id yet.
#[derive(Debug, Clone, PartialEq)]
pub struct NewCycle {
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub period_length: Option<i64>,
    pub predicted_end_date: Option<NaiveDate>,
}

impl From<Cycle> for NewCycle {
    fn from(c: Cycle) -> Self {
        Self {
            start_date: c.start_date,
            end_date: c.end_date,
            period_length: c.period_length,
            predicted_end_date: c.predicted_end_date,
        }
    }
}

/// Partial update. `None` leaves a field alone; `Some(None)` clears it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CyclePatch {
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<Option<NaiveDate>>,
    pub period_length: Option<Option<i64>>,
    pub predicted_end_date: Option<Option<NaiveDate>>,
}

/// Record store for cycles and user defaults.
///
/// Cycles always come back ascending by start date, and no two cycles share
/// a start date.
pub trait CycleRepository {
    fn all_cycles(&self) -> Vec<Cycle>;
    fn defaults(&self) -> Defaults;
    fn set_defaults(&mut self, defaults: Defaults);
    fn add_cycle(&mut self, cycle: NewCycle) -> Result<Cycle, StorageError>;
    fn update_cycle(&mut self, id: Uuid, patch: CyclePatch) -> Result<Cycle, StorageError>;
    fn delete_cycle(&mut self, id: Uuid) -> Result<(), StorageError>;
    /// Drop every cycle and store `cycles` under fresh ids.
    fn replace_all(&mut self, cycles: Vec<NewCycle>, defaults: Defaults)
        -> Result<(), StorageError>;
}

impl AppData {
    fn ensure_free_start(&self, start: NaiveDate, except: Option<Uuid>) -> Result<(), StorageError> {
        if self
            .cycles
            .iter()
            .any(|c| c.start_date == start && Some(c.id) != except)
        {
            return Err(StorageError::DuplicateStart(start));
        }
        Ok(())
    }

    fn sort(&mut self) {
        self.cycles.sort_by_key(|c| c.start_date);
    }
}

impl CycleRepository for AppData {
    fn all_cycles(&self) -> Vec<Cycle> {
        let mut cycles = self.cycles.clone();
        cycles.sort_by_key(|c| c.start_date);
        cycles
    }

    fn defaults(&self) -> Defaults {
        self.settings
    }

    fn set_defaults(&mut self, defaults: Defaults) {
        self.settings = defaults;
    }

    fn add_cycle(&mut self, cycle: NewCycle) -> Result<Cycle, StorageError> {
        self.ensure_free_start(cycle.start_date, None)?;
        let record = Cycle {
            end_date: cycle.end_date,
            period_length: cycle.period_length,
            predicted_end_date: cycle.predicted_end_date,
            ..Cycle::new(cycle.start_date)
        };
        self.cycles.push(record.clone());
        self.sort();
        Ok(record)
    }

    fn update_cycle(&mut self, id: Uuid, patch: CyclePatch) -> Result<Cycle, StorageError> {
        if let Some(start) = patch.start_date {
            self.ensure_free_start(start, Some(id))?;
        }
        let cycle = self
            .cycles
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or(StorageError::NotFound(id))?;

        if let Some(start) = patch.start_date {
            cycle.start_date = start;
        }
        if let Some(end) = patch.end_date {
            cycle.end_date = end;
        }
        if let Some(len) = patch.period_length {
            cycle.period_length = len;
        }
        if let Some(predicted) = patch.predicted_end_date {
            cycle.predicted_end_date = predicted;
        }
        cycle.updated_at = Utc::now();
        let updated = cycle.clone();
        self.sort();
        Ok(updated)
    }

    fn delete_cycle(&mut self, id: Uuid) -> Result<(), StorageError> {
        let before = self.cycles.len();
        self.cycles.retain(|c| c.id != id);
        if self.cycles.len() == before {
            return Err(StorageError::NotFound(id));
        }
        Ok(())
    }

    fn replace_all(
        &mut self,
        cycles: Vec<NewCycle>,
        defaults: Defaults,
    ) -> Result<(), StorageError> {
        let mut fresh = AppData {
            cycles: Vec::with_capacity(cycles.len()),
            settings: defaults,
        };
        for cycle in cycles {
            fresh.add_cycle(cycle)?;
        }
        *self = fresh;
        Ok(())
    }
}

/// Persistence for the whole dataset, keyed by a passphrase.
pub trait Vault {
    fn exists(&self) -> Result<bool, StorageError>;
    fn load(&self, passphrase: &str) -> Result<AppData, StorageError>;
    fn save(&self, passphrase: &str, data: &AppData) -> Result<(), StorageError>;
    fn wipe(&self) -> Result<(), StorageError>;
}

/// Encrypted JSON file on disk.
#[derive(Debug, Clone)]
pub struct EncryptedFileVault {
    path: PathBuf,
}

impl EncryptedFileVault {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<local data dir>/cycle-tracker/data.cycle`
    pub fn default_location() -> Result<Self, StorageError> {
        let dir = dirs::data_local_dir()
            .ok_or(StorageError::NoDataDir)?
            .join("cycle-tracker");
        Ok(Self::new(dir.join("data.cycle")))
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

impl Vault for EncryptedFileVault {
    fn exists(&self) -> Result<bool, StorageError> {
        Ok(self.path.exists())
    }

    fn load(&self, passphrase: &str) -> Result<AppData, StorageError> {
        if !self.path.exists() {
            return Err(StorageError::Missing);
        }
        let sealed = fs::read(&self.path)?;
        let json = Zeroizing::new(crypto::open(passphrase, &sealed)?);
        Ok(serde_json::from_slice(&json)?)
    }

    fn save(&self, passphrase: &str, data: &AppData) -> Result<(), StorageError> {
        let json = Zeroizing::new(serde_json::to_vec(data)?);
        let sealed = crypto::seal(passphrase, &json)?;
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)?;
        }
        // write-then-rename so an interrupted save keeps the previous file
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, sealed)?;
        fs::rename(&tmp, &self.path)?;
        tracing::debug!(path = %self.path.display(), "saved data file");
        Ok(())
    }

    fn wipe(&self) -> Result<(), StorageError> {
        if self.path.exists() {
            fs::remove_file(&self.path)?;
            tracing::info!(path = %self.path.display(), "data file removed");
        }
        Ok(())
    }
}

/// Unencrypted in-process vault for tests and throwaway sessions.
#[derive(Debug, Default)]
pub struct MemoryVault {
    slot: Mutex<Option<(Zeroizing<String>, Vec<u8>)>>,
}

impl MemoryVault {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Vault for MemoryVault {
    fn exists(&self) -> Result<bool, StorageError> {
        Ok(self.slot.lock().map(|s| s.is_some()).unwrap_or(false))
    }

    fn load(&self, passphrase: &str) -> Result<AppData, StorageError> {
        let slot = self.slot.lock().map_err(|_| StorageError::Missing)?;
        match slot.as_ref() {
            Some((stored, json)) if stored.as_str() == passphrase => {
                Ok(serde_json::from_slice(json)?)
            }
            Some(_) => Err(crypto::CryptoError::Decryption.into()),
            None => Err(StorageError::Missing),
        }
    }

    fn save(&self, passphrase: &str, data: &AppData) -> Result<(), StorageError> {
        let json = serde_json::to_vec(data)?;
        let mut slot = self.slot.lock().map_err(|_| StorageError::Missing)?;
        *slot = Some((Zeroizing::new(passphrase.to_string()), json));
        Ok(())
    }

    fn wipe(&self) -> Result<(), StorageError> {
        if let Ok(mut slot) = self.slot.lock() {
            *slot = None;
        }
        Ok(())
    }
}
