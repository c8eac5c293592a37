//! On-device menstrual cycle tracker.
//!
//! The forecasting core is pure: [`prediction`] turns a sorted cycle history
//! into averages and per-cycle forecasts, and [`date_map`] turns the same
//! history into a per-day calendar classification. [`tracker`] wraps both
//! around an encrypted [`storage`] vault.

pub mod backup;
pub mod crypto;
pub mod date_map;
pub mod dates;
pub mod models;
pub mod prediction;
pub mod storage;
pub mod tracker;

pub use date_map::build_date_map;
pub use models::{Averages, Cycle, DateStateMap, DayState, DayType, Defaults, Phase, Prediction};
pub use prediction::{calc_averages, get_cycle_day, get_phase, predict_cycle};
pub use tracker::{Tracker, TrackerError};
