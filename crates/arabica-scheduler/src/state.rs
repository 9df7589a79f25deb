//! Scheduler state: durable "already processed" markers.
//!
//! Markers are partitioned by local business date. A (shop, window, date)
//! marked `generated` is never generated again; one marked `expired` is never
//! penalised again. The whole document is read at the start of a tick and
//! flushed once at its end.

use arabica_core::Result;
use arabica_core::store::{read_json_or_default, write_json_atomic};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use crate::report::ReportKey;

/// Markers for a single business day.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DayMarkers {
    #[serde(default)]
    pub generated: BTreeSet<String>,
    #[serde(default)]
    pub expired: BTreeSet<String>,
    #[serde(default)]
    pub cleaned_up: bool,
}

/// The persisted scheduler checkpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerState {
    /// Keyed by `YYYY-MM-DD`; string order equals date order.
    #[serde(default)]
    pub days: BTreeMap<String, DayMarkers>,
    #[serde(default)]
    pub last_check: Option<DateTime<Utc>>,
}

impl SchedulerState {
    fn day(&self, date: NaiveDate) -> Option<&DayMarkers> {
        self.days.get(&date.to_string())
    }

    fn day_mut(&mut self, date: NaiveDate) -> &mut DayMarkers {
        self.days.entry(date.to_string()).or_default()
    }

    pub fn is_generated(&self, key: &ReportKey) -> bool {
        self.day(key.date).is_some_and(|d| d.generated.contains(&key.marker()))
    }

    pub fn mark_generated(&mut self, key: &ReportKey) {
        self.day_mut(key.date).generated.insert(key.marker());
    }

    pub fn is_expired(&self, key: &ReportKey) -> bool {
        self.day(key.date).is_some_and(|d| d.expired.contains(&key.marker()))
    }

    pub fn mark_expired(&mut self, key: &ReportKey) {
        self.day_mut(key.date).expired.insert(key.marker());
    }

    /// Whether anything was recorded for that day.
    pub fn has_day(&self, date: NaiveDate) -> bool {
        self.days.contains_key(&date.to_string())
    }

    pub fn is_cleaned_up(&self, date: NaiveDate) -> bool {
        self.day(date).is_some_and(|d| d.cleaned_up)
    }

    pub fn mark_cleaned_up(&mut self, date: NaiveDate) {
        self.day_mut(date).cleaned_up = true;
    }

    /// Drop day partitions strictly before `cutoff`. Returns how many were dropped.
    pub fn prune_before(&mut self, cutoff: NaiveDate) -> usize {
        let cutoff = cutoff.to_string();
        let before = self.days.len();
        self.days.retain(|day, _| *day >= cutoff);
        before - self.days.len()
    }
}

/// Location of one lifecycle's `state.json`.
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            path: dir.as_ref().join("state.json"),
        }
    }

    /// Missing file means a fresh state. A corrupt file is an error; see
    /// [`StateStore::set_aside`].
    pub fn load(&self) -> Result<SchedulerState> {
        read_json_or_default(&self.path)
    }

    /// Rename an unreadable state file to `state.json.corrupt-<timestamp>` so
    /// the next save starts clean and the bad copy stays for inspection.
    pub fn set_aside(&self, now: DateTime<Utc>) -> Result<PathBuf> {
        let mut name = self.path.clone().into_os_string();
        name.push(format!(".corrupt-{}", now.format("%Y%m%dT%H%M%SZ")));
        let target = PathBuf::from(name);
        std::fs::rename(&self.path, &target)?;
        Ok(target)
    }

    pub fn save(&self, state: &SchedulerState) -> Result<()> {
        write_json_atomic(&self.path, state)
    }
}
