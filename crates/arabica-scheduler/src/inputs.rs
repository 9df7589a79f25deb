//! Read-only lifecycle inputs owned by other parts of the app:
//! the shop list, monthly work schedules and points settings.

use arabica_core::clock::month_key;
use arabica_core::store::{read_json, read_json_or_default};
use arabica_core::Result;
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::Value;
use std::path::PathBuf;

use crate::report::{ReportKind, ShiftWindow};
use crate::settings::{LifecycleSettings, SettingsFile};

/// A shop as listed in `shops/shops.json`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Shop {
    pub address: String,
    #[serde(default)]
    pub name: Option<String>,
    /// Per-shop override of the morning deadline (`HH:MM`).
    #[serde(default)]
    pub morning_deadline: Option<String>,
    #[serde(default)]
    pub evening_deadline: Option<String>,
}

impl Shop {
    pub fn deadline_override(&self, window: ShiftWindow) -> Option<&str> {
        match window {
            ShiftWindow::Morning => self.morning_deadline.as_deref(),
            ShiftWindow::Evening => self.evening_deadline.as_deref(),
        }
    }
}

/// `shops.json` is either `{"shops": [...]}` or a bare array.
#[derive(Deserialize)]
#[serde(untagged)]
enum ShopsFile {
    Wrapped { shops: Vec<Shop> },
    Bare(Vec<Shop>),
}

impl Default for ShopsFile {
    fn default() -> Self {
        Self::Bare(Vec::new())
    }
}

/// One row of a monthly work schedule.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleEntry {
    pub shop_address: String,
    /// `YYYY-MM-DD`, kept as text so one odd row does not poison the month.
    pub date: String,
    pub shift_type: String,
    pub employee_id: String,
    #[serde(default)]
    pub employee_name: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
}

/// Rows stay raw until matched: a malformed row only loses itself.
#[derive(Debug, Default, Deserialize)]
struct WorkSchedule {
    #[serde(default)]
    entries: Vec<Value>,
}

/// Accessor for the input files under the data directory.
#[derive(Debug, Clone)]
pub struct InputSource {
    data_dir: PathBuf,
}

impl InputSource {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    /// All configured shops. A missing file means no shops.
    pub fn shops(&self) -> Result<Vec<Shop>> {
        let path = self.data_dir.join("shops").join("shops.json");
        Ok(match read_json_or_default::<ShopsFile>(&path)? {
            ShopsFile::Wrapped { shops } | ShopsFile::Bare(shops) => shops,
        })
    }

    /// Effective settings for a lifecycle kind. An unreadable settings file is
    /// logged and the defaults are used.
    pub fn settings(&self, kind: ReportKind) -> LifecycleSettings {
        let path = self.data_dir.join("points-settings").join(kind.settings_file());
        match read_json::<SettingsFile>(&path) {
            Ok(Some(file)) => LifecycleSettings::from_file(kind, file),
            Ok(None) => LifecycleSettings::defaults_for(kind),
            Err(e) => {
                tracing::warn!("⚠️ Bad {kind} settings at {}, using defaults: {e}", path.display());
                LifecycleSettings::defaults_for(kind)
            }
        }
    }

    /// The employee scheduled for (shop, date, window), if any.
    ///
    /// Attribution is best effort. An unreadable schedule or a malformed row
    /// is logged and treated as "nobody scheduled".
    pub fn assignment(&self, shop_address: &str, date: NaiveDate, window: ShiftWindow) -> Option<ScheduleEntry> {
        let path = self
            .data_dir
            .join("work-schedules")
            .join(format!("{}.json", month_key(date)));
        let schedule: WorkSchedule = match read_json_or_default(&path) {
            Ok(schedule) => schedule,
            Err(e) => {
                tracing::warn!("⚠️ Unreadable work schedule {}: {e}", path.display());
                return None;
            }
        };
        let date = date.to_string();
        schedule.entries.into_iter().find_map(|row| {
            let matches = row.get("shopAddress").and_then(Value::as_str) == Some(shop_address)
                && row.get("date").and_then(Value::as_str) == Some(date.as_str())
                && row.get("shiftType").and_then(Value::as_str) == Some(window.as_str());
            if !matches {
                return None;
            }
            match serde_json::from_value::<ScheduleEntry>(row) {
                Ok(entry) if !entry.employee_id.trim().is_empty() => Some(entry),
                Ok(_) => {
                    tracing::debug!("Schedule row for {shop_address} {date} {window} has no employee");
                    None
                }
                Err(e) => {
                    tracing::warn!("⚠️ Skipping bad schedule row in {}: {e}", path.display());
                    None
                }
            }
        })
    }
}
