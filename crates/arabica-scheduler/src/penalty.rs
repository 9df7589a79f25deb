//! Penalty ledger: append-only, one file per month.
//!
//! `efficiency-penalties/YYYY-MM.json` is shared with other producers (task
//! and attendance penalties), so entries are kept as raw JSON: foreign fields
//! and top-level keys survive a rewrite untouched. The file is either
//! `{"penalties": [...], ...}` or a bare array; whichever shape is on disk is
//! kept. Entries are unique by `sourceId` where present, so appending the same
//! penalty twice is a no-op.

use arabica_core::clock::month_key;
use arabica_core::store::{read_json_or_default, write_json_atomic};
use arabica_core::{ArabicaError, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::report::ShiftWindow;

/// Who a penalty is charged to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PenaltyTarget {
    Employee,
    Shop,
}

/// A penalty written by the lifecycle engines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PenaltyEntry {
    pub id: String,
    #[serde(rename = "type")]
    pub target: PenaltyTarget,
    /// Employee id, or the shop address for shop-level penalties.
    pub entity_id: String,
    #[serde(default)]
    pub entity_name: Option<String>,
    pub shop_address: String,
    #[serde(default)]
    pub employee_phone: Option<String>,
    pub category: String,
    pub category_name: String,
    pub date: NaiveDate,
    #[serde(default)]
    pub shift_type: Option<ShiftWindow>,
    pub points: f64,
    pub reason: String,
    /// Id of the report that caused the penalty.
    pub source_id: String,
    pub source_type: String,
    pub created_at: DateTime<Utc>,
}

/// A month file exactly as found on disk.
struct MonthDoc(Value);

impl MonthDoc {
    fn load(path: &Path) -> Result<Self> {
        let doc: Value = read_json_or_default(path)?;
        match &doc {
            Value::Null => Ok(Self(json!({ "penalties": [] }))),
            Value::Array(_) => Ok(Self(doc)),
            Value::Object(map) if map.get("penalties").is_none_or(Value::is_array) => Ok(Self(doc)),
            _ => Err(ArabicaError::Validation(format!(
                "{} is not a penalty month file",
                path.display()
            ))),
        }
    }

    fn entries(&self) -> &[Value] {
        match &self.0 {
            Value::Array(items) => items,
            Value::Object(map) => map.get("penalties").and_then(Value::as_array).map(Vec::as_slice).unwrap_or_default(),
            _ => &[],
        }
    }

    fn push(&mut self, entry: Value) {
        let items = match &mut self.0 {
            Value::Array(items) => items,
            Value::Object(map) => match map.entry("penalties").or_insert_with(|| json!([])) {
                Value::Array(items) => items,
                _ => return,
            },
            _ => return,
        };
        items.push(entry);
    }

    fn has_source(&self, source_id: &str) -> bool {
        self.entries()
            .iter()
            .any(|p| p.get("sourceId").and_then(Value::as_str) == Some(source_id))
    }
}

/// Month-partitioned penalty ledger shared by every lifecycle engine.
#[derive(Debug)]
pub struct PenaltyLedger {
    dir: PathBuf,
    // Serialises read-modify-write of month files across engines.
    write_lock: Mutex<()>,
}

impl PenaltyLedger {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    fn month_path(&self, month: &str) -> PathBuf {
        self.dir.join(format!("{month}.json"))
    }

    /// Append an entry to its month. Returns `false` if an entry with the same
    /// `sourceId` is already recorded.
    pub fn append(&self, entry: PenaltyEntry) -> Result<bool> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let path = self.month_path(&month_key(entry.date));
        let mut doc = MonthDoc::load(&path)?;

        if doc.has_source(&entry.source_id) {
            tracing::debug!("Penalty for {} already recorded", entry.source_id);
            return Ok(false);
        }

        tracing::info!(
            "💸 Penalty {} pts for {} ({}): {}",
            entry.points, entry.entity_id, entry.shop_address, entry.reason
        );
        doc.push(serde_json::to_value(&entry)?);
        write_json_atomic(&path, &doc.0)?;
        Ok(true)
    }

    /// Every entry recorded for a `YYYY-MM` month, from any producer.
    pub fn month(&self, month: &str) -> Result<Vec<Value>> {
        if !is_month_key(month) {
            return Err(ArabicaError::Validation(format!(
                "month must be YYYY-MM, got '{month}'"
            )));
        }
        Ok(MonthDoc::load(&self.month_path(month))?.entries().to_vec())
    }
}

fn is_month_key(s: &str) -> bool {
    NaiveDate::parse_from_str(&format!("{s}-01"), "%Y-%m-%d").is_ok() && s.len() == 7
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(source: &str, day: u32) -> PenaltyEntry {
        PenaltyEntry {
            id: format!("penalty_{source}"),
            target: PenaltyTarget::Shop,
            entity_id: "Lenina 1".into(),
            entity_name: None,
            shop_address: "Lenina 1".into(),
            employee_phone: None,
            category: "shift_missed_penalty".into(),
            category_name: "Пропущенная пересменка".into(),
            date: NaiveDate::from_ymd_opt(2026, 3, day).unwrap(),
            shift_type: Some(ShiftWindow::Morning),
            points: -3.0,
            reason: "missed".into(),
            source_id: source.into(),
            source_type: "shift_report".into(),
            created_at: Utc::now(),
        }
    }

    fn read_raw(dir: &tempfile::TempDir) -> Value {
        serde_json::from_str(&std::fs::read_to_string(dir.path().join("2026-03.json")).unwrap()).unwrap()
    }

    #[test]
    fn test_append_dedups_by_source() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = PenaltyLedger::open(dir.path()).unwrap();

        assert!(ledger.append(entry("r1", 10)).unwrap());
        assert!(!ledger.append(entry("r1", 10)).unwrap());
        assert!(ledger.append(entry("r2", 11)).unwrap());

        let march = ledger.month("2026-03").unwrap();
        assert_eq!(march.len(), 2);
        assert_eq!(march[0]["sourceId"], "r1");
        assert_eq!(march[0]["type"], "shop");
        assert!(ledger.month("2026-04").unwrap().is_empty());
        assert!(read_raw(&dir)["penalties"].is_array());
    }

    #[test]
    fn test_bare_array_shape_is_kept() {
        let dir = tempfile::tempdir().unwrap();
        let legacy = serde_json::to_string(&vec![entry("old", 1)]).unwrap();
        std::fs::write(dir.path().join("2026-03.json"), legacy).unwrap();

        let ledger = PenaltyLedger::open(dir.path()).unwrap();
        assert!(!ledger.append(entry("old", 1)).unwrap());
        assert!(ledger.append(entry("new", 2)).unwrap());

        assert_eq!(read_raw(&dir).as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_foreign_entries_survive_append() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("2026-03.json"),
            r#"{"monthKey":"2026-03","updatedAt":"2026-03-09T10:00:00.000Z","penalties":[
                {"id":"task_expired_1","employeeName":"Anna","category":"regular_task_penalty",
                 "categoryName":"Просроченная задача","points":-1,"reason":"late","date":"2026-03-09",
                 "createdAt":"2026-03-09T10:00:00.000Z","taskId":"t1","assignmentId":"a1"}
            ]}"#,
        )
        .unwrap();
        let ledger = PenaltyLedger::open(dir.path()).unwrap();

        assert_eq!(ledger.month("2026-03").unwrap().len(), 1);
        assert!(ledger.append(entry("r1", 10)).unwrap());
        assert!(!ledger.append(entry("r1", 10)).unwrap());

        let raw = read_raw(&dir);
        assert_eq!(raw["monthKey"], "2026-03");
        assert_eq!(raw["updatedAt"], "2026-03-09T10:00:00.000Z");
        let penalties = raw["penalties"].as_array().unwrap();
        assert_eq!(penalties.len(), 2);
        assert_eq!(penalties[0]["taskId"], "t1");
        assert_eq!(penalties[0]["employeeName"], "Anna");
        assert_eq!(penalties[1]["sourceId"], "r1");
    }

    #[test]
    fn test_unrecognised_month_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("2026-03.json"), r#"{"penalties":"nope"}"#).unwrap();
        let ledger = PenaltyLedger::open(dir.path()).unwrap();
        assert!(matches!(ledger.append(entry("r1", 10)), Err(ArabicaError::Validation(_))));
    }

    #[test]
    fn test_month_key_validation() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = PenaltyLedger::open(dir.path()).unwrap();
        assert!(ledger.month("../secrets").is_err());
        assert!(ledger.month("2026-13").is_err());
        assert!(ledger.month("2026-3").is_err());
    }
}
