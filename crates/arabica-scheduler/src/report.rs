//! Handover report model: one record per (shop, window, date).

use arabica_core::clock::{BusinessTime, parse_hhmm};
use arabica_core::{ArabicaError, Record, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Which lifecycle a report belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportKind {
    /// Shift handover between the outgoing and incoming barista.
    Shift,
    /// Cash envelope handover at the end of a window.
    Envelope,
}

impl ReportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Shift => "shift",
            Self::Envelope => "envelope",
        }
    }

    /// Report directory under the data dir.
    pub fn reports_dir(&self) -> &'static str {
        match self {
            Self::Shift => "shift-reports",
            Self::Envelope => "envelope-reports",
        }
    }

    /// Scheduler state directory under the data dir.
    pub fn state_dir(&self) -> &'static str {
        match self {
            Self::Shift => "shift-automation-state",
            Self::Envelope => "envelope-automation-state",
        }
    }

    /// Points settings file under `points-settings/`.
    pub fn settings_file(&self) -> &'static str {
        match self {
            Self::Shift => "shift_points_settings.json",
            Self::Envelope => "envelope_points_settings.json",
        }
    }

    pub fn penalty_category(&self) -> &'static str {
        match self {
            Self::Shift => "shift_missed_penalty",
            Self::Envelope => "envelope_missed_penalty",
        }
    }

    pub fn penalty_category_name(&self) -> &'static str {
        match self {
            Self::Shift => "Пропущенная пересменка",
            Self::Envelope => "Конверт - несдан",
        }
    }
}

impl fmt::Display for ReportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReportKind {
    type Err = ArabicaError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "shift" => Ok(Self::Shift),
            "envelope" => Ok(Self::Envelope),
            other => Err(ArabicaError::Validation(format!("unknown report kind '{other}'"))),
        }
    }
}

/// Time window within a business day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShiftWindow {
    Morning,
    Evening,
}

impl ShiftWindow {
    pub const ALL: [ShiftWindow; 2] = [ShiftWindow::Morning, ShiftWindow::Evening];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Morning => "morning",
            Self::Evening => "evening",
        }
    }
}

impl fmt::Display for ShiftWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Report status. `submitted` is accepted on read as a legacy spelling of `review`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    Pending,
    #[serde(alias = "submitted")]
    Review,
    Completed,
    Failed,
    Rejected,
}

impl ReportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Review => "review",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Rejected => "rejected",
        }
    }
}

impl fmt::Display for ReportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReportStatus {
    type Err = ArabicaError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "review" | "submitted" => Ok(Self::Review),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "rejected" => Ok(Self::Rejected),
            other => Err(ArabicaError::Validation(format!("unknown report status '{other}'"))),
        }
    }
}

/// Composite identity of a handover obligation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReportKey {
    pub shop_address: String,
    pub window: ShiftWindow,
    pub date: NaiveDate,
}

impl ReportKey {
    pub fn new(shop_address: impl Into<String>, window: ShiftWindow, date: NaiveDate) -> Self {
        Self {
            shop_address: shop_address.into(),
            window,
            date,
        }
    }

    /// Marker string stored in the scheduler state (date partition is implied).
    pub fn marker(&self) -> String {
        format!("{}|{}", self.window, self.shop_address)
    }

    /// Deterministic report id, so regenerating a key always lands on the same file.
    pub fn report_id(&self, kind: ReportKind) -> String {
        format!("{kind}_{}_{}_{}", self.window, self.date, self.shop_address)
    }
}

/// A shift or envelope handover report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandoverReport {
    pub id: String,
    pub kind: ReportKind,
    pub shop_address: String,
    #[serde(default)]
    pub shop_name: Option<String>,
    pub shift_type: ShiftWindow,
    pub date: NaiveDate,
    /// Local `HH:MM` after which a pending report is overdue.
    pub deadline: String,
    pub status: ReportStatus,
    #[serde(default)]
    pub employee_id: Option<String>,
    #[serde(default)]
    pub completed_by: Option<String>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub review_deadline: Option<DateTime<Utc>>,
    #[serde(default)]
    pub reviewed_by: Option<String>,
    #[serde(default)]
    pub reviewed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub rating: Option<u8>,
    #[serde(default)]
    pub failed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub rejected_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub rejection_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Record for HandoverReport {
    fn id(&self) -> &str {
        &self.id
    }
}

impl HandoverReport {
    /// A fresh placeholder awaiting submission.
    pub fn pending(
        kind: ReportKind,
        key: &ReportKey,
        shop_name: Option<String>,
        deadline: String,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: key.report_id(kind),
            kind,
            shop_address: key.shop_address.clone(),
            shop_name,
            shift_type: key.window,
            date: key.date,
            deadline,
            status: ReportStatus::Pending,
            employee_id: None,
            completed_by: None,
            completed_at: None,
            review_deadline: None,
            reviewed_by: None,
            reviewed_at: None,
            rating: None,
            failed_at: None,
            rejected_at: None,
            rejection_reason: None,
            created_at: now,
        }
    }

    pub fn key(&self) -> ReportKey {
        ReportKey::new(self.shop_address.clone(), self.shift_type, self.date)
    }

    /// UTC instant of the submission deadline.
    pub fn deadline_at(&self, time: &BusinessTime) -> Result<DateTime<Utc>> {
        Ok(time.to_utc(self.date, parse_hhmm(&self.deadline)?))
    }

    pub(crate) fn transition_error(&self, to: ReportStatus) -> ArabicaError {
        ArabicaError::InvalidTransition {
            id: self.id.clone(),
            from: self.status.to_string(),
            to: to.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn key() -> ReportKey {
        ReportKey::new("Lenina 1", ShiftWindow::Morning, NaiveDate::from_ymd_opt(2026, 3, 10).unwrap())
    }

    #[test]
    fn test_report_id_is_deterministic() {
        assert_eq!(key().report_id(ReportKind::Shift), "shift_morning_2026-03-10_Lenina 1");
        assert_ne!(key().report_id(ReportKind::Shift), key().report_id(ReportKind::Envelope));
    }

    #[test]
    fn test_legacy_submitted_status_reads_as_review() {
        let status: ReportStatus = serde_json::from_str("\"submitted\"").unwrap();
        assert_eq!(status, ReportStatus::Review);
        assert_eq!(serde_json::to_string(&status).unwrap(), "\"review\"");
        assert_eq!("submitted".parse::<ReportStatus>().unwrap(), ReportStatus::Review);
    }

    #[test]
    fn test_camel_case_wire_format() {
        let now = Utc.with_ymd_and_hms(2026, 3, 10, 4, 0, 0).unwrap();
        let report = HandoverReport::pending(ReportKind::Shift, &key(), None, "13:00".into(), now);
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["shopAddress"], "Lenina 1");
        assert_eq!(json["shiftType"], "morning");
        assert_eq!(json["date"], "2026-03-10");
        assert_eq!(json["status"], "pending");
    }

    #[test]
    fn test_deadline_at_uses_business_offset() {
        let now = Utc.with_ymd_and_hms(2026, 3, 10, 4, 0, 0).unwrap();
        let report = HandoverReport::pending(ReportKind::Shift, &key(), None, "14:00".into(), now);
        let bt = BusinessTime::new(3).unwrap();
        assert_eq!(
            report.deadline_at(&bt).unwrap(),
            Utc.with_ymd_and_hms(2026, 3, 10, 11, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_unknown_kind() {
        assert!("coffee".parse::<ReportKind>().is_err());
        assert_eq!("envelope".parse::<ReportKind>().unwrap(), ReportKind::Envelope);
    }
}
