//! Per-lifecycle window and penalty settings.
//!
//! Settings come from `points-settings/<kind>_points_settings.json`. Any field
//! missing from that file (or the whole file) falls back to the kind's defaults.

use arabica_core::Result;
use arabica_core::clock::parse_hhmm;
use chrono::{Duration, NaiveTime};
use serde::{Deserialize, Serialize};

use crate::report::{ReportKind, ShiftWindow};

/// Effective settings for one lifecycle kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleSettings {
    pub morning_start_time: String,
    pub morning_end_time: String,
    pub evening_start_time: String,
    pub evening_end_time: String,
    /// Points added to the ledger for a missed handover (negative).
    pub missed_penalty: f64,
    /// Hours an admin has to review a submission. `0` disables auto-rejection.
    pub admin_review_timeout: f64,
}

/// Parsed generation window for one [`ShiftWindow`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSpec {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl WindowSpec {
    /// Half-open `[start, end)`; a window whose end is before its start wraps midnight.
    pub fn contains(&self, t: NaiveTime) -> bool {
        if self.start <= self.end {
            t >= self.start && t < self.end
        } else {
            t >= self.start || t < self.end
        }
    }
}

impl LifecycleSettings {
    pub fn defaults_for(kind: ReportKind) -> Self {
        match kind {
            ReportKind::Shift => Self {
                morning_start_time: "07:00".into(),
                morning_end_time: "13:00".into(),
                evening_start_time: "14:00".into(),
                evening_end_time: "23:00".into(),
                missed_penalty: -3.0,
                admin_review_timeout: 2.0,
            },
            ReportKind::Envelope => Self {
                morning_start_time: "07:00".into(),
                morning_end_time: "09:00".into(),
                evening_start_time: "19:00".into(),
                evening_end_time: "21:00".into(),
                missed_penalty: -5.0,
                admin_review_timeout: 0.0,
            },
        }
    }

    /// Overlay a settings file onto the kind's defaults.
    pub fn from_file(kind: ReportKind, file: SettingsFile) -> Self {
        let mut settings = Self::defaults_for(kind);
        if let Some(v) = file.morning_start_time {
            settings.morning_start_time = v;
        }
        if let Some(v) = file.morning_end_time {
            settings.morning_end_time = v;
        }
        if let Some(v) = file.evening_start_time {
            settings.evening_start_time = v;
        }
        if let Some(v) = file.evening_end_time {
            settings.evening_end_time = v;
        }
        if let Some(v) = file.missed_penalty.or(file.not_submitted_points) {
            settings.missed_penalty = v;
        }
        if let Some(v) = file.admin_review_timeout {
            settings.admin_review_timeout = v;
        }
        settings
    }

    pub fn window(&self, window: ShiftWindow) -> Result<WindowSpec> {
        let (start, end) = match window {
            ShiftWindow::Morning => (&self.morning_start_time, &self.morning_end_time),
            ShiftWindow::Evening => (&self.evening_start_time, &self.evening_end_time),
        };
        Ok(WindowSpec {
            start: parse_hhmm(start)?,
            end: parse_hhmm(end)?,
        })
    }

    /// Default deadline for a window: its end time.
    pub fn default_deadline(&self, window: ShiftWindow) -> &str {
        match window {
            ShiftWindow::Morning => &self.morning_end_time,
            ShiftWindow::Evening => &self.evening_end_time,
        }
    }

    /// `None` when review auto-rejection is disabled.
    pub fn review_timeout(&self) -> Option<Duration> {
        if self.admin_review_timeout > 0.0 {
            Some(Duration::seconds((self.admin_review_timeout * 3600.0).round() as i64))
        } else {
            None
        }
    }
}

/// On-disk shape of a points settings file; every field optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsFile {
    pub morning_start_time: Option<String>,
    pub morning_end_time: Option<String>,
    pub evening_start_time: Option<String>,
    pub evening_end_time: Option<String>,
    pub missed_penalty: Option<f64>,
    /// Older envelope settings name the penalty this way.
    pub not_submitted_points: Option<f64>,
    pub admin_review_timeout: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(s: &str) -> NaiveTime {
        parse_hhmm(s).unwrap()
    }

    #[test]
    fn test_window_is_half_open() {
        let settings = LifecycleSettings::defaults_for(ReportKind::Shift);
        let morning = settings.window(ShiftWindow::Morning).unwrap();
        assert!(morning.contains(t("07:00")));
        assert!(morning.contains(t("12:59")));
        assert!(!morning.contains(t("13:00")));
        assert!(!morning.contains(t("06:59")));
    }

    #[test]
    fn test_window_wrapping_midnight() {
        let spec = WindowSpec {
            start: t("22:00"),
            end: t("02:00"),
        };
        assert!(spec.contains(t("23:30")));
        assert!(spec.contains(t("01:00")));
        assert!(!spec.contains(t("12:00")));
    }

    #[test]
    fn test_partial_file_overlays_defaults() {
        let file: SettingsFile =
            serde_json::from_str(r#"{"eveningEndTime":"22:00","notSubmittedPoints":-7}"#).unwrap();
        let settings = LifecycleSettings::from_file(ReportKind::Envelope, file);
        assert_eq!(settings.evening_end_time, "22:00");
        assert_eq!(settings.morning_end_time, "09:00");
        assert_eq!(settings.missed_penalty, -7.0);
    }

    #[test]
    fn test_review_timeout() {
        let shift = LifecycleSettings::defaults_for(ReportKind::Shift);
        assert_eq!(shift.review_timeout(), Some(Duration::hours(2)));
        let envelope = LifecycleSettings::defaults_for(ReportKind::Envelope);
        assert_eq!(envelope.review_timeout(), None);
    }
}
