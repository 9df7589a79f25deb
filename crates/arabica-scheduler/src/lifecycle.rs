//! Handover lifecycle engine, shared by the shift and envelope kinds.
//!
//! ```text
//!            generate (window active, no marker)
//!                 │
//!                 ▼
//!   ┌──────── pending ────────┐
//!   │ submit                  │ deadline passed (tick)
//!   ▼                         ▼
//! review ──approve──▶ completed   failed ──23:59──▶ archive/
//!   │
//!   ├──reject──────────▶ rejected
//!   └──review timeout──▶ rejected (tick)
//! ```
//!
//! A tick runs generate → expire → review timeout → cleanup, then flushes the
//! state markers once. Every status write happens under a per-report lock and
//! re-reads the report first, so a tick never overwrites a transition an HTTP
//! request made in the meantime.

use arabica_core::clock::{BusinessTime, Clock};
use arabica_core::{ArabicaError, RecordStore, Result};
use chrono::{DateTime, NaiveDate, NaiveTime, Timelike, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::inputs::{InputSource, ScheduleEntry, Shop};
use crate::notify::{NotifyPriority, NotifyRouter, Recipient};
use crate::penalty::{PenaltyEntry, PenaltyLedger, PenaltyTarget};
use crate::report::{HandoverReport, ReportKey, ReportKind, ReportStatus, ShiftWindow};
use crate::settings::LifecycleSettings;
use crate::state::{SchedulerState, StateStore};

/// Summary of one tick.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TickReport {
    pub generated: usize,
    pub failed: usize,
    pub rejected: usize,
    pub archived: usize,
    pub errors: usize,
    /// The tick did not run because another one was in progress.
    pub skipped: bool,
}

impl TickReport {
    fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }
}

/// Clears the in-progress flag even if the tick panics.
struct TickGuard<'a>(&'a AtomicBool);

impl<'a> TickGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for TickGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// One mutex per report id.
#[derive(Default)]
struct ReportLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ReportLocks {
    fn get(&self, id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.entry(id.to_string()).or_default().clone()
    }

    /// Forget locks nobody holds.
    fn prune(&self) {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
    }
}

/// Run `f` while holding the lock for `id`.
fn with_report_lock<T>(locks: &ReportLocks, id: &str, f: impl FnOnce() -> T) -> T {
    let lock = locks.get(id);
    let _held = lock.lock().unwrap_or_else(|e| e.into_inner());
    f()
}

const CLEANUP_AT: (u32, u32) = (23, 59);

/// Who a penalty lands on.
struct Charge {
    target: PenaltyTarget,
    entity_id: String,
    entity_name: Option<String>,
    employee_phone: Option<String>,
}

/// Lifecycle engine for one [`ReportKind`].
pub struct LifecycleEngine {
    kind: ReportKind,
    reports: RecordStore<HandoverReport>,
    state: StateStore,
    inputs: InputSource,
    ledger: Arc<PenaltyLedger>,
    notifier: Arc<NotifyRouter>,
    clock: Arc<dyn Clock>,
    time: BusinessTime,
    retention_days: u32,
    ticking: AtomicBool,
    locks: ReportLocks,
}

impl LifecycleEngine {
    /// Open an engine over `data_dir`, creating its directories.
    pub fn open(
        kind: ReportKind,
        data_dir: &Path,
        ledger: Arc<PenaltyLedger>,
        notifier: Arc<NotifyRouter>,
        clock: Arc<dyn Clock>,
        time: BusinessTime,
    ) -> Result<Self> {
        let reports = RecordStore::open(data_dir.join(kind.reports_dir()))?;
        let state_dir = data_dir.join(kind.state_dir());
        std::fs::create_dir_all(&state_dir)?;
        Ok(Self {
            kind,
            reports,
            state: StateStore::new(state_dir),
            inputs: InputSource::new(data_dir),
            ledger,
            notifier,
            clock,
            time,
            retention_days: 7,
            ticking: AtomicBool::new(false),
            locks: ReportLocks::default(),
        })
    }

    /// How many days of state markers to keep.
    pub fn with_retention_days(mut self, days: u32) -> Self {
        self.retention_days = days;
        self
    }

    pub fn kind(&self) -> ReportKind {
        self.kind
    }

    pub fn settings(&self) -> LifecycleSettings {
        self.inputs.settings(self.kind)
    }

    // ── Tick ─────────────────────────────────────────────

    /// Run one full check. Returns immediately with `skipped` if another tick
    /// is still in progress. Per-item failures are logged and counted; they
    /// never abort the tick.
    pub fn tick(&self) -> TickReport {
        let Some(_guard) = TickGuard::acquire(&self.ticking) else {
            tracing::warn!("⏭️ {} tick still running, skipping", self.kind);
            return TickReport::skipped();
        };

        let now = self.clock.now();
        let today = self.time.local_date(now);
        let local_time = self.time.local_time(now);
        let settings = self.settings();
        let mut report = TickReport::default();

        // Reports on disk and the ledger's sourceId dedup keep a fresh state
        // from producing duplicate reports or penalties.
        let mut state = match self.state.load() {
            Ok(state) => state,
            Err(e) => {
                report.errors += 1;
                match self.state.set_aside(now) {
                    Ok(moved) => tracing::error!(
                        "❌ {} state unreadable ({e}), moved to {} and starting fresh",
                        self.kind,
                        moved.display()
                    ),
                    Err(move_err) => tracing::error!(
                        "❌ {} state unreadable ({e}) and could not be moved aside: {move_err}",
                        self.kind
                    ),
                }
                SchedulerState::default()
            }
        };

        self.generate_due(&settings, &mut state, now, today, local_time, &mut report);
        self.expire_overdue(&settings, &mut state, now, &mut report);
        self.expire_reviews(&settings, now, &mut report);
        self.cleanup(&mut state, today, local_time, &mut report);

        let cutoff = today - chrono::Duration::days(i64::from(self.retention_days));
        let pruned = state.prune_before(cutoff);
        if pruned > 0 {
            tracing::debug!("{} state: pruned {pruned} old day(s)", self.kind);
        }
        state.last_check = Some(now);
        if let Err(e) = self.state.save(&state) {
            tracing::error!("❌ Failed to save {} state: {e}", self.kind);
            report.errors += 1;
        }
        self.locks.prune();

        tracing::info!(
            "🔄 {} tick: {} generated, {} failed, {} rejected, {} archived, {} errors",
            self.kind, report.generated, report.failed, report.rejected, report.archived, report.errors
        );
        report
    }

    fn generate_due(
        &self,
        settings: &LifecycleSettings,
        state: &mut SchedulerState,
        now: DateTime<Utc>,
        today: NaiveDate,
        local_time: NaiveTime,
        report: &mut TickReport,
    ) {
        let mut active = Vec::new();
        for window in ShiftWindow::ALL {
            match settings.window(window) {
                Ok(spec) if spec.contains(local_time) => active.push(window),
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!("⚠️ {} {window} window misconfigured: {e}", self.kind);
                    report.errors += 1;
                }
            }
        }
        if active.is_empty() {
            return;
        }

        let shops = match self.inputs.shops() {
            Ok(shops) => shops,
            Err(e) => {
                tracing::error!("❌ Cannot read shops for {} generation: {e}", self.kind);
                report.errors += 1;
                return;
            }
        };

        let mut created = Vec::new();
        for window in active {
            for shop in &shops {
                let key = ReportKey::new(shop.address.clone(), window, today);
                if state.is_generated(&key) {
                    continue;
                }
                match self.generate_one(settings, shop, &key, now) {
                    Ok(is_new) => {
                        state.mark_generated(&key);
                        if is_new {
                            created.push(format!("{} ({window})", shop.address));
                        }
                    }
                    Err(e) => {
                        tracing::warn!("⚠️ Failed to generate {} report for {}: {e}", self.kind, shop.address);
                        report.errors += 1;
                    }
                }
            }
        }

        report.generated = created.len();
        if !created.is_empty() {
            self.notify_admins(
                &format!("{} reports opened", self.kind),
                &format!("{} pending: {}", created.len(), created.join(", ")),
                NotifyPriority::Low,
            );
        }
    }

    /// Create the pending report unless its file already exists (a previous
    /// tick wrote it but crashed before flushing the marker).
    fn generate_one(
        &self,
        settings: &LifecycleSettings,
        shop: &Shop,
        key: &ReportKey,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let id = key.report_id(self.kind);
        with_report_lock(&self.locks, &id, || {
            if self.reports.get(&id)?.is_some() {
                return Ok(false);
            }
            let deadline = shop
                .deadline_override(key.window)
                .unwrap_or_else(|| settings.default_deadline(key.window));
            // Reject a bad deadline now instead of at expiry time.
            arabica_core::clock::parse_hhmm(deadline)?;
            let pending =
                HandoverReport::pending(self.kind, key, shop.name.clone(), deadline.to_string(), now);
            self.reports.put(&pending)?;
            tracing::info!("📝 {} report pending: {} {} (deadline {deadline})", self.kind, shop.address, key.window);
            Ok(true)
        })
    }

    fn expire_overdue(
        &self,
        settings: &LifecycleSettings,
        state: &mut SchedulerState,
        now: DateTime<Utc>,
        report: &mut TickReport,
    ) {
        let pending = match self.reports.list_where(|r| r.status == ReportStatus::Pending) {
            Ok(pending) => pending,
            Err(e) => {
                tracing::error!("❌ Cannot list pending {} reports: {e}", self.kind);
                report.errors += 1;
                return;
            }
        };

        let mut failed = Vec::new();
        for candidate in pending {
            let key = candidate.key();
            if state.is_expired(&key) {
                continue;
            }
            match candidate.deadline_at(&self.time) {
                Ok(deadline) if now >= deadline => {}
                Ok(_) => continue,
                Err(e) => {
                    tracing::warn!("⚠️ Report {} has a bad deadline: {e}", candidate.id);
                    report.errors += 1;
                    continue;
                }
            }
            match self.expire_one(settings, &candidate.id, now) {
                Ok(Some(expired)) => {
                    state.mark_expired(&key);
                    failed.push(format!("{} ({})", expired.shop_address, expired.shift_type));
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!("⚠️ Failed to expire {}: {e}", candidate.id);
                    report.errors += 1;
                }
            }
        }

        report.failed = failed.len();
        if !failed.is_empty() {
            self.notify_admins(
                &format!("{} handovers missed", self.kind),
                &format!("{} overdue: {}", failed.len(), failed.join(", ")),
                NotifyPriority::High,
            );
        }
    }

    /// pending → failed with exactly one penalty. The penalty goes first: the
    /// ledger ignores a repeat, so a crash between the two writes heals on the
    /// next tick. Returns `None` if the report left `pending` in the meantime.
    fn expire_one(
        &self,
        settings: &LifecycleSettings,
        id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<HandoverReport>> {
        with_report_lock(&self.locks, id, || {
            let Some(mut current) = self.reports.get(id)? else {
                return Ok(None);
            };
            if current.status != ReportStatus::Pending {
                tracing::debug!("Report {id} is {} now, not expiring", current.status);
                return Ok(None);
            }

            let assignee = self
                .inputs
                .assignment(&current.shop_address, current.date, current.shift_type);
            let penalty = self.missed_penalty(settings, &current, assignee.as_ref(), now);
            let phone = penalty.employee_phone.clone();
            let points = penalty.points;
            self.ledger.append(penalty)?;

            current.status = ReportStatus::Failed;
            current.failed_at = Some(now);
            self.reports.put(&current)?;
            tracing::warn!("⏰ {} FAILED: {} {} (deadline {})", self.kind, current.shop_address, current.shift_type, current.deadline);

            if let Some(phone) = phone {
                self.notifier.notify(NotifyRouter::create(
                    "Penalty recorded",
                    &format!("{} {} handover missed at {}: {points} pts", current.shift_type, self.kind, current.shop_address),
                    self.kind.as_str(),
                    Recipient::Employee(phone),
                    NotifyPriority::High,
                ));
            }
            Ok(Some(current))
        })
    }

    fn missed_penalty(
        &self,
        settings: &LifecycleSettings,
        report: &HandoverReport,
        assignee: Option<&ScheduleEntry>,
        now: DateTime<Utc>,
    ) -> PenaltyEntry {
        let window_ru = match report.shift_type {
            ShiftWindow::Morning => "утренняя",
            ShiftWindow::Evening => "вечерняя",
        };
        let reason = match self.kind {
            ReportKind::Shift => format!("Не пройдена {window_ru} пересменка"),
            ReportKind::Envelope => format!("Не сдан конверт ({window_ru} смена)"),
        };
        let charge = match assignee {
            Some(entry) => Charge {
                target: PenaltyTarget::Employee,
                entity_id: entry.employee_id.clone(),
                entity_name: entry.employee_name.clone(),
                employee_phone: entry.phone.clone(),
            },
            None => Charge {
                target: PenaltyTarget::Shop,
                entity_id: report.shop_address.clone(),
                entity_name: report.shop_name.clone(),
                employee_phone: None,
            },
        };
        self.penalty(settings, report, charge, reason, now)
    }

    /// Charged to whoever submitted a report that no admin reviewed in time.
    /// `None` when the submitter is unknown.
    fn review_timeout_penalty(
        &self,
        settings: &LifecycleSettings,
        report: &HandoverReport,
        now: DateTime<Utc>,
    ) -> Option<PenaltyEntry> {
        let employee_id = report.employee_id.clone().filter(|id| !id.trim().is_empty())?;
        let employee_name = report.completed_by.clone().filter(|name| !name.trim().is_empty())?;
        let reason = match self.kind {
            ReportKind::Shift => "Пересменка отклонена (админ не проверил вовремя)",
            ReportKind::Envelope => "Конверт отклонён (админ не проверил вовремя)",
        };
        let charge = Charge {
            target: PenaltyTarget::Employee,
            entity_id: employee_id,
            entity_name: Some(employee_name),
            employee_phone: None,
        };
        Some(self.penalty(settings, report, charge, reason.to_string(), now))
    }

    fn penalty(
        &self,
        settings: &LifecycleSettings,
        report: &HandoverReport,
        charge: Charge,
        reason: String,
        now: DateTime<Utc>,
    ) -> PenaltyEntry {
        PenaltyEntry {
            id: format!("penalty_{}_{}", self.kind, uuid::Uuid::new_v4().simple()),
            target: charge.target,
            entity_id: charge.entity_id,
            entity_name: charge.entity_name,
            shop_address: report.shop_address.clone(),
            employee_phone: charge.employee_phone,
            category: self.kind.penalty_category().to_string(),
            category_name: self.kind.penalty_category_name().to_string(),
            date: report.date,
            shift_type: Some(report.shift_type),
            points: settings.missed_penalty,
            reason,
            source_id: report.id.clone(),
            source_type: format!("{}_report", self.kind),
            created_at: now,
        }
    }

    fn expire_reviews(&self, settings: &LifecycleSettings, now: DateTime<Utc>, report: &mut TickReport) {
        let stale = match self.reports.list_where(|r| {
            r.status == ReportStatus::Review && r.review_deadline.is_some_and(|d| now >= d)
        }) {
            Ok(stale) => stale,
            Err(e) => {
                tracing::error!("❌ Cannot list {} reports in review: {e}", self.kind);
                report.errors += 1;
                return;
            }
        };

        let reason = format!("Таймаут проверки ({} ч)", settings.admin_review_timeout);
        let mut rejected = Vec::new();
        for candidate in stale {
            let outcome = with_report_lock(&self.locks, &candidate.id, || -> Result<bool> {
                let Some(mut current) = self.reports.get(&candidate.id)? else {
                    return Ok(false);
                };
                let still_stale = current.status == ReportStatus::Review
                    && current.review_deadline.is_some_and(|d| now >= d);
                if !still_stale {
                    return Ok(false);
                }
                // Penalty before status: a crash in between is retried without a duplicate.
                if let Some(penalty) = self.review_timeout_penalty(settings, &current, now) {
                    self.ledger.append(penalty)?;
                }
                current.status = ReportStatus::Rejected;
                current.rejected_at = Some(now);
                current.rejection_reason = Some(reason.clone());
                self.reports.put(&current)?;
                Ok(true)
            });
            match outcome {
                Ok(true) => {
                    tracing::warn!("⌛ {} review timed out: {}", self.kind, candidate.id);
                    rejected.push(candidate.shop_address);
                }
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!("⚠️ Failed to reject {}: {e}", candidate.id);
                    report.errors += 1;
                }
            }
        }

        report.rejected = rejected.len();
        if !rejected.is_empty() {
            self.notify_admins(
                &format!("{} reviews expired", self.kind),
                &format!("{} auto-rejected: {}", rejected.len(), rejected.join(", ")),
                NotifyPriority::Normal,
            );
        }
    }

    /// At 23:59 local, move the day's failed reports out of the active listing.
    /// A tick that missed that minute sweeps the previous day after midnight;
    /// older failed reports still listed are swept along with it.
    fn cleanup(
        &self,
        state: &mut SchedulerState,
        today: NaiveDate,
        local_time: NaiveTime,
        report: &mut TickReport,
    ) {
        let day = if (local_time.hour(), local_time.minute()) >= CLEANUP_AT {
            today
        } else {
            match today.pred_opt() {
                Some(yesterday) if state.has_day(yesterday) => yesterday,
                _ => return,
            }
        };
        if state.is_cleaned_up(day) {
            return;
        }

        let failed = match self
            .reports
            .list_where(|r| r.status == ReportStatus::Failed && r.date <= day)
        {
            Ok(failed) => failed,
            Err(e) => {
                tracing::error!("❌ Cannot list failed {} reports: {e}", self.kind);
                report.errors += 1;
                return;
            }
        };

        let mut clean = true;
        for candidate in failed {
            let outcome = with_report_lock(&self.locks, &candidate.id, || -> Result<bool> {
                match self.reports.get(&candidate.id)? {
                    Some(current) if current.status == ReportStatus::Failed => {
                        self.reports.archive(&candidate.id)
                    }
                    _ => Ok(false),
                }
            });
            match outcome {
                Ok(true) => report.archived += 1,
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!("⚠️ Failed to archive {}: {e}", candidate.id);
                    report.errors += 1;
                    clean = false;
                }
            }
        }

        if clean {
            state.mark_cleaned_up(day);
        }
        tracing::info!("🧹 {} cleanup for {day}: archived {} failed report(s)", self.kind, report.archived);
    }

    fn notify_admins(&self, title: &str, body: &str, priority: NotifyPriority) {
        self.notifier
            .notify(NotifyRouter::create(title, body, self.kind.as_str(), Recipient::Admins, priority));
    }

    // ── User-driven transitions ──────────────────────────

    pub fn get(&self, id: &str) -> Result<HandoverReport> {
        self.reports
            .get(id)?
            .ok_or_else(|| ArabicaError::not_found("report", id))
    }

    /// Active reports, optionally filtered by date and status, in a stable order.
    pub fn list(&self, date: Option<NaiveDate>, status: Option<ReportStatus>) -> Result<Vec<HandoverReport>> {
        let mut reports = self.reports.list_where(|r| {
            date.is_none_or(|d| r.date == d) && status.is_none_or(|s| r.status == s)
        })?;
        reports.sort_by(|a, b| {
            (a.date, &a.shop_address, a.shift_type).cmp(&(b.date, &b.shop_address, b.shift_type))
        });
        Ok(reports)
    }

    /// pending → review. Without a review timeout the report waits for an admin indefinitely.
    pub fn submit(&self, id: &str, employee_id: &str, employee_name: &str) -> Result<HandoverReport> {
        if employee_id.trim().is_empty() || employee_name.trim().is_empty() {
            return Err(ArabicaError::Validation("employeeId and employeeName are required".into()));
        }
        let timeout = self.settings().review_timeout();

        let submitted = self.transition(id, ReportStatus::Pending, ReportStatus::Review, |report, now| {
            report.employee_id = Some(employee_id.to_string());
            report.completed_by = Some(employee_name.to_string());
            report.completed_at = Some(now);
            report.review_deadline = timeout.map(|t| now + t);
        })?;

        tracing::info!("📨 {} report {id} submitted by {employee_name}", self.kind);
        self.notify_admins(
            &format!("New {} report", self.kind),
            &format!("{employee_name} submitted {} {}", submitted.shop_address, submitted.shift_type),
            NotifyPriority::Normal,
        );
        Ok(submitted)
    }

    /// review → completed.
    pub fn approve(&self, id: &str, admin_name: &str, rating: Option<u8>) -> Result<HandoverReport> {
        if admin_name.trim().is_empty() {
            return Err(ArabicaError::Validation("adminName is required".into()));
        }
        if rating.is_some_and(|r| !(1..=10).contains(&r)) {
            return Err(ArabicaError::Validation("rating must be between 1 and 10".into()));
        }
        let approved = self.transition(id, ReportStatus::Review, ReportStatus::Completed, |report, now| {
            report.reviewed_by = Some(admin_name.to_string());
            report.reviewed_at = Some(now);
            report.rating = rating;
        })?;
        tracing::info!("✅ {} report {id} approved by {admin_name}", self.kind);
        Ok(approved)
    }

    /// review → rejected.
    pub fn reject(&self, id: &str, admin_name: &str, reason: Option<String>) -> Result<HandoverReport> {
        if admin_name.trim().is_empty() {
            return Err(ArabicaError::Validation("adminName is required".into()));
        }
        let rejected = self.transition(id, ReportStatus::Review, ReportStatus::Rejected, |report, now| {
            report.reviewed_by = Some(admin_name.to_string());
            report.reviewed_at = Some(now);
            report.rejected_at = Some(now);
            report.rejection_reason = reason;
        })?;
        tracing::info!("🚫 {} report {id} rejected by {admin_name}", self.kind);
        Ok(rejected)
    }

    /// Check-then-act under the report lock. On any error the stored report is untouched.
    fn transition(
        &self,
        id: &str,
        from: ReportStatus,
        to: ReportStatus,
        apply: impl FnOnce(&mut HandoverReport, DateTime<Utc>),
    ) -> Result<HandoverReport> {
        with_report_lock(&self.locks, id, || {
            let mut report = self.get(id)?;
            if report.status != from {
                return Err(report.transition_error(to));
            }
            apply(&mut report, self.clock.now());
            report.status = to;
            self.reports.put(&report)?;
            Ok(report)
        })
    }
}
