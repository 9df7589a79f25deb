//! # Arabica Scheduler
//!
//! Background lifecycle engines for shift and envelope handover reports.
//! File-based state, tokio timers, no external services.
//!
//! ## Architecture
//! ```text
//! LifecycleRunner (tokio interval, one per kind)
//!   └── LifecycleEngine::tick
//!         ├── generate  shops × active windows ──▶ pending report + "generated" marker
//!         ├── expire    pending past deadline  ──▶ penalty ──▶ failed + "expired" marker
//!         ├── reviews   review past timeout    ──▶ rejected
//!         ├── cleanup   23:59 local            ──▶ failed reports archived
//!         └── on events ──▶ NotifyRouter ──▶ LogSink / WebhookSink
//!
//! HTTP (gateway) ──▶ LifecycleEngine::{submit, approve, reject}
//!                     (same per-report locks as the tick)
//! ```

pub mod inputs;
pub mod lifecycle;
pub mod notify;
pub mod penalty;
pub mod report;
pub mod runner;
pub mod settings;
pub mod state;

pub use inputs::{InputSource, ScheduleEntry, Shop};
pub use lifecycle::{LifecycleEngine, TickReport};
pub use notify::{LogSink, Notification, NotifyPriority, NotifyRouter, NotifySink, Recipient, WebhookSink};
pub use penalty::{PenaltyEntry, PenaltyLedger, PenaltyTarget};
pub use report::{HandoverReport, ReportKey, ReportKind, ReportStatus, ShiftWindow};
pub use runner::{LifecycleRunner, run_tick};
pub use settings::LifecycleSettings;
pub use state::{SchedulerState, StateStore};
