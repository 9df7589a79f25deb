//! # Arabica Gateway
//!
//! HTTP + WebSocket front door for the Arabica backend.
//!
//! ```text
//! axum Router
//!   ├── /health
//!   ├── /api/v1/{shift|envelope}/reports      → LifecycleEngine (list/get/submit/approve/reject)
//!   ├── /api/v1/{shift|envelope}/tick         → run_tick (manual trigger)
//!   ├── /api/v1/penalties/{month}             → PenaltyLedger
//!   ├── /api/v1/chat/online                   → PresenceCoordinator
//!   ├── /api/v1/notifications                 → NotifyRouter history
//!   └── /ws/employee-chat?phone=...           → PresenceCoordinator
//!                                                 ├── online_status fan-out
//!                                                 ├── typing (auto-expire)
//!                                                 └── heartbeat / stale-connection reaping
//! ```

pub mod presence;
pub mod routes;
pub mod server;
pub mod ws;

pub use presence::{Connection, PresenceCoordinator, ServerEvent};
pub use server::{AppState, build_router, serve, start};
