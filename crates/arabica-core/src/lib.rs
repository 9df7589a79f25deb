//! # Arabica Core
//!
//! Shared building blocks for the Arabica backend:
//! - [`config`]: TOML configuration with defaults for every field
//! - [`error`]: the error taxonomy used by every crate
//! - [`store`]: file-per-record JSON store with atomic writes
//! - [`clock`]: injectable wall clock and fixed-offset business time

pub mod clock;
pub mod config;
pub mod error;
pub mod store;

pub use clock::{BusinessTime, Clock, ManualClock, SystemClock};
pub use config::ArabicaConfig;
pub use error::{ArabicaError, Result};
pub use store::{Record, RecordStore};
