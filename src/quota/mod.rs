//! Quota tracking and pause control
//!
//! - [`headers`] turns provider response metadata into [`QuotaFeedback`]
//! - [`monitor`] folds feedback into a snapshot and decides when to pause
//! - [`pause`] gates new dispatches while a pause is in effect
//! - [`state`] persists monitor state between runs

pub mod headers;
pub mod monitor;
pub mod pause;
pub mod state;

pub use headers::{QuotaFeedback, ResetHint};
pub use monitor::{QuotaMetrics, QuotaMonitor, QuotaSnapshot, WINDOW_PAUSE_RATIO};
pub use pause::{GateOutcome, PauseController, PauseState};
pub use state::{QuotaState, QuotaStateError};
