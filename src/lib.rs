// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod baseline;
pub mod change_detector;
pub mod config;
pub mod error;
pub mod extract;
pub mod history;
pub mod metrics;
pub mod notify;
pub mod positions;
pub mod progress;
pub mod runner;
pub mod snapshot;

pub use crate::config::WatchConfig;
pub use crate::error::WatchError;
pub use crate::runner::{RunSummary, Runner, Stage};
