//! Scheduler errors
//!
//! Only setup can fail. Scheduling operations report "not found" as a plain
//! `bool`, and caller contract violations panic.

use crate::config::ConfigError;

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("failed to spawn job worker thread: {0}")]
    Spawn(#[from] std::io::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
}
