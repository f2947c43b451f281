//! Scheduler configuration
//!
//! Settings for the background worker thread and for how finished
//! notifications reach their consumers. Configuration can be loaded from
//! environment variables or created programmatically.

/// Default name of the background worker thread.
pub const DEFAULT_WORKER_NAME: &str = "butterpaper-job-worker";

/// Configuration for the job scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Name given to the background worker thread
    pub worker_name: String,

    /// Stack size of the worker thread in bytes (`None` uses the platform default)
    pub worker_stack_size: Option<usize>,

    /// Deliver blocking-job finished hooks on the owning thread.
    ///
    /// When false, hooks run directly on the worker thread. Only useful for
    /// headless tools that have no owning event loop.
    pub notify_on_owner: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            worker_name: DEFAULT_WORKER_NAME.to_string(),
            worker_stack_size: None,
            notify_on_owner: true,
        }
    }
}

impl SchedulerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the worker thread name.
    pub fn with_worker_name(mut self, name: impl Into<String>) -> Self {
        self.worker_name = name.into();
        self
    }

    /// Sets the worker thread stack size in kilobytes.
    ///
    /// Sizes beyond `usize::MAX` bytes saturate; spawning then fails.
    pub fn with_worker_stack_kb(mut self, kb: usize) -> Self {
        self.worker_stack_size = Some(kb.saturating_mul(1024));
        self
    }

    /// Sets whether finished hooks are marshaled onto the owning thread.
    pub fn with_notify_on_owner(mut self, notify_on_owner: bool) -> Self {
        self.notify_on_owner = notify_on_owner;
        self
    }

    /// Loads configuration from environment variables.
    ///
    /// Environment variables:
    /// - `BUTTERPAPER_JOB_WORKER_NAME`: worker thread name
    /// - `BUTTERPAPER_JOB_WORKER_STACK_KB`: worker stack size in KB
    /// - `BUTTERPAPER_JOB_NOTIFY_ON_OWNER`: `1`/`true` or `0`/`false` (default: true)
    ///
    /// # Errors
    /// Returns an error if any environment variable contains an invalid value.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("BUTTERPAPER_JOB_WORKER_NAME") {
            if val.trim().is_empty() {
                return Err(ConfigError::InvalidValue(
                    "BUTTERPAPER_JOB_WORKER_NAME".to_string(),
                ));
            }
            config.worker_name = val;
        }

        if let Ok(val) = std::env::var("BUTTERPAPER_JOB_WORKER_STACK_KB") {
            let bytes = val
                .trim()
                .parse::<usize>()
                .ok()
                .and_then(|kb| kb.checked_mul(1024))
                .ok_or_else(|| {
                    ConfigError::InvalidValue("BUTTERPAPER_JOB_WORKER_STACK_KB".to_string())
                })?;
            config.worker_stack_size = Some(bytes);
        }

        if let Ok(val) = std::env::var("BUTTERPAPER_JOB_NOTIFY_ON_OWNER") {
            config.notify_on_owner = parse_bool(&val).ok_or_else(|| {
                ConfigError::InvalidValue("BUTTERPAPER_JOB_NOTIFY_ON_OWNER".to_string())
            })?;
        }

        Ok(config)
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Errors that can occur while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for configuration key: {0}")]
    InvalidValue(String),
}
