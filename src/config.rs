//! Quorum configuration.
//!
//! Loaded from `~/.quorum/config.toml`. Every key is optional; a missing file
//! means all defaults.
//!
//! ```toml
//! user = "alice"
//! client-url = "https://quorum.example.org"
//! grace-period = "168h"
//! expire-after = "720h"
//! remind-cron = "0 0 11 * * *"
//! expire-cron = "0 0 12 * * *"
//! outbox = "/var/spool/quorum/outbox.jsonl"
//! ```
//!
//! Durations take jiff's friendly format (`"90s"`, `"5m"`, `"168h"`) or ISO 8601 (`"PT168H"`).
//! Sweep schedules are six-field cron expressions, seconds first, in local time.

use std::{fs, path::PathBuf, time::Duration};

use jiff::SignedDuration;
use serde::{Deserialize, Serialize};

use crate::{engine::Settings, scheduler};

/// Upper bound for `grace-period` and `expire-after`: ten years.
const MAX_LIFECYCLE_PERIOD: SignedDuration = SignedDuration::from_hours(10 * 365 * 24);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct Config {
    /// The acting user when neither `--as` nor `QUORUM_USER` is given.
    pub user: Option<String>,

    /// Database file. Defaults to `~/.quorum/quorum.sqlite`.
    pub database: Option<PathBuf>,

    /// Base URL of the client app, used for links in emails.
    pub client_url: String,

    /// How long a report awaits confirmation before it resolves.
    pub grace_period: SignedDuration,

    /// How long an open report may go without an update before it expires.
    pub expire_after: SignedDuration,

    /// Budget for a vote or progress upload, and the database busy timeout.
    pub op_timeout: SignedDuration,

    /// When the reminder sweep runs.
    pub remind_cron: String,

    /// When the expiration sweep runs.
    pub expire_cron: String,

    /// How often the task worker polls for due tasks.
    pub poll_interval: SignedDuration,

    /// How long a claimed task is hidden from other workers.
    pub task_lease: SignedDuration,

    /// Append status emails to this JSONL file. When unset they are only logged.
    pub outbox: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        let settings = Settings::default();
        Self {
            user: None,
            database: None,
            client_url: settings.client_url,
            grace_period: settings.grace_period,
            expire_after: settings.expire_after,
            op_timeout: SignedDuration::from_secs(5),
            remind_cron: "0 0 11 * * *".to_string(),
            expire_cron: "0 0 12 * * *".to_string(),
            poll_interval: SignedDuration::from_secs(5),
            task_lease: SignedDuration::from_mins(5),
            outbox: None,
        }
    }
}

impl Config {
    /// Load config from `~/.quorum/config.toml`, or defaults if there is none.
    pub fn load() -> Result<Self, String> {
        let Some(path) = Self::path() else {
            return Ok(Self::default());
        };
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(&path)
            .map_err(|e| format!("failed to read {}: {e}", path.display()))?;

        Self::from_toml(&contents).map_err(|e| format!("invalid config at {}: {e}", path.display()))
    }

    /// Parse and validate config text.
    pub fn from_toml(contents: &str) -> Result<Self, String> {
        let config: Self = toml::from_str(contents).map_err(|e| e.to_string())?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), String> {
        for (key, value) in [
            ("grace-period", self.grace_period),
            ("expire-after", self.expire_after),
            ("op-timeout", self.op_timeout),
            ("poll-interval", self.poll_interval),
            ("task-lease", self.task_lease),
        ] {
            if !value.is_positive() {
                return Err(format!("{key} must be positive, got {value}"));
            }
        }
        for (key, value) in [("grace-period", self.grace_period), ("expire-after", self.expire_after)] {
            if value > MAX_LIFECYCLE_PERIOD {
                return Err(format!("{key} must be at most {MAX_LIFECYCLE_PERIOD:#}, got {value:#}"));
            }
        }
        scheduler::parse(&self.remind_cron).map_err(|e| format!("remind-cron: {e}"))?;
        scheduler::parse(&self.expire_cron).map_err(|e| format!("expire-cron: {e}"))?;
        if self.client_url.trim().is_empty() {
            return Err("client-url must not be empty".to_string());
        }
        Ok(())
    }

    /// The config file path: `~/.quorum/config.toml`.
    pub fn path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".quorum").join("config.toml"))
    }

    /// The lifecycle tunables this config describes.
    pub fn settings(&self) -> Settings {
        Settings {
            grace_period: self.grace_period,
            expire_after: self.expire_after,
            op_timeout: to_std(self.op_timeout),
            client_url: self.client_url.clone(),
        }
    }

    pub fn op_timeout(&self) -> Duration {
        to_std(self.op_timeout)
    }

    pub fn poll_interval(&self) -> Duration {
        to_std(self.poll_interval)
    }
}

fn to_std(duration: SignedDuration) -> Duration {
    Duration::try_from(duration).unwrap_or(Duration::ZERO)
}
