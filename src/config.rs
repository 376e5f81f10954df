//! Duet driver configuration.
//!
//! Values come from [`DuetConfig::default`] and may be overridden through the
//! environment with [`DuetConfig::from_env`]:
//!
//! - `DUET_POLL_INTERVAL_MS`: delay between deadlock polls, in milliseconds
//! - `DUET_CONFIRMATIONS`: consecutive stalled polls required before giving up
//! - `DUET_LOG_LEVEL`: `debug`, `info`, `warn` or `error`

use crate::utils::log::{self, Level};
use crate::warn;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Default delay between two deadlock polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);
/// Default number of consecutive stalled polls that confirm a deadlock.
pub const DEFAULT_CONFIRMATIONS: u32 = 3;

pub const ENV_POLL_INTERVAL_MS: &str = "DUET_POLL_INTERVAL_MS";
pub const ENV_CONFIRMATIONS: &str = "DUET_CONFIRMATIONS";
pub const ENV_LOG_LEVEL: &str = "DUET_LOG_LEVEL";

/// Settings for the two-machine driver.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DuetConfig {
    /// Delay between two polls of both machines.
    pub poll_interval: Duration,
    /// Consecutive polls that must observe the same stalled state (both
    /// machines parked or finished, no new sends) before the run is declared
    /// stuck. Clamped to at least 1.
    pub confirmations: u32,
    /// Minimum level written by the logger, applied by [`DuetConfig::apply_log_level`].
    pub log_level: Level,
}

impl Default for DuetConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            confirmations: DEFAULT_CONFIRMATIONS,
            log_level: Level::Info,
        }
    }
}

impl DuetConfig {
    /// Builds a configuration from the process environment.
    ///
    /// Unset variables keep their defaults; malformed ones are reported with
    /// a warning and ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds a configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(ms) = parse_var::<u64, _>(&lookup, ENV_POLL_INTERVAL_MS) {
            config.poll_interval = Duration::from_millis(ms);
        }
        if let Some(n) = parse_var::<u32, _>(&lookup, ENV_CONFIRMATIONS) {
            config.confirmations = n;
        }
        if let Some(level) = parse_var::<Level, _>(&lookup, ENV_LOG_LEVEL) {
            config.log_level = level;
        }
        config
    }

    /// Sets the poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Sets the number of confirming polls.
    pub fn with_confirmations(mut self, confirmations: u32) -> Self {
        self.confirmations = confirmations;
        self
    }

    /// Installs `log_level` as the global logger threshold.
    pub fn apply_log_level(&self) {
        log::set_level(self.log_level);
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Option<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key)?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("ignoring {key}={raw:?}: {e}");
            None
        }
    }
}
