//! Buffer configuration
//!
//! A [`BufferConfig`] holds the trigger settings a buffer starts with. The
//! period and limit can be changed later on the buffer itself; `distinct`
//! and `close_policy` are fixed for the lifetime of the buffer.

use std::str::FromStr;
use std::time::Duration;

use crate::error::BufferError;

/// Period used by [`BufferConfig::from_env`] when none is set
pub const DEFAULT_PERIOD: Duration = Duration::from_secs(1);

/// What `close()` does with items that are still pending
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClosePolicy {
    /// Deliver pending items to the handler before closing
    #[default]
    Flush,
    /// Drop pending items without calling the handler
    Discard,
}

impl FromStr for ClosePolicy {
    type Err = BufferError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "flush" => Ok(Self::Flush),
            "discard" => Ok(Self::Discard),
            other => Err(BufferError::InvalidConfig(format!(
                "unknown close policy '{other}', expected 'flush' or 'discard'"
            ))),
        }
    }
}

/// Trigger settings for a buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferConfig {
    /// Interval of the background flush. Must be non-zero.
    pub period: Duration,
    /// Pending count that triggers a flush inside `put`; `0` disables it.
    pub limit: usize,
    /// Coalesce equal items (spooler only)
    pub distinct: bool,
    pub close_policy: ClosePolicy,
}

impl BufferConfig {
    #[must_use]
    pub fn new(period: Duration, limit: usize) -> Self {
        Self {
            period,
            limit,
            distinct: false,
            close_policy: ClosePolicy::default(),
        }
    }

    #[must_use]
    pub fn with_distinct(mut self, distinct: bool) -> Self {
        self.distinct = distinct;
        self
    }

    #[must_use]
    pub fn with_close_policy(mut self, close_policy: ClosePolicy) -> Self {
        self.close_policy = close_policy;
        self
    }

    /// Check the settings before a buffer is built from them
    ///
    /// # Errors
    /// Returns `InvalidPeriod` if the period is zero
    pub fn validate(&self) -> Result<(), BufferError> {
        validate_period(self.period)
    }

    /// Read the configuration from environment variables
    ///
    /// Recognized variables, all optional:
    /// - `<PREFIX>_PERIOD_MS` (default 1000)
    /// - `<PREFIX>_LIMIT` (default 0)
    /// - `<PREFIX>_DISTINCT` (`true`/`false`, `1`/`0`; default false)
    /// - `<PREFIX>_CLOSE_POLICY` (`flush` or `discard`; default flush)
    ///
    /// # Errors
    /// Returns `InvalidConfig` for unparseable values and `InvalidPeriod`
    /// for a zero period
    pub fn from_env(prefix: &str) -> Result<Self, BufferError> {
        Self::from_lookup(prefix, |name| std::env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env), reading values through `lookup`
    ///
    /// # Errors
    /// See [`from_env`](Self::from_env)
    pub fn from_lookup<F>(prefix: &str, lookup: F) -> Result<Self, BufferError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |suffix: &str| {
            let name = format!("{prefix}_{suffix}");
            lookup(&name).map(|value| (name, value))
        };

        let mut config = Self::new(DEFAULT_PERIOD, 0);

        if let Some((name, value)) = var("PERIOD_MS") {
            let millis: u64 = parse_number(&name, &value)?;
            config.period = Duration::from_millis(millis);
        }
        if let Some((name, value)) = var("LIMIT") {
            config.limit = parse_number(&name, &value)?;
        }
        if let Some((name, value)) = var("DISTINCT") {
            config.distinct = parse_flag(&name, &value)?;
        }
        if let Some((_, value)) = var("CLOSE_POLICY") {
            config.close_policy = value.parse()?;
        }

        config.validate()?;
        Ok(config)
    }
}

pub(crate) fn validate_period(period: Duration) -> Result<(), BufferError> {
    if period.is_zero() {
        return Err(BufferError::InvalidPeriod);
    }
    Ok(())
}

fn parse_number<N: FromStr>(name: &str, value: &str) -> Result<N, BufferError> {
    value
        .trim()
        .parse()
        .map_err(|_| BufferError::InvalidConfig(format!("{name}: '{value}' is not a valid number")))
}

fn parse_flag(name: &str, value: &str) -> Result<bool, BufferError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(BufferError::InvalidConfig(format!(
            "{name}: '{value}' is not a boolean"
        ))),
    }
}
