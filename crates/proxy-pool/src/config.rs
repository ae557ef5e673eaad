//! Pool configuration

use std::time::Duration;

use serde::Serialize;

use crate::error::{Error, Result};

/// Housekeeper period bounds when derived from the other timers.
const MIN_SWEEP_PERIOD: Duration = Duration::from_millis(100);
const MAX_SWEEP_PERIOD: Duration = Duration::from_secs(3600);

/// Configuration for a resource pool.
///
/// `Duration::ZERO` is the "disabled" sentinel throughout: a zero `timeout`
/// waits forever, a zero delay never triggers, a zero `hk_delay` derives
/// the housekeeper period from the other timers.
#[derive(Debug, Clone, Serialize)]
pub struct PoolConfig {
    /// Upper bound on live resources; 0 = unbounded (no capacity gate)
    pub max_size: usize,
    /// Aspired lower bound; the housekeeper tops up to it
    pub min_size: usize,
    /// Max wait for a capacity slot; zero = wait forever
    pub timeout: Duration,
    /// Retire a resource after this many uses; 0 = unlimited
    pub max_use: u64,
    /// Retire resources idle longer than this; zero = never
    pub max_avail_delay: Duration,
    /// Warn when a resource is held longer than this; zero = never
    pub max_using_delay: Duration,
    /// Forcibly retire a resource held longer than this; zero = never
    pub max_using_delay_kill: Duration,
    /// Run the health probe every N housekeeper sweeps
    pub health_freq: u64,
    /// Housekeeper period; zero picks a value from the other timers
    pub hk_delay: Duration,
    /// Level for the pool's periodic status line; `None` = DEBUG
    #[serde(skip)]
    pub log_level: Option<tracing::Level>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: 0,
            min_size: 1,
            timeout: Duration::ZERO,
            max_use: 0,
            max_avail_delay: Duration::ZERO,
            max_using_delay: Duration::ZERO,
            max_using_delay_kill: Duration::ZERO,
            health_freq: 1,
            hk_delay: Duration::ZERO,
            log_level: None,
        }
    }
}

impl PoolConfig {
    /// Validate the configuration, returning an error if inconsistent.
    pub fn validate(&self) -> Result<()> {
        if self.max_size > 0 && self.min_size > self.max_size {
            return Err(Error::configuration(format!(
                "min_size ({}) must not exceed max_size ({})",
                self.min_size, self.max_size
            )));
        }
        if self.health_freq == 0 {
            return Err(Error::configuration("health_freq must be at least 1"));
        }
        Ok(())
    }

    /// Effective wait for a capacity slot; `None` = wait forever.
    #[must_use]
    pub(crate) fn acquire_timeout(&self) -> Option<Duration> {
        (self.timeout > Duration::ZERO).then_some(self.timeout)
    }

    /// The housekeeper period: `hk_delay` when set, otherwise half the
    /// tightest configured timer, clamped so sweeps stay between 100 ms
    /// and one hour apart.
    #[must_use]
    pub fn housekeeper_period(&self) -> Duration {
        if self.hk_delay > Duration::ZERO {
            return self.hk_delay;
        }
        let tightest = [
            self.max_avail_delay,
            self.max_using_delay,
            self.max_using_delay_kill,
        ]
        .into_iter()
        .filter(|d| *d > Duration::ZERO)
        .min();
        match tightest {
            Some(t) => (t / 2).clamp(MIN_SWEEP_PERIOD, MAX_SWEEP_PERIOD),
            None => MAX_SWEEP_PERIOD,
        }
    }
}
