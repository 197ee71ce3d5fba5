//! Lock timing configuration.
//!
//! Loads configuration from environment variables with sensible defaults.

use crate::error::{EventError, Result};
use std::env;
use std::time::Duration;

/// Default lease refresh period.
pub const DEFAULT_RENEW_INTERVAL: Duration = Duration::from_secs(30);

/// Default lease expiry timeout.
pub const DEFAULT_EXPIRE_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Timing knobs of the lock subsystem.
///
/// The expiry timeout must be strictly greater than twice the renew
/// interval, so a healthy holder always refreshes well inside its lease.
#[derive(Debug, Clone, Copy)]
pub struct LockConfig {
    /// How often the renewer refreshes held leases
    pub renew_interval: Duration,
    /// How long a lease may go unrefreshed before another acquirer may
    /// steal the lock
    pub expire_timeout: Duration,
}

impl LockConfig {
    /// Create a validated configuration.
    pub fn new(renew_interval: Duration, expire_timeout: Duration) -> Result<Self> {
        let config = Self { renew_interval, expire_timeout };
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from environment variables.
    ///
    /// Reads `GANTRY_LOCK_RENEW_INTERVAL_SECS` and
    /// `GANTRY_LOCK_EXPIRE_TIMEOUT_SECS`, falling back to 30s / 300s.
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (ignore errors)
        let _ = dotenvy::dotenv();

        let renew_interval =
            Self::load_secs_env("GANTRY_LOCK_RENEW_INTERVAL_SECS", DEFAULT_RENEW_INTERVAL)?;
        let expire_timeout =
            Self::load_secs_env("GANTRY_LOCK_EXPIRE_TIMEOUT_SECS", DEFAULT_EXPIRE_TIMEOUT)?;

        Self::new(renew_interval, expire_timeout)
    }

    /// Create test configuration with short intervals.
    pub fn test() -> Self {
        Self {
            renew_interval: Duration::from_millis(50),
            expire_timeout: Duration::from_millis(200),
        }
    }

    fn validate(&self) -> Result<()> {
        if self.renew_interval.is_zero() {
            return Err(EventError::Config("renew interval must be non-zero".to_string()));
        }
        if self.expire_timeout <= self.renew_interval * 2 {
            return Err(EventError::Config(format!(
                "expire timeout ({:?}) must be greater than twice the renew interval ({:?})",
                self.expire_timeout, self.renew_interval,
            )));
        }
        Ok(())
    }

    fn load_secs_env(key: &str, default: Duration) -> Result<Duration> {
        match env::var(key) {
            Ok(val) => {
                let secs = val.parse::<u64>().map_err(|_| {
                    EventError::Config(format!("Invalid {} value: {}", key, val))
                })?;
                Ok(Duration::from_secs(secs))
            },
            Err(_) => Ok(default),
        }
    }

    /// Expiry timeout as a chrono duration, for lease-age arithmetic.
    pub(crate) fn expire_timeout_chrono(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.expire_timeout).unwrap_or(chrono::Duration::MAX)
    }
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            renew_interval: DEFAULT_RENEW_INTERVAL,
            expire_timeout: DEFAULT_EXPIRE_TIMEOUT,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
