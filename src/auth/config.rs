//! Policy configuration with builder-style overrides.
//!
//! Thresholds and lifetimes are deployment knobs, not constants. The values
//! here are defaults tuned for a restaurant floor: short PINs, shared
//! tablets, and staff who occasionally fat-finger their code.

use chrono::Duration;

use super::attempts::LockoutPolicy;
use super::rate_limit::RateLimitPolicy;
use super::session::SessionPolicy;

const DEFAULT_MAX_FAILURES: u32 = 3;
const DEFAULT_LOCKOUT_BASE_SECONDS: i64 = 30;
const DEFAULT_LOCKOUT_GROWTH: u32 = 4;
const DEFAULT_LOCKOUT_CAP_SECONDS: i64 = 10 * 60;
const DEFAULT_IDLE_TTL_SECONDS: i64 = 30 * 60;
const DEFAULT_ABSOLUTE_TTL_SECONDS: i64 = 12 * 60 * 60;
const DEFAULT_DEVICE_ATTEMPTS: u32 = 10;
const DEFAULT_ADDR_ATTEMPTS: u32 = 30;
const DEFAULT_RATE_WINDOW_SECONDS: i64 = 60;
const DEFAULT_RETRY_BACKOFF_MS: u64 = 250;
const DEFAULT_SWEEP_INTERVAL_SECONDS: u64 = 5 * 60;

#[derive(Clone, Debug)]
pub struct AuthConfig {
    max_failures: u32,
    lockout_base_seconds: i64,
    lockout_growth: u32,
    lockout_cap_seconds: i64,
    idle_ttl_seconds: i64,
    absolute_ttl_seconds: i64,
    device_attempts: u32,
    addr_attempts: u32,
    rate_window_seconds: i64,
    retry_backoff_ms: u64,
    sweep_interval_seconds: u64,
    secure_cookies: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            max_failures: DEFAULT_MAX_FAILURES,
            lockout_base_seconds: DEFAULT_LOCKOUT_BASE_SECONDS,
            lockout_growth: DEFAULT_LOCKOUT_GROWTH,
            lockout_cap_seconds: DEFAULT_LOCKOUT_CAP_SECONDS,
            idle_ttl_seconds: DEFAULT_IDLE_TTL_SECONDS,
            absolute_ttl_seconds: DEFAULT_ABSOLUTE_TTL_SECONDS,
            device_attempts: DEFAULT_DEVICE_ATTEMPTS,
            addr_attempts: DEFAULT_ADDR_ATTEMPTS,
            rate_window_seconds: DEFAULT_RATE_WINDOW_SECONDS,
            retry_backoff_ms: DEFAULT_RETRY_BACKOFF_MS,
            sweep_interval_seconds: DEFAULT_SWEEP_INTERVAL_SECONDS,
            secure_cookies: false,
        }
    }
}

impl AuthConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_max_failures(mut self, failures: u32) -> Self {
        self.max_failures = failures.max(1);
        self
    }

    #[must_use]
    pub fn with_lockout_base_seconds(mut self, seconds: i64) -> Self {
        self.lockout_base_seconds = seconds.max(1);
        self
    }

    #[must_use]
    pub fn with_lockout_cap_seconds(mut self, seconds: i64) -> Self {
        self.lockout_cap_seconds = seconds.max(1);
        self
    }

    #[must_use]
    pub fn with_idle_ttl_seconds(mut self, seconds: i64) -> Self {
        self.idle_ttl_seconds = seconds.max(1);
        self
    }

    #[must_use]
    pub fn with_absolute_ttl_seconds(mut self, seconds: i64) -> Self {
        self.absolute_ttl_seconds = seconds.max(1);
        self
    }

    #[must_use]
    pub fn with_device_attempts(mut self, attempts: u32) -> Self {
        self.device_attempts = attempts.max(1);
        self
    }

    #[must_use]
    pub fn with_addr_attempts(mut self, attempts: u32) -> Self {
        self.addr_attempts = attempts.max(1);
        self
    }

    #[must_use]
    pub fn with_rate_window_seconds(mut self, seconds: i64) -> Self {
        self.rate_window_seconds = seconds.max(1);
        self
    }

    #[must_use]
    pub fn with_secure_cookies(mut self, secure: bool) -> Self {
        self.secure_cookies = secure;
        self
    }

    #[must_use]
    pub fn lockout_policy(&self) -> LockoutPolicy {
        LockoutPolicy {
            max_failures: self.max_failures,
            base: Duration::seconds(self.lockout_base_seconds),
            growth: self.lockout_growth,
            cap: Duration::seconds(self.lockout_cap_seconds),
        }
    }

    #[must_use]
    pub fn rate_limit_policy(&self) -> RateLimitPolicy {
        RateLimitPolicy {
            device_attempts: self.device_attempts,
            addr_attempts: self.addr_attempts,
            window: Duration::seconds(self.rate_window_seconds),
        }
    }

    #[must_use]
    pub fn session_policy(&self) -> SessionPolicy {
        SessionPolicy {
            idle_ttl: Duration::seconds(self.idle_ttl_seconds),
            absolute_ttl: Duration::seconds(self.absolute_ttl_seconds),
            retry_backoff: std::time::Duration::from_millis(self.retry_backoff_ms),
        }
    }

    #[must_use]
    pub fn idle_ttl_seconds(&self) -> i64 {
        self.idle_ttl_seconds
    }

    #[must_use]
    pub fn sweep_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.sweep_interval_seconds)
    }

    #[must_use]
    pub fn secure_cookies(&self) -> bool {
        self.secure_cookies
    }
}
