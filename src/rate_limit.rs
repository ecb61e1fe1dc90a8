//! In-memory rate limiting for chat requests.
//!
//! DESIGN
//! ======
//! Two independent limits:
//! - Per-user: fixed window of `user_max` requests per `user_window`. The
//!   window opens on the first request and resets once it has expired.
//! - Global: daily cap on primary-provider calls. The counter resets at the
//!   next UTC midnight, both lazily (checked on every use) and proactively
//!   (a scheduled task calls [`RateLimiter::reset_global_if_due`]).
//!
//! Both reset paths take the same lock and test the same predicate, so they
//! converge: whichever runs first resets and moves `reset_at` forward, the
//! other then sees nothing to do.
//!
//! Per-user state is swept once its window opened longer than `stale_after`
//! ago. Windows are far shorter than `stale_after`, so the sweep never
//! removes a live window.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::config::env_parse;

const DEFAULT_USER_MAX: u32 = 10;
const DEFAULT_USER_WINDOW_SECS: u64 = 60;
const DEFAULT_GLOBAL_DAILY_LIMIT: u64 = 14_400;
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 3600;
const DEFAULT_STALE_AFTER_SECS: u64 = 86_400;

#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    pub user_max: u32,
    pub user_window: Duration,
    pub global_daily_limit: u64,
    pub sweep_interval: Duration,
    pub stale_after: Duration,
}

impl RateLimitConfig {
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            user_max: env_parse("RATE_LIMIT_USER_MAX", DEFAULT_USER_MAX),
            user_window: Duration::from_secs(env_parse("RATE_LIMIT_USER_WINDOW_SECS", DEFAULT_USER_WINDOW_SECS)),
            global_daily_limit: env_parse("GROQ_DAILY_LIMIT", DEFAULT_GLOBAL_DAILY_LIMIT),
            sweep_interval: Duration::from_secs(env_parse("RATE_LIMIT_SWEEP_SECS", DEFAULT_SWEEP_INTERVAL_SECS)),
            stale_after: Duration::from_secs(env_parse("RATE_LIMIT_STALE_SECS", DEFAULT_STALE_AFTER_SECS)),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            user_max: DEFAULT_USER_MAX,
            user_window: Duration::from_secs(DEFAULT_USER_WINDOW_SECS),
            global_daily_limit: DEFAULT_GLOBAL_DAILY_LIMIT,
            sweep_interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
            stale_after: Duration::from_secs(DEFAULT_STALE_AFTER_SECS),
        }
    }
}

// =============================================================================
// SNAPSHOTS
// =============================================================================

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalQuotaSnapshot {
    pub requests: u64,
    pub limit: u64,
    /// RFC 3339 timestamp of the next reset.
    pub reset_time: String,
    pub percentage: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitSnapshot {
    pub groq: GlobalQuotaSnapshot,
    pub active_user_limits: usize,
    pub total_user_requests: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetAllSummary {
    pub users_cleared: usize,
    pub global_previous: u64,
}

// =============================================================================
// RATE LIMITER
// =============================================================================

#[derive(Clone)]
pub struct RateLimiter {
    inner: Arc<Mutex<RateLimiterInner>>,
    config: RateLimitConfig,
}

struct RateLimiterInner {
    users: HashMap<String, UserRateState>,
    global: GlobalQuota,
}

struct UserRateState {
    window_count: u32,
    window_reset_at: Instant,
    first_request_at: Instant,
}

/// One claimed unit of the daily quota.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub struct GlobalReservation {
    reset_at: OffsetDateTime,
    count: u64,
}

impl GlobalReservation {
    /// Global count right after this unit was claimed.
    #[must_use]
    pub fn count(&self) -> u64 {
        self.count
    }
}

struct GlobalQuota {
    request_count: u64,
    reset_at: OffsetDateTime,
}

impl GlobalQuota {
    fn new(now: OffsetDateTime) -> Self {
        Self { request_count: 0, reset_at: next_utc_midnight(now) }
    }

    /// Reset when `now` has reached `reset_at`. Returns whether a reset happened.
    fn reset_if_due(&mut self, now: OffsetDateTime) -> bool {
        if now < self.reset_at {
            return false;
        }
        self.request_count = 0;
        self.reset_at = next_utc_midnight(now);
        true
    }
}

impl RateLimiter {
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(RateLimitConfig::from_env())
    }

    #[must_use]
    pub fn with_config(config: RateLimitConfig) -> Self {
        Self::with_config_at(config, OffsetDateTime::now_utc())
    }

    fn with_config_at(config: RateLimitConfig, now: OffsetDateTime) -> Self {
        Self {
            inner: Arc::new(Mutex::new(RateLimiterInner { users: HashMap::new(), global: GlobalQuota::new(now) })),
            config,
        }
    }

    #[must_use]
    pub fn config(&self) -> RateLimitConfig {
        self.config
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RateLimiterInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // -------------------------------------------------------------------------
    // per-user
    // -------------------------------------------------------------------------

    /// Admit or reject one request from `user_id`. Rejection does not count.
    pub fn admit_user(&self, user_id: &str) -> bool {
        self.admit_user_at(user_id, Instant::now())
    }

    fn admit_user_at(&self, user_id: &str, now: Instant) -> bool {
        let mut inner = self.lock();
        let cfg = self.config;
        let Some(state) = inner.users.get_mut(user_id) else {
            inner.users.insert(
                user_id.to_string(),
                UserRateState { window_count: 1, window_reset_at: now + cfg.user_window, first_request_at: now },
            );
            return true;
        };

        if now > state.window_reset_at {
            state.window_count = 1;
            state.window_reset_at = now + cfg.user_window;
            state.first_request_at = now;
            return true;
        }

        if state.window_count < cfg.user_max {
            state.window_count += 1;
            return true;
        }
        false
    }

    /// Time until the user's current window expires, if one is active.
    #[must_use]
    pub fn retry_after(&self, user_id: &str) -> Option<Duration> {
        self.retry_after_at(user_id, Instant::now())
    }

    fn retry_after_at(&self, user_id: &str, now: Instant) -> Option<Duration> {
        let inner = self.lock();
        let state = inner.users.get(user_id)?;
        let remaining = state.window_reset_at.checked_duration_since(now)?;
        (!remaining.is_zero()).then_some(remaining)
    }

    /// Requests counted in the user's current window.
    #[must_use]
    pub fn user_request_count(&self, user_id: &str) -> Option<u32> {
        self.lock().users.get(user_id).map(|s| s.window_count)
    }

    /// Drop per-user state whose window opened more than `stale_after` ago.
    pub fn sweep_stale(&self) -> usize {
        self.sweep_stale_at(Instant::now())
    }

    fn sweep_stale_at(&self, now: Instant) -> usize {
        let stale_after = self.config.stale_after;
        let mut inner = self.lock();
        let before = inner.users.len();
        inner
            .users
            .retain(|_, s| now.saturating_duration_since(s.first_request_at) <= stale_after);
        before - inner.users.len()
    }

    // -------------------------------------------------------------------------
    // global quota
    // -------------------------------------------------------------------------

    /// Whether the primary provider may be called. Does not consume capacity.
    #[must_use]
    pub fn has_global_capacity(&self) -> bool {
        self.has_global_capacity_at(OffsetDateTime::now_utc())
    }

    fn has_global_capacity_at(&self, now: OffsetDateTime) -> bool {
        let mut inner = self.lock();
        inner.global.reset_if_due(now);
        inner.global.request_count < self.config.global_daily_limit
    }

    /// Count one primary-provider call. Returns the new count.
    pub fn consume_global(&self) -> u64 {
        self.consume_global_at(OffsetDateTime::now_utc())
    }

    fn consume_global_at(&self, now: OffsetDateTime) -> u64 {
        let mut inner = self.lock();
        inner.global.reset_if_due(now);
        inner.global.request_count += 1;
        inner.global.request_count
    }

    /// Claim one unit of the daily quota for a primary call, if any is left.
    /// Check and increment happen under one lock, so concurrent callers can
    /// never push the count past the limit.
    pub fn try_reserve_global(&self) -> Option<GlobalReservation> {
        self.try_reserve_global_at(OffsetDateTime::now_utc())
    }

    fn try_reserve_global_at(&self, now: OffsetDateTime) -> Option<GlobalReservation> {
        let mut inner = self.lock();
        inner.global.reset_if_due(now);
        if inner.global.request_count >= self.config.global_daily_limit {
            return None;
        }
        inner.global.request_count += 1;
        Some(GlobalReservation { reset_at: inner.global.reset_at, count: inner.global.request_count })
    }

    /// Hand back a unit whose primary call failed. A no-op once the quota
    /// day it was taken from has ended.
    pub fn release_global(&self, reservation: GlobalReservation) {
        let mut inner = self.lock();
        if inner.global.reset_at == reservation.reset_at {
            inner.global.request_count = inner.global.request_count.saturating_sub(1);
        }
    }

    /// Scheduled reset path. Idempotent: a second call is a no-op.
    pub fn reset_global_if_due(&self) -> bool {
        self.reset_global_if_due_at(OffsetDateTime::now_utc())
    }

    pub(crate) fn reset_global_if_due_at(&self, now: OffsetDateTime) -> bool {
        self.lock().global.reset_if_due(now)
    }

    /// When the global counter next resets.
    #[must_use]
    pub fn global_reset_at(&self) -> OffsetDateTime {
        self.lock().global.reset_at
    }

    #[must_use]
    pub fn global_request_count(&self) -> u64 {
        self.lock().global.request_count
    }

    // -------------------------------------------------------------------------
    // admin
    // -------------------------------------------------------------------------

    /// Clear one user's window. Returns the prior count (0 if untracked).
    pub fn reset_user(&self, user_id: &str) -> u32 {
        self.lock()
            .users
            .remove(user_id)
            .map_or(0, |s| s.window_count)
    }

    /// Zero the global counter. Returns the prior count.
    pub fn reset_global(&self) -> u64 {
        self.reset_global_at(OffsetDateTime::now_utc())
    }

    fn reset_global_at(&self, now: OffsetDateTime) -> u64 {
        let mut inner = self.lock();
        let previous = inner.global.request_count;
        inner.global = GlobalQuota::new(now);
        previous
    }

    /// Clear every user window and the global counter.
    pub fn reset_all(&self) -> ResetAllSummary {
        let now = OffsetDateTime::now_utc();
        let mut inner = self.lock();
        let users_cleared = inner.users.len();
        inner.users.clear();
        let global_previous = inner.global.request_count;
        inner.global = GlobalQuota::new(now);
        ResetAllSummary { users_cleared, global_previous }
    }

    /// Copy of the current counters for the dashboard.
    #[must_use]
    pub fn snapshot(&self) -> RateLimitSnapshot {
        self.snapshot_at(OffsetDateTime::now_utc())
    }

    fn snapshot_at(&self, now: OffsetDateTime) -> RateLimitSnapshot {
        let limit = self.config.global_daily_limit;
        let mut inner = self.lock();
        inner.global.reset_if_due(now);
        let requests = inner.global.request_count;
        RateLimitSnapshot {
            groq: GlobalQuotaSnapshot {
                requests,
                limit,
                reset_time: inner.global.reset_at.format(&Rfc3339).unwrap_or_default(),
                percentage: percentage(requests, limit),
            },
            active_user_limits: inner.users.len(),
            total_user_requests: inner
                .users
                .values()
                .map(|s| u64::from(s.window_count))
                .sum(),
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// HELPERS
// =============================================================================

/// The first UTC midnight strictly after `now`.
#[must_use]
pub fn next_utc_midnight(now: OffsetDateTime) -> OffsetDateTime {
    let today = now.to_offset(time::UtcOffset::UTC).date();
    let tomorrow = today.next_day().unwrap_or(today);
    tomorrow.midnight().assume_utc()
}

#[allow(clippy::cast_precision_loss)]
fn percentage(requests: u64, limit: u64) -> f64 {
    if limit == 0 {
        return 100.0;
    }
    let pct = requests as f64 / limit as f64 * 100.0;
    (pct * 10.0).round() / 10.0
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[path = "rate_limit_test.rs"]
mod tests;
