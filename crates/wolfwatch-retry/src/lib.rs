//! Retry scheduling for Wolfwatch.
//!
//! Provides exponential backoff with optional jitter and a cancellable,
//! single-slot retry timer for the connection manager's reconnect loop.
//!
//! # Integration
//!
//! The timer is designed to sit inside the connection driver's
//! `tokio::select!` loop, next to the command channel and the socket:
//!
//! ```ignore
//! loop {
//!     tokio::select! {
//!         Some(cmd) = cmd_rx.recv() => { /* connect / disconnect */ }
//!         attempt = timer.fired() => {
//!             start_dial(attempt);
//!         }
//!     }
//! }
//! ```
//!
//! [`RetryTimer::fired`] pends forever while nothing is scheduled, so the
//! branch costs nothing when the link is healthy.

use std::time::Duration;

use rand::Rng;
use tokio::time::{self, Instant as TokioInstant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// How reconnect delays grow and when to give up.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    /// Delay before the first retry. Default: 1 s.
    pub base_delay: Duration,
    /// Upper bound for any single delay. Default: 30 s.
    pub max_delay: Duration,
    /// Growth factor per attempt. Default: 2.0 (doubling).
    pub multiplier: f64,
    /// Retries allowed before giving up. Default: 5.
    pub max_attempts: u32,
    /// Random extra delay, as a fraction of the computed delay (0.0–1.0).
    /// Default: 0.0 (deterministic).
    pub jitter: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            max_attempts: 5,
            jitter: 0.0,
        }
    }
}

impl BackoffPolicy {
    #[must_use]
    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    #[must_use]
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    #[must_use]
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Sets the jitter fraction, clamped to `0.0..=1.0`.
    #[must_use]
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = if jitter.is_finite() {
            jitter.clamp(0.0, 1.0)
        } else {
            0.0
        };
        self
    }

    /// The un-jittered delay before retry number `attempt` (1-based):
    /// `base_delay * multiplier^(attempt - 1)`, capped at `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.base_delay.as_secs_f64() * self.multiplier.max(1.0).powi(exponent);
        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            self.max_delay
        } else {
            Duration::from_secs_f64(secs)
        }
    }
}

// ---------------------------------------------------------------------------
// Backoff
// ---------------------------------------------------------------------------

/// Attempt counter over a [`BackoffPolicy`].
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: BackoffPolicy,
    attempts: u32,
}

impl Backoff {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            attempts: 0,
        }
    }

    /// Consumes one attempt and returns how long to wait before it, or
    /// `None` once the budget is spent.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.is_exhausted() {
            return None;
        }
        self.attempts += 1;

        let mut delay = self.policy.delay_for(self.attempts);
        if self.policy.jitter > 0.0 {
            let fraction = rand::rng().random_range(0.0..=self.policy.jitter);
            delay += delay.mul_f64(fraction);
        }
        trace!(attempt = self.attempts, delay_ms = delay.as_millis() as u64, "backoff step");
        Some(delay)
    }

    /// Back to a full budget, after a successful connection.
    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    /// Attempts consumed since the last reset.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempts >= self.policy.max_attempts
    }

    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }
}

// ---------------------------------------------------------------------------
// Cancellable delay
// ---------------------------------------------------------------------------

/// Sleeps for `duration` unless `cancel` fires first.
///
/// Returns `true` if the full delay elapsed, `false` if cancelled.
pub async fn delay(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = time::sleep(duration) => true,
        _ = cancel.cancelled() => false,
    }
}

// ---------------------------------------------------------------------------
// Retry timer
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct Scheduled {
    deadline: TokioInstant,
    attempt: u32,
    token: CancellationToken,
}

/// At most one pending retry.
///
/// Scheduling replaces (and cancels) whatever was pending. Cancelling the
/// parent token passed to [`RetryTimer::new`] cancels every retry this
/// timer will ever schedule.
#[derive(Debug)]
pub struct RetryTimer {
    parent: CancellationToken,
    scheduled: Option<Scheduled>,
}

impl RetryTimer {
    pub fn new(parent: CancellationToken) -> Self {
        Self {
            parent,
            scheduled: None,
        }
    }

    /// Schedules retry number `attempt` to fire after `delay`.
    pub fn schedule(&mut self, delay: Duration, attempt: u32) {
        self.cancel();
        debug!(attempt, delay_ms = delay.as_millis() as u64, "retry scheduled");
        self.scheduled = Some(Scheduled {
            deadline: TokioInstant::now() + delay,
            attempt,
            token: self.parent.child_token(),
        });
    }

    /// Cancels the pending retry, if any. Idempotent.
    pub fn cancel(&mut self) {
        if let Some(scheduled) = self.scheduled.take() {
            scheduled.token.cancel();
            trace!(attempt = scheduled.attempt, "retry cancelled");
        }
    }

    pub fn is_pending(&self) -> bool {
        self.scheduled.is_some()
    }

    /// Resolves with the attempt number when the pending retry is due.
    ///
    /// Pends forever while nothing is scheduled or after cancellation.
    /// Cancel-safe: dropping this future leaves the retry scheduled.
    pub async fn fired(&mut self) -> u32 {
        let Some((deadline, attempt, token)) = self
            .scheduled
            .as_ref()
            .map(|s| (s.deadline, s.attempt, s.token.clone()))
        else {
            return std::future::pending().await;
        };

        let due = tokio::select! {
            _ = time::sleep_until(deadline) => true,
            _ = token.cancelled() => false,
        };
        self.scheduled = None;
        if !due {
            return std::future::pending().await;
        }
        attempt
    }
}
