//! Bounded reconnection after an unexpected BLE disconnect.
//!
//! The supervisor only keeps count; the driver owns the timer and performs
//! the reconnect itself. Each disconnect starts a fresh round of at most
//! `max_attempts` tries, each preceded by `delay`.

use std::time::Duration;

/// Default number of reconnection attempts per disconnect.
pub const DEFAULT_RECONNECT_ATTEMPTS: u32 = 3;

/// Default wait before each reconnection attempt.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(2);

/// Reconnection bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Attempts per disconnect. Zero disables reconnection.
    pub max_attempts: u32,
    /// Fixed delay before each attempt.
    pub delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_RECONNECT_ATTEMPTS,
            delay: DEFAULT_RECONNECT_DELAY,
        }
    }
}

/// Supervisor state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    /// Link is healthy or was closed on purpose.
    Idle,
    /// A disconnect round is in progress.
    Retrying,
    /// All attempts of the last round failed.
    Exhausted,
}

/// Attempt counter and backoff for one disconnect round.
#[derive(Debug, Clone)]
pub struct ReconnectSupervisor {
    policy: ReconnectPolicy,
    attempts: u32,
    failures: u32,
    state: SupervisorState,
}

impl ReconnectSupervisor {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            attempts: 0,
            failures: 0,
            state: SupervisorState::Idle,
        }
    }

    /// Start a new round after a disconnect.
    pub fn begin(&mut self) {
        self.attempts = 0;
        self.state = SupervisorState::Retrying;
    }

    /// Claim the next attempt.
    ///
    /// Returns the 1-based attempt number and the delay to wait first, or
    /// `None` once the round is used up.
    pub fn next_attempt(&mut self) -> Option<(u32, Duration)> {
        if self.state != SupervisorState::Retrying {
            return None;
        }
        if self.attempts >= self.policy.max_attempts {
            self.state = SupervisorState::Exhausted;
            return None;
        }
        self.attempts += 1;
        Some((self.attempts, self.policy.delay))
    }

    /// Record a failed attempt.
    pub fn record_failure(&mut self) {
        self.failures += 1;
    }

    /// Link is back; end the round.
    pub fn succeeded(&mut self) {
        self.attempts = 0;
        self.state = SupervisorState::Idle;
    }

    /// Stop retrying (explicit disconnect or shutdown).
    pub fn cancel(&mut self) {
        self.state = SupervisorState::Idle;
    }

    /// Attempts made in the current round.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Failed attempts over the supervisor's lifetime.
    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn state(&self) -> SupervisorState {
        self.state
    }

    pub fn policy(&self) -> ReconnectPolicy {
        self.policy
    }
}
