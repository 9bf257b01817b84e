// src/queue/circuit_breaker.rs

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Observable state of a [`CircuitBreaker`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    /// Rejecting everything until the cool-down elapses.
    Open,
    /// Cool-down elapsed; the next job is let through as a trial.
    HalfOpen,
}

/// Consecutive-failure guard for the generation queue.
///
/// `threshold` consecutive failures open the breaker. After `cooldown` it
/// half-opens: one trial job is admitted; success closes the breaker, failure
/// reopens it for another cool-down. A threshold of 0 disables the breaker.
///
/// Every admitted job gets a ticket. While the breaker is open only the
/// trial's ticket can close or reopen it, so jobs admitted before it opened
/// cannot settle the trial when they finish late.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    threshold: u32,
    cooldown: Duration,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    next_ticket: u64,
    trial: Option<u64>,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, cooldown: Duration) -> Self {
        Self {
            threshold,
            cooldown,
            consecutive_failures: 0,
            opened_at: None,
            next_ticket: 0,
            trial: None,
        }
    }

    pub fn state(&self, now: Instant) -> BreakerState {
        match self.opened_at {
            None => BreakerState::Closed,
            Some(at) if now.saturating_duration_since(at) >= self.cooldown => {
                BreakerState::HalfOpen
            }
            Some(_) => BreakerState::Open,
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// The ticket of the half-open trial job, if one is in flight.
    pub fn trial(&self) -> Option<u64> {
        self.trial
    }

    /// Admit a new job, returning its ticket, or `None` to reject it. In the
    /// half-open state only a single trial job is let through at a time.
    pub fn admit(&mut self, now: Instant) -> Option<u64> {
        let admitted = match self.state(now) {
            BreakerState::Closed => true,
            BreakerState::Open => false,
            BreakerState::HalfOpen => self.trial.is_none(),
        };
        if !admitted {
            return None;
        }

        let ticket = self.next_ticket;
        self.next_ticket = self.next_ticket.wrapping_add(1);
        if self.opened_at.is_some() {
            debug!(ticket, "circuit breaker half-open; admitting trial job");
            self.trial = Some(ticket);
        }
        Some(ticket)
    }

    pub fn record_success(&mut self, ticket: u64) {
        if self.opened_at.is_some() {
            if self.trial != Some(ticket) {
                debug!(ticket, "late success from a pre-open job; breaker unchanged");
                return;
            }
            info!("circuit breaker closed after successful trial job");
        }
        self.consecutive_failures = 0;
        self.opened_at = None;
        self.trial = None;
    }

    pub fn record_failure(&mut self, ticket: u64, now: Instant) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);

        if self.threshold == 0 {
            return;
        }
        if self.opened_at.is_some() {
            if self.trial == Some(ticket) {
                warn!(
                    consecutive_failures = self.consecutive_failures,
                    "trial job failed; circuit breaker re-opened"
                );
                self.trial = None;
                self.opened_at = Some(now);
            }
        } else if self.consecutive_failures >= self.threshold {
            warn!(
                consecutive_failures = self.consecutive_failures,
                threshold = self.threshold,
                cooldown_secs = self.cooldown.as_secs_f64(),
                "circuit breaker opened"
            );
            self.opened_at = Some(now);
        }
    }

    /// The job holding `ticket` went away without an outcome. A half-open
    /// trial frees its place for the next job.
    pub fn abandon(&mut self, ticket: u64) {
        if self.trial == Some(ticket) {
            debug!(ticket, "trial job abandoned; next job becomes the trial");
            self.trial = None;
        }
    }

    pub fn reset(&mut self) {
        self.consecutive_failures = 0;
        self.opened_at = None;
        self.trial = None;
    }
}
