// tests/circuit_breaker.rs

use std::time::Duration;

use gendag::queue::{BreakerState, CircuitBreaker};
use tokio::time::Instant;

const COOLDOWN: Duration = Duration::from_secs(10);

#[test]
fn late_failure_from_older_job_does_not_settle_the_trial() {
    let start = Instant::now();
    let mut breaker = CircuitBreaker::new(1, COOLDOWN);
    let older = breaker.admit(start).expect("admitted");
    let failing = breaker.admit(start).expect("admitted");
    breaker.record_failure(failing, start);
    assert_eq!(breaker.state(start), BreakerState::Open);

    let later = start + COOLDOWN;
    let trial = breaker.admit(later).expect("trial admitted");
    assert_ne!(trial, older);

    // The job admitted before the breaker opened finishes during half-open.
    breaker.record_failure(older, later);
    assert_eq!(breaker.trial(), Some(trial));
    assert_eq!(breaker.state(later), BreakerState::HalfOpen);
    assert_eq!(breaker.admit(later), None);

    breaker.record_success(trial);
    assert_eq!(breaker.state(later), BreakerState::Closed);
    assert_eq!(breaker.consecutive_failures(), 0);
}

#[test]
fn late_success_from_older_job_does_not_close() {
    let start = Instant::now();
    let mut breaker = CircuitBreaker::new(1, COOLDOWN);
    let older = breaker.admit(start).expect("admitted");
    let failing = breaker.admit(start).expect("admitted");
    breaker.record_failure(failing, start);

    breaker.record_success(older);
    assert_eq!(breaker.state(start), BreakerState::Open);
    assert_eq!(breaker.consecutive_failures(), 1);
}

#[test]
fn failed_trial_reopens_for_another_cooldown() {
    let start = Instant::now();
    let mut breaker = CircuitBreaker::new(1, COOLDOWN);
    let first = breaker.admit(start).expect("admitted");
    breaker.record_failure(first, start);

    let later = start + COOLDOWN;
    let trial = breaker.admit(later).expect("trial admitted");
    breaker.record_failure(trial, later);

    assert_eq!(breaker.state(later), BreakerState::Open);
    assert_eq!(breaker.trial(), None);
    assert_eq!(breaker.state(later + COOLDOWN), BreakerState::HalfOpen);
}

#[test]
fn abandoned_trial_frees_the_trial_slot() {
    let start = Instant::now();
    let mut breaker = CircuitBreaker::new(1, COOLDOWN);
    let first = breaker.admit(start).expect("admitted");
    breaker.record_failure(first, start);

    let later = start + COOLDOWN;
    let trial = breaker.admit(later).expect("trial admitted");
    breaker.abandon(first);
    assert_eq!(breaker.admit(later), None);

    breaker.abandon(trial);
    assert!(breaker.admit(later).is_some());
}

#[test]
fn zero_threshold_never_opens() {
    let now = Instant::now();
    let mut breaker = CircuitBreaker::new(0, COOLDOWN);
    for _ in 0..10 {
        let ticket = breaker.admit(now).expect("admitted");
        breaker.record_failure(ticket, now);
    }
    assert_eq!(breaker.state(now), BreakerState::Closed);
}
