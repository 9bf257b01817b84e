// src/queue/mod.rs

//! Bounded-concurrency queue for resource-bound generation work.
//!
//! - [`generation`] holds the priority-ordered [`GenerationQueue`].
//! - [`circuit_breaker`] holds the consecutive-failure guard it consults
//!   before admitting a job.

pub mod circuit_breaker;
pub mod generation;

pub use circuit_breaker::{BreakerState, CircuitBreaker};
pub use generation::{GenerationJob, GenerationQueue, QueueError, QueueOptions, QueueStats};
