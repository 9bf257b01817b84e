//! Shared fixtures for gendag's integration tests: pipeline builders, a
//! scripted executor and a scripted generation backend.

pub mod builders;
pub mod fake_backend;
pub mod fake_executor;

use std::future::Future;
use std::sync::Once;
use std::time::Duration;

use tracing_subscriber::{fmt, EnvFilter};

static TRACING: Once = Once::new();

/// Upper bound for anything a test awaits on the scheduler or the queue.
const TEST_DEADLINE: Duration = Duration::from_secs(5);

/// Route gendag's tracing output into the test harness capture.
///
/// Safe to call from every test; only the first call installs the
/// subscriber. Filter with `RUST_LOG`, e.g. `RUST_LOG=gendag=debug`.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("gendag=info"));

        fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(false)
            .init();
    });
}

/// Await `f`, failing the test if a pipeline or job hangs past
/// [`TEST_DEADLINE`].
pub async fn with_timeout<F, T>(f: F) -> T
where
    F: Future<Output = T>,
{
    match tokio::time::timeout(TEST_DEADLINE, f).await {
        Ok(value) => value,
        Err(_) => panic!("no progress within {TEST_DEADLINE:?}"),
    }
}
