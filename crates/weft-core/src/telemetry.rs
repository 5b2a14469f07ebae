//! Tracing subscriber setup for embedders and tests.

use tracing_subscriber::EnvFilter;

use crate::error::{WeftError, WeftResult};

/// Install a global fmt subscriber using `filter` (`RUST_LOG` syntax,
/// e.g. `"weft_dag=debug,info"`). Fails if a subscriber is already set.
pub fn init_tracing(filter: &str) -> WeftResult<()> {
    let filter = EnvFilter::try_new(filter).map_err(|e| WeftError::Config(e.to_string()))?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .map_err(|e| WeftError::Config(e.to_string()))
}

/// Route logs through the test harness's captured output. Honors
/// `RUST_LOG`; safe to call from every test.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
