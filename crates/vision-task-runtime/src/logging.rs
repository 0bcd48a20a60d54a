//! Logging setup for applications and tests.
//!
//! The runtime only emits records through the `log` macros. Binaries that want to see them can
//! install `env_logger` through [`init_logger`], filtered by `RUST_LOG` (default `info`).

pub use log::{debug, error, info, trace, warn};

/// Installs `env_logger` as the global logger. Does nothing if a logger is already installed.
pub fn init_logger() {
    let env = env_logger::Env::default().default_filter_or("info");
    if env_logger::Builder::from_env(env).try_init().is_err() {
        log::debug!("A global logger is already installed");
    }
}

/// Same as [`init_logger`] but writes through the test harness capture.
pub fn init_test_logger() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("debug"))
        .is_test(true)
        .try_init();
}
