//! Shared fixtures for the datasweep end-to-end suites.

pub mod fixtures;
pub mod generators;

/// Initialize test logging
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}
