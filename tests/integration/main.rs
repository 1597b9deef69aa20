//! End-to-end checks of registration, checkpointing and the serving loop
//!
//! Run with: cargo test --test integration

mod checkpoint_tests;
mod driver_tests;
mod fixtures;
mod registry_tests;

/// Common test initialization
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter("trainctl=debug")
        .try_init();
}
