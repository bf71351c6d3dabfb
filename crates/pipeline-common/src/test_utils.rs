//! Helpers shared by the pool tests.

/// Route pool logs to the test harness output. Safe to call from every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("pipeline_common=debug")
        .with_test_writer()
        .try_init();
}
