//! Scenario tests exercising the passes end to end on hand-built graphs
//! and a table-driven stub decoder.

mod cfg_tests;
mod dataflow_tests;
mod driver_tests;
mod propagate_tests;
mod structure_tests;

/// Route pass traces through the test harness; safe to call repeatedly.
pub fn trace_init() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}
