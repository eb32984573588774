//! Logging and metrics setup shared by the tap executor binaries and tests.

pub mod metrics;
pub mod tracing;
