//! Process-wide tracing setup for shopledger binaries and tests.

/// Subscriber installation (filters, formats).
pub mod tracing;

pub use crate::tracing::{init, init_for_tests, init_with_default_filter};
