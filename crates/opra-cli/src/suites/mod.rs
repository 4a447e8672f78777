//! Case suites compiled into the runner.

mod erx;

use opra_core::{TestCase, TestRegistry};

/// Every bundled case, in registration order.
pub fn all_cases() -> Vec<TestCase> {
    erx::cases()
}

/// Registry holding [`all_cases`].
pub fn registry() -> TestRegistry {
    let mut registry = TestRegistry::new();
    registry.register_all(all_cases());
    registry
}
