//! Selection and scheduling of registered cases against the runner list.

use crate::registry::{TestCase, TestRegistry};
use crate::runner_list::RunnerList;
use tracing::{debug, info, warn};

/// A case selected for execution.
#[derive(Debug, Clone)]
pub struct ScheduledCase {
    pub case: TestCase,
    pub priority: i64,
    pub invocation_count: u32,
    pub description: String,
}

/// Ordered execution plan.
#[derive(Debug, Clone, Default)]
pub struct Schedule {
    cases: Vec<ScheduledCase>,
}

impl Schedule {
    /// Intersects the registry with the runner list.
    ///
    /// A case is selected when an entry with the same name (ignoring case)
    /// has `execute == yes`. Selected cases are sorted by ascending priority;
    /// ties keep registry order.
    pub fn select(registry: &TestRegistry, runner: &RunnerList) -> Self {
        if runner.is_empty() {
            warn!(
                run_manager = %runner.run_manager,
                "Runner list is empty; no cases will execute"
            );
            return Self::default();
        }

        let mut cases: Vec<ScheduledCase> = registry
            .cases()
            .iter()
            .filter_map(|case| {
                let entry = runner.entry_for(case.name())?;
                if !entry.is_executable() {
                    debug!(case = %case.name(), "Excluded by execute flag");
                    return None;
                }
                Some(ScheduledCase {
                    case: case.clone(),
                    priority: entry.priority,
                    invocation_count: entry.invocation_count(),
                    description: entry.description.clone(),
                })
            })
            .collect();

        cases.sort_by_key(|c| c.priority);

        info!(
            run_manager = %runner.run_manager,
            registered = registry.len(),
            selected = cases.len(),
            "Scheduled cases"
        );
        Self { cases }
    }

    pub fn cases(&self) -> &[ScheduledCase] {
        &self.cases
    }

    pub fn into_cases(self) -> Vec<ScheduledCase> {
        self.cases
    }

    pub fn is_empty(&self) -> bool {
        self.cases.is_empty()
    }

    pub fn len(&self) -> usize {
        self.cases.len()
    }

    /// Case names in execution order with invocation counts expanded.
    pub fn expanded_names(&self) -> Vec<&str> {
        self.cases
            .iter()
            .flat_map(|c| std::iter::repeat_n(c.case.name(), c.invocation_count as usize))
            .collect()
    }

    /// Whether `name` is part of the schedule.
    pub fn contains(&self, name: &str) -> bool {
        self.cases
            .iter()
            .any(|c| c.case.name().eq_ignore_ascii_case(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::tests::Noop;
    use crate::runner_list::RunnerEntry;

    fn registry(names: &[&str]) -> TestRegistry {
        let mut registry = TestRegistry::new();
        for name in names {
            registry.register(TestCase::new(*name, Noop));
        }
        registry
    }

    #[test]
    fn test_selection_orders_by_priority_and_expands_counts() {
        let registry = registry(&["TC_A", "TC_B", "TC_C"]);
        let runner = RunnerList::new(
            "Smoke",
            vec![
                RunnerEntry::new("TC_A", true, 2, 1),
                RunnerEntry::new("TC_C", true, 1, 2),
                RunnerEntry::new("TC_B", false, 0, 1),
            ],
        );

        let schedule = Schedule::select(&registry, &runner);
        assert_eq!(schedule.expanded_names(), ["TC_C", "TC_C", "TC_A"]);
        assert!(!schedule.contains("TC_B"));
    }

    #[test]
    fn test_equal_priority_keeps_registry_order() {
        let registry = registry(&["TC_3", "TC_1", "TC_2"]);
        let runner = RunnerList::new(
            "Smoke",
            vec![
                RunnerEntry::new("TC_1", true, 5, 1),
                RunnerEntry::new("TC_2", true, 5, 1),
                RunnerEntry::new("TC_3", true, 5, 1),
            ],
        );
        let schedule = Schedule::select(&registry, &runner);
        assert_eq!(schedule.expanded_names(), ["TC_3", "TC_1", "TC_2"]);
    }

    #[test]
    fn test_only_matching_yes_entries_are_scheduled() {
        let registry = registry(&["TC_A", "TC_B", "TC_Unlisted"]);
        let runner = RunnerList::new(
            "Smoke",
            vec![
                RunnerEntry::new("tc_a", true, 1, 1),
                RunnerEntry::new("TC_B", false, 1, 1),
                RunnerEntry::new("TC_NotRegistered", true, 1, 1),
            ],
        );
        let schedule = Schedule::select(&registry, &runner);
        for scheduled in schedule.cases() {
            let entry = runner.entry_for(scheduled.case.name()).unwrap();
            assert!(entry.is_executable());
        }
        assert_eq!(schedule.expanded_names(), ["TC_A"]);
    }

    #[test]
    fn test_empty_runner_list_schedules_nothing() {
        let schedule = Schedule::select(&registry(&["TC_A"]), &RunnerList::new("Smoke", vec![]));
        assert!(schedule.is_empty());
    }

    #[test]
    fn test_zero_count_runs_once() {
        let runner = RunnerList::new("Smoke", vec![RunnerEntry::new("TC_A", true, 1, 0)]);
        let schedule = Schedule::select(&registry(&["TC_A"]), &runner);
        assert_eq!(schedule.cases()[0].invocation_count, 1);
    }
}
