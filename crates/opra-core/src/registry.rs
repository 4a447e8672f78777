//! Test registry.
//!
//! Cases are plain values built at start-up:
//!
//! ```ignore
//! registry.register(
//!     TestCase::new("TC001_GET_Erx_DrugSearch", DrugSearch)
//!         .module("erx")
//!         .author("QA Team")
//!         .category(Category::Smoke),
//! );
//! ```

use crate::case::CaseBody;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::warn;

/// Fixed set of case categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Category {
    Smoke,
    Regression,
    Sanity,
    E2e,
    Functional,
    Performance,
    Security,
    Usability,
    Api,
    Ui,
    Failing,
    Skipped,
    Bdd,
}

impl Category {
    pub fn all() -> Vec<Category> {
        vec![
            Category::Smoke,
            Category::Regression,
            Category::Sanity,
            Category::E2e,
            Category::Functional,
            Category::Performance,
            Category::Security,
            Category::Usability,
            Category::Api,
            Category::Ui,
            Category::Failing,
            Category::Skipped,
            Category::Bdd,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Smoke => "SMOKE",
            Category::Regression => "REGRESSION",
            Category::Sanity => "SANITY",
            Category::E2e => "E2E",
            Category::Functional => "FUNCTIONAL",
            Category::Performance => "PERFORMANCE",
            Category::Security => "SECURITY",
            Category::Usability => "USABILITY",
            Category::Api => "API",
            Category::Ui => "UI",
            Category::Failing => "FAILING",
            Category::Skipped => "SKIPPED",
            Category::Bdd => "BDD",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable metadata of a registered case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TestCaseDescriptor {
    /// `module::method`, or the method name when no module is set.
    pub qualified_name: String,
    /// Name matched against runner-list entries and data rows.
    pub method_name: String,
    pub authors: Vec<String>,
    pub categories: Vec<Category>,
    pub description: String,
}

impl TestCaseDescriptor {
    pub fn new(method_name: impl Into<String>) -> Self {
        let method_name = method_name.into();
        Self {
            qualified_name: method_name.clone(),
            method_name,
            authors: Vec::new(),
            categories: Vec::new(),
            description: String::new(),
        }
    }
}

/// A registered case: its descriptor and the body that runs it.
#[derive(Clone)]
pub struct TestCase {
    pub descriptor: Arc<TestCaseDescriptor>,
    body: Arc<dyn CaseBody>,
}

impl TestCase {
    pub fn new(method_name: impl Into<String>, body: impl CaseBody + 'static) -> Self {
        Self {
            descriptor: Arc::new(TestCaseDescriptor::new(method_name)),
            body: Arc::new(body),
        }
    }

    /// Qualifies the case name with a module path.
    pub fn module(mut self, module: &str) -> Self {
        let d = Arc::make_mut(&mut self.descriptor);
        d.qualified_name = format!("{}::{}", module, d.method_name);
        self
    }

    pub fn author(mut self, author: impl Into<String>) -> Self {
        Arc::make_mut(&mut self.descriptor).authors.push(author.into());
        self
    }

    /// Adds a category; duplicates are ignored.
    pub fn category(mut self, category: Category) -> Self {
        let d = Arc::make_mut(&mut self.descriptor);
        if !d.categories.contains(&category) {
            d.categories.push(category);
        }
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        Arc::make_mut(&mut self.descriptor).description = description.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.descriptor.method_name
    }

    pub fn body(&self) -> Arc<dyn CaseBody> {
        Arc::clone(&self.body)
    }
}

impl fmt::Debug for TestCase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestCase")
            .field("descriptor", &self.descriptor)
            .finish_non_exhaustive()
    }
}

/// All cases known to the process, in registration order.
#[derive(Debug, Clone, Default)]
pub struct TestRegistry {
    cases: Vec<TestCase>,
}

impl TestRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a case. A second case with the same method name is ignored.
    pub fn register(&mut self, case: TestCase) -> &mut Self {
        if self.find(case.name()).is_some() {
            warn!(case = %case.name(), "Duplicate case registration ignored");
        } else {
            self.cases.push(case);
        }
        self
    }

    pub fn register_all(&mut self, cases: impl IntoIterator<Item = TestCase>) -> &mut Self {
        for case in cases {
            self.register(case);
        }
        self
    }

    pub fn cases(&self) -> &[TestCase] {
        &self.cases
    }

    /// Case by method name, case-insensitively.
    pub fn find(&self, method_name: &str) -> Option<&TestCase> {
        self.cases
            .iter()
            .find(|c| c.name().eq_ignore_ascii_case(method_name))
    }

    pub fn len(&self) -> usize {
        self.cases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cases.is_empty()
    }
}
