//! What a case body sees while it runs.

use crate::assertions::Verifier;
use crate::binder::Iteration;
use crate::context::RunContext;
use crate::datasource::{DataRow, DataSource};
use crate::dispatcher::{Dispatcher, HttpMethod, RequestPlan, ResponseRecord};
use crate::error::{HarnessError, Result};
use crate::reporter::ReporterHandle;
use crate::service::Service;
use crate::templater::{self, Replacements};
use async_trait::async_trait;
use std::collections::HashMap;

/// The executable part of a registered case.
#[async_trait]
pub trait CaseBody: Send + Sync {
    /// Runs one attempt of one iteration.
    ///
    /// Returning an error fails the attempt; so does any Fail step recorded
    /// through the context's verifier.
    async fn run(&self, ctx: &mut CaseContext<'_>) -> Result<()>;
}

/// Per-attempt view of the run handed to [`CaseBody::run`].
pub struct CaseContext<'a> {
    pub iteration: &'a Iteration,
    pub run: &'a RunContext,
    pub dispatcher: &'a Dispatcher,
    pub reporter: &'a mut ReporterHandle,
    pub data_source: Option<&'a dyn DataSource>,
}

impl<'a> CaseContext<'a> {
    /// The bound data row (empty when the case has no test data).
    pub fn row(&self) -> &DataRow {
        &self.iteration.row
    }

    /// A column of the bound row as text.
    pub fn value(&self, column: &str) -> Result<String> {
        self.iteration.row.text(column).ok_or_else(|| {
            HarnessError::Query(format!(
                "data row for {} has no column '{}'",
                self.iteration.descriptor.method_name, column
            ))
        })
    }

    /// A column of the bound row, or `default` when absent.
    pub fn value_or(&self, column: &str, default: &str) -> String {
        self.iteration
            .row
            .text(column)
            .unwrap_or_else(|| default.to_string())
    }

    /// Predicates recording on this attempt's node.
    pub fn verify(&mut self) -> Verifier<'_> {
        Verifier::new(self.reporter)
    }

    pub fn info(&mut self, message: impl Into<String>) {
        self.reporter.info(message);
    }

    pub async fn send(&mut self, plan: RequestPlan) -> Result<ResponseRecord> {
        self.dispatcher.send(plan, self.reporter).await
    }

    pub async fn get(&mut self, service: Service, path: &str) -> Result<ResponseRecord> {
        self.dispatcher.get(service, path, self.reporter).await
    }

    pub async fn post(
        &mut self,
        service: Service,
        path: &str,
        body: impl Into<String>,
    ) -> Result<ResponseRecord> {
        self.dispatcher.post(service, path, body, self.reporter).await
    }

    pub async fn put(
        &mut self,
        service: Service,
        path: &str,
        body: impl Into<String>,
    ) -> Result<ResponseRecord> {
        self.dispatcher.put(service, path, body, self.reporter).await
    }

    pub async fn delete(&mut self, service: Service, path: &str) -> Result<ResponseRecord> {
        self.dispatcher.delete(service, path, self.reporter).await
    }

    /// Negative check: bogus credentials must be rejected with 401.
    pub async fn invalid_token(
        &mut self,
        service: Service,
        method: HttpMethod,
        path: &str,
    ) -> Result<bool> {
        self.dispatcher
            .send_with_invalid_token(service, method, path, self.reporter)
            .await
    }

    /// Negative check with an unexpected header and content type.
    pub async fn invalid_header(
        &mut self,
        service: Service,
        method: HttpMethod,
        path: &str,
        body: Option<String>,
    ) -> Result<ResponseRecord> {
        self.dispatcher
            .send_with_invalid_header(service, method, path, body, self.reporter)
            .await
    }

    /// Renders the named template from the payloads directory into a
    /// per-case generated file and returns its text.
    pub fn render_payload(&self, template: &str, replacements: &Replacements) -> Result<String> {
        let paths = &self.run.paths;
        let output = paths.generated(&format!(
            "{}_{}",
            self.iteration.descriptor.method_name, template
        ));
        templater::generate_payload(&paths.template(template), &output, replacements)
    }

    /// First row of an ad-hoc select query from the catalog.
    pub fn lookup(&self, query_name: &str) -> Result<HashMap<String, String>> {
        let source = self.data_source.ok_or_else(|| {
            HarnessError::Query("no data source configured for this run".to_string())
        })?;
        Ok(source
            .rows(query_name)?
            .into_iter()
            .next()
            .map(|row| row.to_string_map())
            .unwrap_or_default())
    }
}

