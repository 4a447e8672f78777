//! ERX service cases: drug search, drug detail and prescriber service levels.
//!
//! Each case reads its identifiers from the bound test-data row. Column
//! names are lowercase, e.g. `prescriber_id`, `location`, `drug_med_id`.

use async_trait::async_trait;
use opra_core::generators::random_numeric;
use opra_core::{CaseBody, CaseContext, Category, HttpMethod, Result, Service, TestCase};

/// Digits in a generated identifier no service should recognize.
const UNKNOWN_ID_LEN: usize = 12;

const MODULE: &str = "erx";
const AUTHOR: &str = "OPRA QA";

/// Every ERX case, in registration order.
pub fn cases() -> Vec<TestCase> {
    vec![
        TestCase::new("TC001_GET_Erx_GetDrugDetails", DrugDetailsByNdc)
            .category(Category::Smoke)
            .description("Drug detail lookup by NDC returns the brand type"),
        TestCase::new("TC002_GET_Erx_GetProviderServiceLevels", ServiceLevels)
            .category(Category::Smoke)
            .description("Service levels of a prescriber at a location"),
        TestCase::new(
            "TC003_GET_Erx_Negative_GetProviderServiceLevelsWithoutLocation",
            ServiceLevelsNotFound {
                prescriber: Some(Lookup::Column("prescriber_id")),
                location: None,
            },
        ),
        TestCase::new(
            "TC004_GET_Erx_Negative_GetProviderServiceLevelsWithInvalidLocation",
            ServiceLevelsNotFound {
                prescriber: Some(Lookup::Column("prescriber_id")),
                location: Some(Lookup::Unknown),
            },
        ),
        TestCase::new(
            "TC005_GET_Erx_Negative_GetProviderServiceLevelsWithInvalidPrescriber",
            ServiceLevelsNotFound {
                prescriber: Some(Lookup::Unknown),
                location: Some(Lookup::Column("location")),
            },
        ),
        TestCase::new(
            "TC006_GET_Erx_Negative_GetProviderServiceLevelsWithoutPrescriber",
            ServiceLevelsNotFound {
                prescriber: None,
                location: Some(Lookup::Column("location")),
            },
        ),
        TestCase::new("TC007_GET_Erx_GetDrugList", DrugSearch { max_results: None })
            .category(Category::Smoke)
            .description("Drug search returns brand names matching the partial name"),
        TestCase::new(
            "TC008_GET_Erx_GetDrugListHavingSingleElement",
            DrugSearch {
                max_results: Some("1"),
            },
        ),
        TestCase::new("TC009_GET_Erx_Negative_GetDrugListWithInvalidDrugName", UnknownDrug),
        TestCase::new("TC010_GET_Erx_GetDrugDetail", DrugDetail { known: true })
            .category(Category::Smoke),
        TestCase::new(
            "TC011_GET_Erx_Negative_GetDrugDetailWithInvalidMedId",
            DrugDetail { known: false },
        ),
        TestCase::new("TC012_GET_Erx_Negative_InvalidToken", InvalidToken)
            .category(Category::Security),
        TestCase::new("TC013_GET_Erx_Negative_InvalidHeader", InvalidHeader)
            .category(Category::Security),
    ]
    .into_iter()
    .map(|case| {
        case.module(MODULE)
            .author(AUTHOR)
            .category(Category::Regression)
            .category(Category::Api)
    })
    .collect()
}

/// Where a path segment comes from.
#[derive(Clone, Copy)]
enum Lookup {
    Column(&'static str),
    Unknown,
}

impl Lookup {
    fn resolve(self, ctx: &CaseContext<'_>) -> Result<String> {
        match self {
            Lookup::Column(column) => ctx.value(column),
            Lookup::Unknown => Ok(random_numeric(UNKNOWN_ID_LEN)),
        }
    }
}

struct DrugDetailsByNdc;

#[async_trait]
impl CaseBody for DrugDetailsByNdc {
    async fn run(&self, ctx: &mut CaseContext<'_>) -> Result<()> {
        let ndc = ctx.value("ndcid")?;
        let brand_type = ctx.value("drug_brand_type")?;
        let path = format!(
            "/erx/drug/get_drug_detail?medicationType=national&medId={}",
            ndc
        );
        let response = ctx.get(Service::Erx, &path).await?;
        ctx.verify()
            .xml_tag_attribute_contains(&response, "BrandType", "NDCID", &brand_type);
        Ok(())
    }
}

struct ServiceLevels;

#[async_trait]
impl CaseBody for ServiceLevels {
    async fn run(&self, ctx: &mut CaseContext<'_>) -> Result<()> {
        let prescriber = ctx.value("prescriber_id")?;
        let location = ctx.value("location")?;
        let list_tag = ctx.value_or("service_levels", "ServiceLevels");
        let path = format!(
            "/erx/servicelevel/prescriber/{}/location/{}",
            prescriber, location
        );
        let response = ctx.get(Service::Erx, &path).await?;
        ctx.verify().xml_list_empty(&response, &list_tag);
        Ok(())
    }
}

struct ServiceLevelsNotFound {
    prescriber: Option<Lookup>,
    location: Option<Lookup>,
}

#[async_trait]
impl CaseBody for ServiceLevelsNotFound {
    async fn run(&self, ctx: &mut CaseContext<'_>) -> Result<()> {
        let mut path = String::from("/erx/servicelevel/prescriber/");
        if let Some(prescriber) = self.prescriber {
            path.push_str(&prescriber.resolve(ctx)?);
            path.push('/');
        }
        path.push_str("location/");
        if let Some(location) = self.location {
            path.push_str(&location.resolve(ctx)?);
        }
        let response = ctx.get(Service::Erx, &path).await?;
        ctx.verify().status_equals(&response, 404);
        Ok(())
    }
}

struct DrugSearch {
    max_results: Option<&'static str>,
}

#[async_trait]
impl CaseBody for DrugSearch {
    async fn run(&self, ctx: &mut CaseContext<'_>) -> Result<()> {
        let name = ctx.value("drug_partial_name")?;
        let max_results = match self.max_results {
            Some(max) => max.to_string(),
            None => ctx.value("drug_max_results")?,
        };
        let search_type = ctx.value("drug_search_type")?;
        let path = format!(
            "/erx/drug/search_drug_detail?searchString={}&maxResults={}&searchType={}",
            name, max_results, search_type
        );
        let response = ctx.get(Service::Erx, &path).await?;
        let mut verify = ctx.verify();
        if self.max_results.is_some() {
            verify.status_equals(&response, 200);
        } else {
            verify.xml_tag_attribute_contains(&response, "Drug", "BrandName", &name);
        }
        Ok(())
    }
}

struct UnknownDrug;

#[async_trait]
impl CaseBody for UnknownDrug {
    async fn run(&self, ctx: &mut CaseContext<'_>) -> Result<()> {
        let max_results = ctx.value_or("drug_max_results", "10");
        let search_type = ctx.value_or("drug_search_type", "name");
        let path = format!(
            "/erx/drug/search_drug_detail?searchString={}&maxResults={}&searchType={}",
            random_numeric(UNKNOWN_ID_LEN),
            max_results,
            search_type
        );
        let response = ctx.get(Service::Erx, &path).await?;
        ctx.verify().status_equals(&response, 404);
        Ok(())
    }
}

struct DrugDetail {
    known: bool,
}

#[async_trait]
impl CaseBody for DrugDetail {
    async fn run(&self, ctx: &mut CaseContext<'_>) -> Result<()> {
        let medication_type = ctx.value("drug_medication_type")?;
        let med_id = if self.known {
            ctx.value("drug_med_id")?
        } else {
            random_numeric(UNKNOWN_ID_LEN)
        };
        let path = format!(
            "/erx/drug/get_drug_detail?medicationType={}&medId={}",
            medication_type, med_id
        );
        let response = ctx.get(Service::Erx, &path).await?;
        let mut verify = ctx.verify();
        if self.known {
            verify.xml_tag_attribute_contains(&response, "DrugDetail", "NDCID", &med_id);
        } else {
            verify.status_equals(&response, 404);
        }
        Ok(())
    }
}

struct InvalidToken;

#[async_trait]
impl CaseBody for InvalidToken {
    async fn run(&self, ctx: &mut CaseContext<'_>) -> Result<()> {
        let path = ctx.value_or("endpoint", "/erx/drug/search_drug_detail");
        if ctx.invalid_token(Service::Erx, HttpMethod::Get, &path).await? {
            ctx.reporter.pass("Bogus credentials rejected with 401");
        } else {
            ctx.reporter
                .fail("Bogus credentials were not rejected with 401", None);
        }
        Ok(())
    }
}

struct InvalidHeader;

#[async_trait]
impl CaseBody for InvalidHeader {
    async fn run(&self, ctx: &mut CaseContext<'_>) -> Result<()> {
        let path = ctx.value_or("endpoint", "/erx/drug/search_drug_detail");
        let response = ctx
            .invalid_header(Service::Erx, HttpMethod::Get, &path, None)
            .await?;
        let rejected = (400..500).contains(&response.status);
        if rejected {
            ctx.reporter.pass(format!(
                "Unexpected header rejected with status {}",
                response.status
            ));
        } else {
            ctx.reporter.fail(
                format!(
                    "Unexpected header accepted with status {}",
                    response.status
                ),
                Some(response.body_text()),
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_case_names_are_unique_and_qualified() {
        let cases = cases();
        let mut names: Vec<&str> = cases.iter().map(TestCase::name).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), cases.len());
        assert!(
            cases
                .iter()
                .all(|c| c.descriptor.qualified_name.starts_with("erx::"))
        );
        assert!(
            cases
                .iter()
                .all(|c| c.descriptor.categories.contains(&Category::Regression))
        );
    }
}
