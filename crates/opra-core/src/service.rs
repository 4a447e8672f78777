//! Upstream services the harness can dispatch to.

use crate::error::HarnessError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One of the upstream REST services under test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Service {
    Actor,
    Chart,
    Chc,
    Coding,
    Document,
    Erx,
    Lab,
    Job,
}

impl Service {
    /// Returns all services.
    pub fn all() -> Vec<Service> {
        vec![
            Service::Actor,
            Service::Chart,
            Service::Chc,
            Service::Coding,
            Service::Document,
            Service::Erx,
            Service::Lab,
            Service::Job,
        ]
    }

    /// Returns the lowercase segment used in `open_<svc>_*` configuration keys.
    pub fn config_segment(&self) -> &'static str {
        match self {
            Service::Actor => "actor",
            Service::Chart => "chart",
            Service::Chc => "chc",
            Service::Coding => "coding",
            Service::Document => "document",
            Service::Erx => "erx",
            Service::Lab => "lab",
            Service::Job => "job",
        }
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.config_segment().to_uppercase())
    }
}

impl FromStr for Service {
    type Err = HarnessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        Service::all()
            .into_iter()
            .find(|svc| svc.config_segment() == wanted)
            .ok_or_else(|| HarnessError::MissingConfig(format!("unknown service: {}", s)))
    }
}
