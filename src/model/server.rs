//! Serializable views of plugin state, for diagnostics.

use serde::{Deserialize, Serialize};

use super::application::{Application, pid_t};
use crate::model::registry::Registry;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationData {
    pub pid: pid_t,
    pub name: String,
    pub psn: [u32; 2],
    pub is_observed: bool,
}

impl From<&Application> for ApplicationData {
    fn from(app: &Application) -> Self {
        let psn = app.psn();
        ApplicationData {
            pid: app.pid(),
            name: app.name().to_string(),
            psn: [psn.high, psn.low],
            is_observed: app.is_observed(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryData {
    pub application_count: usize,
    pub applications: Vec<ApplicationData>,
}

impl RegistryData {
    pub fn collect(registry: &Registry) -> Self {
        let applications = registry.snapshot();
        RegistryData {
            application_count: applications.len(),
            applications,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_else(|_| serde_json::json!({}))
    }
}
