use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::domain::ServiceId;
use crate::workflows::location::AccessLevel;

/// One configured officer slot of a service's chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfficerTemplate {
    pub designation: String,
    pub access_level: AccessLevel,
    #[serde(default)]
    pub can_pull: bool,
    #[serde(default)]
    pub player_id: Option<usize>,
    #[serde(default)]
    pub prev_player_id: Option<usize>,
    #[serde(default)]
    pub next_player_id: Option<usize>,
    /// Template-only settings (form permissions, letter flags) that never reach a workflow.
    #[serde(flatten)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl OfficerTemplate {
    pub fn new(designation: impl Into<String>, access_level: AccessLevel) -> Self {
        Self {
            designation: designation.into(),
            access_level,
            can_pull: false,
            player_id: None,
            prev_player_id: None,
            next_player_id: None,
            metadata: BTreeMap::new(),
        }
    }

    pub fn pullable(mut self) -> Self {
        self.can_pull = true;
        self
    }
}

/// Administrator-configured definition of a welfare service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceDefinition {
    pub service_id: ServiceId,
    pub name: String,
    pub short_code: String,
    pub officers: Vec<OfficerTemplate>,
    #[serde(default)]
    pub corrigendum_fields: Vec<String>,
    /// Form field holding the expiry date of a time-bounded credential.
    #[serde(default)]
    pub expiring_credential_field: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("failed to read service catalog: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid service catalog: {0}")]
    Json(#[from] serde_json::Error),
    #[error("service {0} is defined twice")]
    Duplicate(ServiceId),
    #[error("service catalog unavailable: {0}")]
    Unavailable(String),
}

/// Read-only source of service templates.
pub trait ServiceCatalog: Send + Sync {
    fn definition(&self, service_id: ServiceId) -> Result<Option<ServiceDefinition>, CatalogError>;
}

/// Catalog loaded from the administrators' `services.json` export.
#[derive(Debug, Clone, Default)]
pub struct JsonServiceCatalog {
    services: BTreeMap<ServiceId, ServiceDefinition>,
}

impl JsonServiceCatalog {
    pub fn new(definitions: Vec<ServiceDefinition>) -> Result<Self, CatalogError> {
        let mut services = BTreeMap::new();
        for definition in definitions {
            let id = definition.service_id;
            if services.insert(id, definition).is_some() {
                return Err(CatalogError::Duplicate(id));
            }
        }
        Ok(Self { services })
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self, CatalogError> {
        let definitions: Vec<ServiceDefinition> = serde_json::from_reader(reader)?;
        Self::new(definitions)
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, CatalogError> {
        let file = std::fs::File::open(path)?;
        Self::from_reader(std::io::BufReader::new(file))
    }

    pub fn services(&self) -> impl Iterator<Item = &ServiceDefinition> {
        self.services.values()
    }
}

impl ServiceCatalog for JsonServiceCatalog {
    fn definition(&self, service_id: ServiceId) -> Result<Option<ServiceDefinition>, CatalogError> {
        Ok(self.services.get(&service_id).cloned())
    }
}
