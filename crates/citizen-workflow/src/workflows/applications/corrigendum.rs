use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::domain::{ApplicationStatus, Checkpoint, ReferenceNumber, ServiceId, Workflow};
use super::form::{FieldEdits, FileHandle};
use super::history::ActionEntry;
use crate::workflows::location::LocationSnapshot;
use crate::workflows::reference::ReferenceKind;

/// Numeric-coded identifier of a corrigendum (amendment numbering series).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrigendumId(pub String);

impl fmt::Display for CorrigendumId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Before/after pair for one corrected field.
///
/// `new_file` is the handle the field carries once the correction applies: the parent's
/// handle when the file is kept, `None` when it is removed, a fresh upload otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrigendumField {
    pub old_value: String,
    pub new_value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_file: Option<FileHandle>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_file: Option<FileHandle>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub additional_values: BTreeMap<String, String>,
}

impl CorrigendumField {
    /// Whether `new_file` was uploaded for this correction rather than inherited.
    pub fn owns_new_file(&self) -> bool {
        self.new_file.is_some() && self.new_file != self.old_file
    }
}

/// Field-scoped correction routed through its own officer chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Corrigendum {
    pub corrigendum_id: CorrigendumId,
    pub display_reference: String,
    pub reference_number: ReferenceNumber,
    pub service_id: ServiceId,
    pub location: LocationSnapshot,
    pub corrigendum_fields: BTreeMap<String, CorrigendumField>,
    #[serde(default)]
    pub remarks: String,
    pub workflow: Workflow,
    pub status: ApplicationStatus,
    #[serde(rename = "type")]
    pub kind: ReferenceKind,
    #[serde(default)]
    pub history: Vec<ActionEntry>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub revision: u64,
}

impl Corrigendum {
    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            current_player: self.workflow.current_player(),
            status: self.status,
            revision: self.revision,
        }
    }

    /// Still moving through its chain or waiting on the citizen.
    pub fn is_open(&self) -> bool {
        !self.status.is_terminal()
    }
}

/// Correction submitted against a sanctioned application.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CorrigendumRequest {
    #[serde(flatten)]
    pub edits: FieldEdits,
    #[serde(default)]
    pub remarks: String,
}

impl CorrigendumRequest {
    pub fn new(edits: FieldEdits, remarks: impl Into<String>) -> Self {
        Self {
            edits,
            remarks: remarks.into(),
        }
    }
}
