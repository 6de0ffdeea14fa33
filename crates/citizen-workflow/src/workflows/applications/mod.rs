//! Citizen applications routed through per-service officer chains.

pub mod builder;
pub mod catalog;
pub mod corrigendum;
pub mod domain;
pub mod error;
pub mod expiry;
pub mod form;
pub mod history;
pub mod repository;
pub mod service;
pub mod transition;
pub mod withheld;

#[cfg(test)]
mod tests;

pub use builder::{BuildError, WorkflowBuilder};
pub use catalog::{CatalogError, JsonServiceCatalog, OfficerTemplate, ServiceCatalog, ServiceDefinition};
pub use corrigendum::{Corrigendum, CorrigendumField, CorrigendumId, CorrigendumRequest};
pub use domain::{
    Application, ApplicationStatus, Checkpoint, Officer, Player, PlayerStatus, ReferenceNumber,
    ServiceId, Workflow, WorkflowShapeError,
};
pub use error::WorkflowError;
pub use expiry::{is_expiring_soon, ExpiringEligibility, RENEWAL_WINDOW_DAYS};
pub use form::{
    FieldEdits, FieldIndex, FieldPath, FileHandle, FileUpdate, FormDetails, FormError, FormField,
    NewUpload,
};
pub use history::{ActionEntry, ActionKind, CITIZEN_ACTOR};
pub use repository::{
    ApplicationRepository, CorrigendumRepository, EligibilityRegistry, EventError, EventKind,
    EventPublisher, FileStorage, HoldRepository, RepositoryError, StorageError, WorkflowEvent,
    WorkflowRepository,
};
pub use service::{Inbox, StatusView, Submission, TransitionRequest, WorkflowService};
pub use transition::{OfficerAction, Transition, TransitionError};
pub use withheld::{HeldPlayer, HeldWorkflow, HoldingOfficer, WithheldApplication, WithheldType};
