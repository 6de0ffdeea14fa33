use std::fmt;

use serde::{Deserialize, Serialize};

use super::corrigendum::{Corrigendum, CorrigendumId};
use super::domain::{Application, Checkpoint, ReferenceNumber};
use super::expiry::ExpiringEligibility;
use super::form::FileHandle;
use super::history::ActionEntry;
use super::withheld::WithheldApplication;
use crate::workflows::reference::CounterStore;

/// Application documents plus their append-only action history.
pub trait ApplicationRepository: Send + Sync {
    /// Store a new application, its first history entry and, when the service tracks an
    /// expiring credential, its eligibility record in one step. `Conflict` if the
    /// reference exists.
    fn insert_application(
        &self,
        application: &Application,
        entry: ActionEntry,
        eligibility: Option<&ExpiringEligibility>,
    ) -> Result<(), RepositoryError>;

    fn fetch_application(
        &self,
        reference: &ReferenceNumber,
    ) -> Result<Option<Application>, RepositoryError>;

    /// Replace the stored document and append `entry` in one step, provided the stored
    /// document is still at `expected`; otherwise `Stale` and nothing changes.
    fn commit_application(
        &self,
        application: &Application,
        expected: Checkpoint,
        entry: ActionEntry,
    ) -> Result<(), RepositoryError>;

    /// Every entry recorded against `reference`, oldest first.
    fn history(&self, reference: &ReferenceNumber) -> Result<Vec<ActionEntry>, RepositoryError>;

    /// Applications currently waiting on an officer.
    fn active_applications(&self) -> Result<Vec<Application>, RepositoryError>;
}

pub trait CorrigendumRepository: Send + Sync {
    /// Store a new corrigendum and append `parent_entry` to its application's history in one
    /// step. `Conflict` if the id exists or another open corrigendum targets the same
    /// application.
    fn insert_corrigendum(
        &self,
        corrigendum: &Corrigendum,
        parent_entry: ActionEntry,
    ) -> Result<(), RepositoryError>;

    fn fetch_corrigendum(&self, id: &CorrigendumId)
        -> Result<Option<Corrigendum>, RepositoryError>;

    /// Conditional replace, same contract as [`ApplicationRepository::commit_application`].
    fn commit_corrigendum(
        &self,
        corrigendum: &Corrigendum,
        expected: Checkpoint,
    ) -> Result<(), RepositoryError>;

    fn corrigenda_for(&self, reference: &ReferenceNumber)
        -> Result<Vec<Corrigendum>, RepositoryError>;

    fn open_corrigenda(&self) -> Result<Vec<Corrigendum>, RepositoryError>;
}

pub trait HoldRepository: Send + Sync {
    fn fetch_hold(
        &self,
        reference: &ReferenceNumber,
    ) -> Result<Option<WithheldApplication>, RepositoryError>;

    /// Upsert the hold record and append `entry` to the application's history, provided the
    /// application is still at `expected`; otherwise `Stale` and nothing changes. On success
    /// the application's revision moves to `expected.revision + 1`, so a transition read
    /// before the hold can no longer commit.
    fn commit_hold(
        &self,
        hold: &WithheldApplication,
        expected: Checkpoint,
        entry: ActionEntry,
    ) -> Result<(), RepositoryError>;
}

/// Expiring-credential records written alongside new applications.
pub trait EligibilityRegistry: Send + Sync {
    fn expiring_entry(
        &self,
        reference: &ReferenceNumber,
    ) -> Result<Option<ExpiringEligibility>, RepositoryError>;
}

/// Everything the workflow service persists through a single backend.
pub trait WorkflowRepository:
    ApplicationRepository + CorrigendumRepository + HoldRepository + EligibilityRegistry + CounterStore
{
}

impl<T> WorkflowRepository for T where
    T: ApplicationRepository
        + CorrigendumRepository
        + HoldRepository
        + EligibilityRegistry
        + CounterStore
{
}

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("record already exists")]
    Conflict,
    #[error("record changed since it was read (now at revision {})", .found.revision)]
    Stale { found: Checkpoint },
    #[error("record not found")]
    NotFound,
    #[error("repository unavailable: {0}")]
    Unavailable(String),
}

/// Opaque file store for uploaded documents.
pub trait FileStorage: Send + Sync {
    fn store(&self, file_name: &str, bytes: &[u8]) -> Result<FileHandle, StorageError>;
    fn delete(&self, handle: &FileHandle) -> Result<(), StorageError>;
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("stored file {0} not found")]
    Missing(FileHandle),
    #[error("file storage unavailable: {0}")]
    Unavailable(String),
}

/// Outbound hook for notification adapters (e-mail, PDF generation).
pub trait EventPublisher: Send + Sync {
    fn publish(&self, event: WorkflowEvent) -> Result<(), EventError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    Submitted,
    Sanctioned,
    Rejected,
    ReturnedToCitizen,
    CorrigendumOpened,
    CorrigendumSanctioned,
}

impl EventKind {
    pub const fn label(self) -> &'static str {
        match self {
            EventKind::Submitted => "submitted",
            EventKind::Sanctioned => "sanctioned",
            EventKind::Rejected => "rejected",
            EventKind::ReturnedToCitizen => "returned-to-citizen",
            EventKind::CorrigendumOpened => "corrigendum-opened",
            EventKind::CorrigendumSanctioned => "corrigendum-sanctioned",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowEvent {
    pub reference_number: ReferenceNumber,
    pub kind: EventKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub corrigendum_id: Option<CorrigendumId>,
}

#[derive(Debug, thiserror::Error)]
pub enum EventError {
    #[error("event transport unavailable: {0}")]
    Transport(String),
}
