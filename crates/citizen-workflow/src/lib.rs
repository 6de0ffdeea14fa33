//! Application workflow engine for the citizen-services portal.
//!
//! The crate owns the routing of a citizen's submission through a chain of reviewing
//! officers: reference numbers, workflow construction, officer transitions, citizen
//! resubmission, corrigenda, holds, and the audit trail. Persistence, file storage,
//! service configuration and notifications are collaborators behind traits.

pub mod config;
pub mod error;
pub mod telemetry;
pub mod workflows;
