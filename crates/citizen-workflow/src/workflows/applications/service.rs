use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::builder::WorkflowBuilder;
use super::catalog::{ServiceCatalog, ServiceDefinition};
use super::corrigendum::{Corrigendum, CorrigendumField, CorrigendumId, CorrigendumRequest};
use super::domain::{
    Application, ApplicationStatus, Checkpoint, Officer, ReferenceNumber, ServiceId, Workflow,
};
use super::error::WorkflowError;
use super::expiry::{is_expiring_soon, ExpiringEligibility};
use super::form::{
    FieldChange, FieldEdits, FieldIndex, FileChange, FileHandle, FileUpdate, FormDetails,
    FormError, NewUpload,
};
use super::history::{self, ActionEntry, ActionKind, CITIZEN_ACTOR};
use super::repository::{
    EventKind, EventPublisher, FileStorage, RepositoryError, WorkflowEvent, WorkflowRepository,
};
use super::transition::{self, OfficerAction, Transition, TransitionError};
use super::withheld::{HeldWorkflow, HoldingOfficer, WithheldApplication, WithheldType};
use crate::workflows::location::{
    detect_drift, AccessLevel, LocationError, LocationResolver, LocationSnapshot,
};
use crate::workflows::reference::{
    FinancialYear, IssuedReference, ReferenceKind, ReferenceNumberGenerator, ReferenceScope,
};

/// A citizen's new application. Uploads are keyed by the field they attach to.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    pub service_id: ServiceId,
    pub form: FormDetails,
    #[serde(default)]
    pub uploads: BTreeMap<String, NewUpload>,
}

impl Submission {
    pub fn new(service_id: ServiceId, form: FormDetails) -> Self {
        Self {
            service_id,
            form,
            uploads: BTreeMap::new(),
        }
    }

    pub fn upload(mut self, field: impl Into<String>, upload: NewUpload) -> Self {
        self.uploads.insert(field.into(), upload);
        self
    }
}

/// Officer action against an application or corrigendum.
///
/// `expected` pins the pre-state the officer saw; without it the stored state at read time
/// is used.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionRequest {
    pub officer: Officer,
    pub action: OfficerAction,
    #[serde(default)]
    pub remarks: String,
    #[serde(default)]
    pub expected: Option<Checkpoint>,
}

impl TransitionRequest {
    pub fn new(officer: Officer, action: OfficerAction) -> Self {
        Self {
            officer,
            action,
            remarks: String::new(),
            expected: None,
        }
    }

    pub fn remarks(mut self, remarks: impl Into<String>) -> Self {
        self.remarks = remarks.into();
        self
    }

    pub fn expecting(mut self, checkpoint: Checkpoint) -> Self {
        self.expected = Some(checkpoint);
        self
    }
}

/// Work waiting on one officer.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Inbox {
    pub applications: Vec<Application>,
    pub corrigenda: Vec<Corrigendum>,
}

/// Read model handed to the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusView {
    pub reference_number: ReferenceNumber,
    pub display_reference: String,
    pub status: ApplicationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_officer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_area: Option<String>,
    pub withheld: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub open_corrigendum: Option<CorrigendumId>,
    pub renewal_due: bool,
}

/// Service composing the officer-chain engine with its persistence, file-storage,
/// configuration and notification collaborators.
pub struct WorkflowService<R, E> {
    repository: Arc<R>,
    events: Arc<E>,
    catalog: Arc<dyn ServiceCatalog>,
    files: Arc<dyn FileStorage>,
    locations: LocationResolver,
    references: ReferenceNumberGenerator<R>,
}

impl<R, E> WorkflowService<R, E>
where
    R: WorkflowRepository + 'static,
    E: EventPublisher + 'static,
{
    pub fn new(
        repository: Arc<R>,
        events: Arc<E>,
        catalog: Arc<dyn ServiceCatalog>,
        files: Arc<dyn FileStorage>,
        locations: LocationResolver,
        portal_prefix: impl Into<String>,
    ) -> Self {
        let references = ReferenceNumberGenerator::new(repository.clone(), portal_prefix);
        Self {
            repository,
            events,
            catalog,
            files,
            locations,
            references,
        }
    }

    /// Swap the reference generator, e.g. for one with a deterministic salt.
    pub fn with_references(mut self, references: ReferenceNumberGenerator<R>) -> Self {
        self.references = references;
        self
    }

    pub fn locations(&self) -> &LocationResolver {
        &self.locations
    }

    /// Create an application, build its officer chain and bind each slot to the
    /// citizen's jurisdiction.
    pub fn submit(&self, submission: Submission) -> Result<Application, WorkflowError> {
        let Submission {
            service_id,
            mut form,
            uploads,
        } = submission;

        let definition = self.definition(service_id)?;
        let mut workflow = WorkflowBuilder::new().build(&definition.officers)?;

        let index = form.index();
        let location = self.checked_location(&form, &index)?;
        self.bind_jurisdiction(&mut workflow, &location)?;

        let expires_on = match definition.expiring_credential_field.as_deref() {
            Some(field) if index.contains(field) => form.date_of(&index, field)?,
            _ => None,
        };
        let targets = index.resolve_all(uploads.keys().map(String::as_str))?;

        let now = Utc::now();
        let issued = self.issue_reference(&definition, &location, ReferenceKind::Application, now)?;

        let mut stored = Vec::new();
        let mut changes = Vec::with_capacity(targets.len());
        for ((path, _), upload) in targets.into_iter().zip(uploads.values()) {
            let handle = self.store_upload(upload, &mut stored)?;
            changes.push(FieldChange {
                path,
                value: None,
                file: FileChange::Set(handle),
            });
        }
        form.apply_changes(changes);

        let application = Application {
            reference_number: ReferenceNumber(issued.numeric),
            display_reference: issued.display,
            service_id,
            form_details: form,
            workflow,
            status: ApplicationStatus::Initiated,
            created_at: now,
            revision: 0,
        };
        let entry = ActionEntry::new(
            CITIZEN_ACTOR,
            ActionKind::Submitted,
            "",
            location.most_specific(),
            now,
        );

        let eligibility = expires_on.map(|expiration_date| ExpiringEligibility {
            service_id,
            reference_number: application.reference_number.clone(),
            expiration_date,
        });

        let inserted = self
            .repository
            .insert_application(&application, entry, eligibility.as_ref());
        if let Err(error) = inserted {
            self.discard(&stored);
            return Err(error.into());
        }

        let reference = &application.reference_number;
        info!(
            %reference,
            display = %application.display_reference,
            %service_id,
            "application submitted"
        );
        self.emit(reference, EventKind::Submitted, None);
        Ok(application)
    }

    pub fn get(&self, reference: &ReferenceNumber) -> Result<Application, WorkflowError> {
        self.repository
            .fetch_application(reference)?
            .ok_or_else(|| WorkflowError::NotFound(format!("application {reference}")))
    }

    /// Apply an officer action to an application.
    pub fn act(
        &self,
        reference: &ReferenceNumber,
        request: TransitionRequest,
    ) -> Result<Application, WorkflowError> {
        let mut application = self.get(reference)?;
        // After the read: a hold placed from here on moves the revision and the commit fails.
        self.ensure_not_withheld(reference)?;
        let expected = expect_checkpoint(reference, application.checkpoint(), request.expected)?;

        let now = Utc::now();
        let (outcome, entry) = self.transition(
            &mut application.workflow,
            &mut application.status,
            &request,
            now,
        )?;
        application.revision = expected.revision + 1;
        application.created_at = now;

        self.repository
            .commit_application(&application, expected, entry)
            .map_err(|error| commit_failed(reference, error))?;

        info!(
            %reference,
            action = %outcome.action,
            actor = outcome.actor,
            current_player = outcome.current_player,
            status = application.status.label(),
            "application transition committed"
        );
        if let Some(kind) = event_for(outcome.action, false) {
            self.emit(reference, kind, None);
        }
        Ok(application)
    }

    /// Apply a citizen's corrections to an application returned to them and hand it back
    /// to the officer who returned it.
    pub fn resubmit(
        &self,
        reference: &ReferenceNumber,
        edits: FieldEdits,
    ) -> Result<Application, WorkflowError> {
        let mut application = self.get(reference)?;
        self.ensure_not_withheld(reference)?;
        let expected = application.checkpoint();

        transition::resume_after_edit(&mut application.workflow, &mut application.status)?;

        let index = application.form_details.index();
        let targets = edits.resolve(&index)?;
        let before = application.form_details.location_snapshot(&index)?;

        let value_changes = targets
            .iter()
            .map(|(path, name)| FieldChange {
                path: path.clone(),
                value: edits.values.get(*name).cloned(),
                file: FileChange::Keep,
            })
            .collect();
        application.form_details.apply_changes(value_changes);

        let after = self.checked_location(&application.form_details, &index)?;
        self.rebind_after_edit(reference, &mut application.workflow, &before, &after)?;

        let mut stored = Vec::new();
        let mut file_changes = Vec::new();
        for (path, name) in &targets {
            let file = match edits.file_update(name) {
                FileUpdate::Keep => continue,
                FileUpdate::Remove => FileChange::Clear,
                FileUpdate::Replace(upload) => {
                    FileChange::Set(self.store_upload(upload, &mut stored)?)
                }
            };
            file_changes.push(FieldChange {
                path: path.clone(),
                value: None,
                file,
            });
        }
        let superseded = application.form_details.apply_changes(file_changes);

        let now = Utc::now();
        application.revision = expected.revision + 1;
        application.created_at = now;
        let entry = ActionEntry::new(
            CITIZEN_ACTOR,
            ActionKind::Resubmitted,
            "",
            after.most_specific(),
            now,
        );

        if let Err(error) = self
            .repository
            .commit_application(&application, expected, entry)
        {
            self.discard(&stored);
            return Err(commit_failed(reference, error));
        }
        self.discard(&superseded);

        info!(
            %reference,
            fields = targets.len(),
            current_player = application.workflow.current_player(),
            "application resubmitted"
        );
        Ok(application)
    }

    /// Open a field-scoped correction against a sanctioned application.
    pub fn open_corrigendum(
        &self,
        reference: &ReferenceNumber,
        request: CorrigendumRequest,
    ) -> Result<Corrigendum, WorkflowError> {
        self.ensure_not_withheld(reference)?;
        let application = self.get(reference)?;
        if application.status != ApplicationStatus::Sanctioned {
            return Err(WorkflowError::IneligibleForCorrigendum(format!(
                "application is {}, not Sanctioned",
                application.status.label()
            )));
        }

        let definition = self.definition(application.service_id)?;
        if definition.corrigendum_fields.is_empty() {
            return Err(WorkflowError::IneligibleForCorrigendum(format!(
                "service {} has no correctable fields",
                definition.service_id
            )));
        }
        let CorrigendumRequest { edits, remarks } = request;
        if edits.fields.is_empty() {
            return Err(WorkflowError::IneligibleForCorrigendum(
                "no fields named for correction".to_string(),
            ));
        }
        if let Some(name) = edits
            .fields
            .iter()
            .find(|name| !is_correctable(&definition, name))
        {
            return Err(WorkflowError::IneligibleForCorrigendum(format!(
                "field '{name}' cannot be corrected"
            )));
        }
        if self
            .repository
            .corrigenda_for(reference)?
            .iter()
            .any(Corrigendum::is_open)
        {
            return Err(already_open(reference));
        }

        let index = application.form_details.index();
        let targets = edits.resolve(&index)?;
        let location = self.checked_location(&application.form_details, &index)?;

        // Fresh chain from the template; the parent's mutated chain is never reused.
        let mut workflow = WorkflowBuilder::new()
            .force_can_pull(true)
            .build(&definition.officers)?;
        self.bind_jurisdiction(&mut workflow, &location)?;

        let now = Utc::now();
        let issued = self.issue_reference(&definition, &location, ReferenceKind::Amendment, now)?;

        let mut stored = Vec::new();
        let mut corrigendum_fields = BTreeMap::new();
        for (path, name) in &targets {
            let field = application
                .form_details
                .field(path)
                .ok_or_else(|| FormError::UnknownField(name.to_string()))?;
            let new_file = match edits.file_update(name) {
                FileUpdate::Keep => field.file.clone(),
                FileUpdate::Remove => None,
                FileUpdate::Replace(upload) => Some(self.store_upload(upload, &mut stored)?),
            };
            corrigendum_fields.insert(
                name.to_string(),
                CorrigendumField {
                    old_value: field.value.clone(),
                    new_value: edits
                        .values
                        .get(*name)
                        .cloned()
                        .unwrap_or_else(|| field.value.clone()),
                    old_file: field.file.clone(),
                    new_file,
                    additional_values: field.additional_values.clone(),
                },
            );
        }

        let opened = ActionEntry::new(
            CITIZEN_ACTOR,
            ActionKind::CorrigendumOpened,
            remarks.clone(),
            location.most_specific(),
            now,
        );
        let corrigendum = Corrigendum {
            corrigendum_id: CorrigendumId(issued.numeric),
            display_reference: issued.display,
            reference_number: reference.clone(),
            service_id: application.service_id,
            location,
            corrigendum_fields,
            remarks,
            workflow,
            status: ApplicationStatus::Initiated,
            kind: ReferenceKind::Amendment,
            history: vec![opened.clone()],
            created_at: now,
            revision: 0,
        };

        if let Err(error) = self.repository.insert_corrigendum(&corrigendum, opened) {
            self.discard(&stored);
            return Err(match error {
                RepositoryError::Conflict => already_open(reference),
                other => other.into(),
            });
        }

        let id = &corrigendum.corrigendum_id;
        info!(%reference, corrigendum = %id, fields = corrigendum.corrigendum_fields.len(), "corrigendum opened");
        self.emit(reference, EventKind::CorrigendumOpened, Some(id));
        Ok(corrigendum)
    }

    pub fn corrigendum(&self, id: &CorrigendumId) -> Result<Corrigendum, WorkflowError> {
        self.repository
            .fetch_corrigendum(id)?
            .ok_or_else(|| WorkflowError::NotFound(format!("corrigendum {id}")))
    }

    pub fn corrigenda(&self, reference: &ReferenceNumber) -> Result<Vec<Corrigendum>, WorkflowError> {
        self.get(reference)?;
        Ok(self.repository.corrigenda_for(reference)?)
    }

    /// Apply an officer action to a corrigendum's own chain. The parent application is
    /// never touched.
    pub fn act_on_corrigendum(
        &self,
        id: &CorrigendumId,
        request: TransitionRequest,
    ) -> Result<Corrigendum, WorkflowError> {
        let mut corrigendum = self.corrigendum(id)?;
        let reference = corrigendum.reference_number.clone();
        self.ensure_not_withheld(&reference)?;
        let expected = expect_checkpoint(&reference, corrigendum.checkpoint(), request.expected)?;

        let now = Utc::now();
        let (outcome, entry) = self.transition(
            &mut corrigendum.workflow,
            &mut corrigendum.status,
            &request,
            now,
        )?;
        corrigendum.history.push(entry);
        corrigendum.revision = expected.revision + 1;

        self.repository
            .commit_corrigendum(&corrigendum, expected)
            .map_err(|error| commit_failed(&reference, error))?;

        info!(
            %reference,
            corrigendum = %id,
            action = %outcome.action,
            current_player = outcome.current_player,
            status = corrigendum.status.label(),
            "corrigendum transition committed"
        );
        if let Some(kind) = event_for(outcome.action, true) {
            self.emit(&reference, kind, Some(id));
        }
        Ok(corrigendum)
    }

    /// Revise the new values of a corrigendum returned to the citizen.
    pub fn resubmit_corrigendum(
        &self,
        id: &CorrigendumId,
        edits: FieldEdits,
    ) -> Result<Corrigendum, WorkflowError> {
        let mut corrigendum = self.corrigendum(id)?;
        let reference = corrigendum.reference_number.clone();
        self.ensure_not_withheld(&reference)?;
        let expected = corrigendum.checkpoint();

        transition::resume_after_edit(&mut corrigendum.workflow, &mut corrigendum.status)?;
        if let Some(name) = edits
            .fields
            .iter()
            .find(|name| !corrigendum.corrigendum_fields.contains_key(name.as_str()))
        {
            return Err(FormError::UnknownField(name.clone()).into());
        }

        let mut stored = Vec::new();
        let mut superseded = Vec::new();
        for name in &edits.fields {
            let Some(field) = corrigendum.corrigendum_fields.get_mut(name) else {
                continue;
            };
            if let Some(value) = edits.values.get(name) {
                field.new_value = value.clone();
            }
            let replacement = match edits.file_update(name) {
                FileUpdate::Keep => continue,
                FileUpdate::Remove => None,
                FileUpdate::Replace(upload) => Some(self.store_upload(upload, &mut stored)?),
            };
            // Files inherited from the application belong to it and are never deleted here.
            if field.owns_new_file() {
                superseded.extend(field.new_file.take());
            }
            field.new_file = replacement;
        }

        let now = Utc::now();
        corrigendum.history.push(ActionEntry::new(
            CITIZEN_ACTOR,
            ActionKind::Resubmitted,
            "",
            corrigendum.location.most_specific(),
            now,
        ));
        corrigendum.revision = expected.revision + 1;

        if let Err(error) = self.repository.commit_corrigendum(&corrigendum, expected) {
            self.discard(&stored);
            return Err(commit_failed(&reference, error));
        }
        self.discard(&superseded);

        info!(%reference, corrigendum = %id, fields = edits.fields.len(), "corrigendum resubmitted");
        Ok(corrigendum)
    }

    /// Place an out-of-band hold; the officer must hold the application's current slot.
    pub fn withhold(
        &self,
        reference: &ReferenceNumber,
        officer: &Officer,
        withheld_type: WithheldType,
        reason: impl Into<String>,
    ) -> Result<WithheldApplication, WorkflowError> {
        let application = self.get(reference)?;
        if application.status.is_terminal() {
            return Err(TransitionError::Inactive(application.status).into());
        }
        let previous = self.repository.fetch_hold(reference)?;
        if previous.as_ref().is_some_and(WithheldApplication::is_active) {
            return Err(WorkflowError::Withheld(reference.clone()));
        }

        let player = application.workflow.current();
        if !officer.owns(player) {
            return Err(officer_mismatch(officer).into());
        }

        let reason = reason.into();
        let now = Utc::now();
        let entry = ActionEntry::new(
            officer.designation.clone(),
            ActionKind::Withheld,
            reason.clone(),
            Some((officer.access_level, officer.access_code)),
            now,
        );
        let mut history = previous.map(|hold| hold.history).unwrap_or_default();
        history.push(entry.clone());

        let hold = WithheldApplication {
            reference_number: reference.clone(),
            withheld_type,
            withheld_reason: reason,
            is_withheld: true,
            held_by: HoldingOfficer {
                designation: player.designation.clone(),
                access_level: officer.access_level,
                access_code: officer.access_code,
                player_id: player.player_id,
            },
            held_at: now,
            workflow: HeldWorkflow::capture(&application.workflow),
            released_at: None,
            history,
        };
        self.repository
            .commit_hold(&hold, application.checkpoint(), entry)
            .map_err(|error| commit_failed(reference, error))?;

        info!(%reference, kind = %withheld_type, "application withheld");
        Ok(hold)
    }

    /// Lift an active hold; only the officer who placed it may release it.
    pub fn release(
        &self,
        reference: &ReferenceNumber,
        officer: &Officer,
        remarks: impl Into<String>,
    ) -> Result<WithheldApplication, WorkflowError> {
        let application = self.get(reference)?;
        let mut hold = self
            .repository
            .fetch_hold(reference)?
            .filter(WithheldApplication::is_active)
            .ok_or_else(|| WorkflowError::NotFound(format!("active hold on {reference}")))?;
        if !hold.held_by.is(officer) {
            return Err(officer_mismatch(officer).into());
        }

        let now = Utc::now();
        let entry = ActionEntry::new(
            officer.designation.clone(),
            ActionKind::Released,
            remarks,
            Some((officer.access_level, officer.access_code)),
            now,
        );
        hold.is_withheld = false;
        hold.released_at = Some(now);
        hold.history.push(entry.clone());
        self.repository
            .commit_hold(&hold, application.checkpoint(), entry)
            .map_err(|error| commit_failed(reference, error))?;

        info!(%reference, "application released from hold");
        Ok(hold)
    }

    /// Audit trail without hold bookkeeping.
    pub fn history(&self, reference: &ReferenceNumber) -> Result<Vec<ActionEntry>, WorkflowError> {
        Ok(history::visible(self.full_history(reference)?))
    }

    pub fn full_history(
        &self,
        reference: &ReferenceNumber,
    ) -> Result<Vec<ActionEntry>, WorkflowError> {
        self.get(reference)?;
        Ok(self.repository.history(reference)?)
    }

    /// Applications and corrigenda whose current slot `officer` holds.
    pub fn pending_for(&self, officer: &Officer, limit: usize) -> Result<Inbox, WorkflowError> {
        let mut inbox = Inbox::default();

        for application in self.repository.active_applications()? {
            if inbox.applications.len() >= limit {
                break;
            }
            if application.status == ApplicationStatus::Initiated
                && officer.owns(application.workflow.current())
                && !self.is_withheld(&application.reference_number)?
            {
                inbox.applications.push(application);
            }
        }

        for corrigendum in self.repository.open_corrigenda()? {
            if inbox.corrigenda.len() >= limit {
                break;
            }
            if corrigendum.status == ApplicationStatus::Initiated
                && officer.owns(corrigendum.workflow.current())
                && !self.is_withheld(&corrigendum.reference_number)?
            {
                inbox.corrigenda.push(corrigendum);
            }
        }

        debug!(
            designation = %officer.designation,
            applications = inbox.applications.len(),
            corrigenda = inbox.corrigenda.len(),
            "built officer inbox"
        );
        Ok(inbox)
    }

    /// Current state of an application, including whether a renewal should be offered.
    pub fn status_view(
        &self,
        reference: &ReferenceNumber,
        as_of: NaiveDate,
    ) -> Result<StatusView, WorkflowError> {
        let application = self.get(reference)?;
        let withheld = self.is_withheld(reference)?;
        let open_corrigendum = self
            .repository
            .corrigenda_for(reference)?
            .into_iter()
            .find(Corrigendum::is_open)
            .map(|corrigendum| corrigendum.corrigendum_id);

        let (current_officer, current_area) = match application.status {
            ApplicationStatus::Initiated => {
                let player = application.workflow.current();
                let area = player
                    .access_code
                    .map(|code| self.locations.resolve(player.access_level, code))
                    .transpose()?;
                (Some(player.designation.clone()), area)
            }
            ApplicationStatus::Incomplete => (Some(CITIZEN_ACTOR.to_string()), None),
            ApplicationStatus::Sanctioned | ApplicationStatus::Rejected => (None, None),
        };

        let renewal_due = application.status == ApplicationStatus::Sanctioned
            && open_corrigendum.is_none()
            && !withheld
            && self
                .repository
                .expiring_entry(reference)?
                .is_some_and(|entry| is_expiring_soon(&entry, as_of));

        Ok(StatusView {
            reference_number: application.reference_number,
            display_reference: application.display_reference,
            status: application.status,
            current_officer,
            current_area,
            withheld,
            open_corrigendum,
            renewal_due,
        })
    }

    fn definition(&self, service_id: ServiceId) -> Result<ServiceDefinition, WorkflowError> {
        self.catalog
            .definition(service_id)?
            .ok_or_else(|| WorkflowError::NotFound(format!("service {service_id}")))
    }

    fn is_withheld(&self, reference: &ReferenceNumber) -> Result<bool, WorkflowError> {
        Ok(self
            .repository
            .fetch_hold(reference)?
            .is_some_and(|hold| hold.is_active()))
    }

    fn ensure_not_withheld(&self, reference: &ReferenceNumber) -> Result<(), WorkflowError> {
        if self.is_withheld(reference)? {
            return Err(WorkflowError::Withheld(reference.clone()));
        }
        Ok(())
    }

    /// Jurisdiction snapshot of `form`, refusing a tehsil outside the district it names.
    fn checked_location(
        &self,
        form: &FormDetails,
        index: &FieldIndex,
    ) -> Result<LocationSnapshot, FormError> {
        let snapshot = form.location_snapshot(index)?;
        self.locations.check_consistency(&snapshot)?;
        Ok(snapshot)
    }

    fn bind_jurisdiction(
        &self,
        workflow: &mut Workflow,
        location: &LocationSnapshot,
    ) -> Result<(), LocationError> {
        for player in workflow.players_mut() {
            player.access_code = Some(self.locations.jurisdiction_for(player.access_level, location)?);
        }
        Ok(())
    }

    /// Re-resolve the slots still ahead after a citizen edit. The current slot records
    /// the drift in its `shifted*` fields; settled slots keep the jurisdiction they acted
    /// under.
    fn rebind_after_edit(
        &self,
        reference: &ReferenceNumber,
        workflow: &mut Workflow,
        before: &LocationSnapshot,
        after: &LocationSnapshot,
    ) -> Result<(), LocationError> {
        if before == after {
            return Ok(());
        }
        let drift = detect_drift(before, after);
        debug!(%reference, level = %drift.level, from = ?drift.from, to = ?drift.to, "citizen location changed");

        let current = workflow.current_player();
        for player in workflow.players_mut().iter_mut().skip(current) {
            let code = self.locations.jurisdiction_for(player.access_level, after)?;
            if player.access_code == Some(code) {
                continue;
            }
            if player.player_id == current {
                player.shifted = true;
                player.shifted_from = player.access_code;
                player.shifted_to = Some(code);
                info!(%reference, player = current, from = ?player.access_code, to = code, "current officer shifted");
            }
            player.access_code = Some(code);
        }
        Ok(())
    }

    fn issue_reference(
        &self,
        definition: &ServiceDefinition,
        location: &LocationSnapshot,
        kind: ReferenceKind,
        now: DateTime<Utc>,
    ) -> Result<IssuedReference, WorkflowError> {
        let district_id = self
            .locations
            .jurisdiction_for(AccessLevel::District, location)?;
        let district = self
            .locations
            .directory()
            .district(district_id)
            .ok_or(LocationError::UnknownDistrict(district_id))?;

        Ok(self.references.next(ReferenceScope {
            district_id,
            district_code: &district.short_code,
            service_id: definition.service_id.0,
            service_code: &definition.short_code,
            financial_year: FinancialYear::containing(now.date_naive()),
            kind,
        })?)
    }

    /// Resolve the acting slot for `request` and run the state machine over it.
    fn transition(
        &self,
        workflow: &mut Workflow,
        status: &mut ApplicationStatus,
        request: &TransitionRequest,
        at: DateTime<Utc>,
    ) -> Result<(Transition, ActionEntry), WorkflowError> {
        if *status != ApplicationStatus::Initiated {
            return Err(TransitionError::Inactive(*status).into());
        }
        let actor = acting_player(workflow, &request.officer, request.action)?;
        let outcome = transition::apply(workflow, status, request.action, actor, &request.remarks, at)?;

        let location = workflow
            .player(actor)
            .and_then(|player| player.access_code.map(|code| (player.access_level, code)));
        let entry = ActionEntry::new(
            request.officer.designation.clone(),
            outcome.action,
            request.remarks.clone(),
            location,
            at,
        );
        Ok((outcome, entry))
    }

    fn store_upload(
        &self,
        upload: &NewUpload,
        stored: &mut Vec<FileHandle>,
    ) -> Result<FileHandle, WorkflowError> {
        match self.files.store(&upload.file_name, &upload.bytes) {
            Ok(handle) => {
                stored.push(handle.clone());
                Ok(handle)
            }
            Err(error) => {
                self.discard(stored);
                Err(error.into())
            }
        }
    }

    /// Best-effort deletion of files no document references any more.
    fn discard(&self, handles: &[FileHandle]) {
        for handle in handles {
            if let Err(error) = self.files.delete(handle) {
                warn!(%handle, %error, "failed to delete stored file");
            }
        }
    }

    fn emit(&self, reference: &ReferenceNumber, kind: EventKind, corrigendum: Option<&CorrigendumId>) {
        let event = WorkflowEvent {
            reference_number: reference.clone(),
            kind,
            corrigendum_id: corrigendum.cloned(),
        };
        if let Err(error) = self.events.publish(event) {
            warn!(%reference, event = %kind, %error, "failed to publish workflow event");
        }
    }
}

fn acting_player(
    workflow: &Workflow,
    officer: &Officer,
    action: OfficerAction,
) -> Result<usize, TransitionError> {
    let slot = match action {
        OfficerAction::Pull => workflow.players()[..workflow.current_player()]
            .iter()
            .rev()
            .find(|player| officer.owns(player)),
        _ => Some(workflow.current()).filter(|player| officer.owns(player)),
    };
    slot.map(|player| player.player_id)
        .ok_or_else(|| officer_mismatch(officer))
}

fn officer_mismatch(officer: &Officer) -> TransitionError {
    TransitionError::OfficerMismatch {
        designation: officer.designation.clone(),
    }
}

fn expect_checkpoint(
    reference: &ReferenceNumber,
    stored: Checkpoint,
    expected: Option<Checkpoint>,
) -> Result<Checkpoint, WorkflowError> {
    match expected {
        Some(expected) if expected != stored => {
            warn!(%reference, ?expected, ?stored, "rejected action against a stale pre-state");
            Err(WorkflowError::StaleState)
        }
        _ => Ok(stored),
    }
}

fn commit_failed(reference: &ReferenceNumber, error: RepositoryError) -> WorkflowError {
    if let RepositoryError::Stale { found } = &error {
        warn!(%reference, revision = found.revision, "concurrent update won; write rejected");
    }
    error.into()
}

fn event_for(action: ActionKind, corrigendum: bool) -> Option<EventKind> {
    match action {
        ActionKind::Sanctioned if corrigendum => Some(EventKind::CorrigendumSanctioned),
        ActionKind::Sanctioned => Some(EventKind::Sanctioned),
        ActionKind::Rejected => Some(EventKind::Rejected),
        ActionKind::ReturnedToCitizen => Some(EventKind::ReturnedToCitizen),
        _ => None,
    }
}

fn is_correctable(definition: &ServiceDefinition, name: &str) -> bool {
    let bare = name.rsplit('/').next().unwrap_or(name);
    definition
        .corrigendum_fields
        .iter()
        .any(|field| field == name || field == bare)
}

fn already_open(reference: &ReferenceNumber) -> WorkflowError {
    WorkflowError::IneligibleForCorrigendum(format!(
        "application {reference} already has an open corrigendum"
    ))
}
