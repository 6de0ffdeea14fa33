use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;

use crate::workflows::applications::catalog::{
    CatalogError, JsonServiceCatalog, OfficerTemplate, ServiceCatalog, ServiceDefinition,
};
use crate::workflows::applications::corrigendum::{Corrigendum, CorrigendumId};
use crate::workflows::applications::domain::{
    Application, ApplicationStatus, Checkpoint, Officer, ReferenceNumber, ServiceId, Workflow,
};
use crate::workflows::applications::expiry::ExpiringEligibility;
use crate::workflows::applications::form::{FileHandle, FormDetails, FormField};
use crate::workflows::applications::history::ActionEntry;
use crate::workflows::applications::repository::{
    ApplicationRepository, CorrigendumRepository, EligibilityRegistry, EventError, EventKind,
    EventPublisher, FileStorage, HoldRepository, RepositoryError, StorageError, WorkflowEvent,
};
use crate::workflows::applications::service::{Submission, TransitionRequest, WorkflowService};
use crate::workflows::applications::transition::OfficerAction;
use crate::workflows::applications::withheld::WithheldApplication;
use crate::workflows::location::{
    AccessLevel, CsvLocationDirectory, District, Division, LocationResolver, Tehsil,
};
use crate::workflows::reference::{
    CounterError, CounterKey, CounterStore, ReferenceNumberGenerator, SaltSource,
};

pub(super) const DISABILITY_PENSION: ServiceId = ServiceId(3);
pub(super) const MARRIAGE_ASSISTANCE: ServiceId = ServiceId(4);
pub(super) const UNCONFIGURED_CHAIN: ServiceId = ServiceId(6);
pub(super) const SENIOR_CITIZEN_CARD: ServiceId = ServiceId(8);

pub(super) const ORIGINAL_UDID: &str = "stored/udid-original.pdf";
pub(super) const ORIGINAL_PASSBOOK: &str = "stored/passbook.pdf";

pub(super) type TestService = WorkflowService<MemoryRepository, MemoryEvents>;

pub(super) fn directory() -> CsvLocationDirectory {
    let district = |district_id, name: &str, short_code: &str, division| District {
        district_id,
        name: name.to_string(),
        short_code: short_code.to_string(),
        division,
    };
    let tehsil = |tehsil_id, district_id, name: &str| Tehsil {
        tehsil_id,
        district_id,
        name: name.to_string(),
    };

    CsvLocationDirectory::new(
        vec![
            district(1, "Jammu", "JMU", Division::Jammu),
            district(5, "Srinagar", "SGR", Division::Kashmir),
            district(7, "Anantnag", "ANT", Division::Kashmir),
        ],
        vec![
            tehsil(101, 1, "Jammu North"),
            tehsil(501, 5, "Srinagar North"),
            tehsil(502, 5, "Srinagar South"),
            tehsil(701, 7, "Anantnag"),
        ],
    )
    .expect("fixture directory is consistent")
}

pub(super) fn resolver() -> LocationResolver {
    LocationResolver::new(Arc::new(directory()), "Jammu and Kashmir")
}

pub(super) fn pension_chain() -> Vec<OfficerTemplate> {
    vec![
        OfficerTemplate::new("Naib Tehsildar", AccessLevel::Tehsil),
        OfficerTemplate::new("Tehsil Social Welfare Officer", AccessLevel::Tehsil).pullable(),
        OfficerTemplate::new("District Social Welfare Officer", AccessLevel::District),
    ]
}

pub(super) fn catalog() -> JsonServiceCatalog {
    JsonServiceCatalog::new(vec![
        ServiceDefinition {
            service_id: DISABILITY_PENSION,
            name: "Disability Pension".to_string(),
            short_code: "DPS".to_string(),
            officers: pension_chain(),
            corrigendum_fields: vec!["UdidCard".to_string(), "BankAccount".to_string()],
            expiring_credential_field: Some("UdidValidUpto".to_string()),
        },
        ServiceDefinition {
            service_id: MARRIAGE_ASSISTANCE,
            name: "Marriage Assistance".to_string(),
            short_code: "MAS".to_string(),
            officers: vec![
                OfficerTemplate::new("Tehsildar", AccessLevel::Tehsil),
                OfficerTemplate::new("Director Social Welfare", AccessLevel::Division),
            ],
            corrigendum_fields: Vec::new(),
            expiring_credential_field: None,
        },
        ServiceDefinition {
            service_id: SENIOR_CITIZEN_CARD,
            name: "Senior Citizen Card".to_string(),
            short_code: "SCC".to_string(),
            officers: vec![
                OfficerTemplate::new("District Social Welfare Officer", AccessLevel::District),
                OfficerTemplate::new("Director Social Welfare", AccessLevel::Division),
            ],
            corrigendum_fields: Vec::new(),
            expiring_credential_field: None,
        },
        ServiceDefinition {
            service_id: UNCONFIGURED_CHAIN,
            name: "Ladli Beti".to_string(),
            short_code: "LBS".to_string(),
            officers: Vec::new(),
            corrigendum_fields: Vec::new(),
            expiring_credential_field: None,
        },
    ])
    .expect("fixture catalog is consistent")
}

pub(super) fn citizen_form() -> FormDetails {
    FormDetails::new()
        .with_section(
            "Location",
            vec![
                FormField::text("District", "5"),
                FormField::text("Tehsil", "501"),
            ],
        )
        .with_section(
            "Applicant",
            vec![
                FormField::text("Name", "Ishfaq Ahmad"),
                FormField::text("Phone", "9419000000"),
            ],
        )
        .with_section(
            "Documents",
            vec![
                FormField::text("UdidCard", "JK0512345")
                    .with_file(FileHandle(ORIGINAL_UDID.to_string())),
                FormField::text("UdidValidUpto", "2030-01-15"),
                FormField::text("BankAccount", "0011223344")
                    .with_file(FileHandle(ORIGINAL_PASSBOOK.to_string())),
            ],
        )
}

pub(super) fn naib_tehsildar() -> Officer {
    Officer::new("Naib Tehsildar", AccessLevel::Tehsil, 501)
}

pub(super) fn tehsil_welfare_officer() -> Officer {
    Officer::new("Tehsil Social Welfare Officer", AccessLevel::Tehsil, 501)
}

pub(super) fn district_welfare_officer() -> Officer {
    Officer::new("District Social Welfare Officer", AccessLevel::District, 5)
}

pub(super) fn build_service() -> (
    TestService,
    Arc<MemoryRepository>,
    Arc<MemoryEvents>,
    Arc<MemoryFiles>,
) {
    let repository = Arc::new(MemoryRepository::default());
    let events = Arc::new(MemoryEvents::default());
    let files = Arc::new(MemoryFiles::with_files(&[ORIGINAL_UDID, ORIGINAL_PASSBOOK]));
    let service = service_with(repository.clone(), events.clone(), files.clone());
    (service, repository, events, files)
}

pub(super) fn service_with<E: EventPublisher + 'static>(
    repository: Arc<MemoryRepository>,
    events: Arc<E>,
    files: Arc<MemoryFiles>,
) -> WorkflowService<MemoryRepository, E> {
    let references =
        ReferenceNumberGenerator::with_salt(repository.clone(), "JK", Box::new(FixedSalt(42)));
    WorkflowService::new(
        repository,
        events,
        Arc::new(catalog()),
        files,
        resolver(),
        "JK",
    )
    .with_references(references)
}

pub(super) fn submit_pension(service: &TestService) -> Application {
    service
        .submit(Submission::new(DISABILITY_PENSION, citizen_form()))
        .expect("pension submission succeeds")
}

pub(super) fn act(
    service: &TestService,
    reference: &ReferenceNumber,
    officer: Officer,
    action: OfficerAction,
) -> Application {
    service
        .act(reference, TransitionRequest::new(officer, action))
        .unwrap_or_else(|err| panic!("{action} should succeed: {err}"))
}

/// Submit and walk the chain to sanction.
pub(super) fn sanctioned_pension(service: &TestService) -> Application {
    let application = submit_pension(service);
    let reference = application.reference_number.clone();
    act(service, &reference, naib_tehsildar(), OfficerAction::Forward);
    act(service, &reference, tehsil_welfare_officer(), OfficerAction::Forward);
    act(service, &reference, district_welfare_officer(), OfficerAction::Forward)
}

/// Application shell around a bare workflow, for state-machine checks.
pub(super) fn application_with(workflow: Workflow, status: ApplicationStatus) -> Application {
    Application {
        reference_number: ReferenceNumber("10305250420000001".to_string()),
        display_reference: "JK/DPS/SGR/2024-25/000001".to_string(),
        service_id: DISABILITY_PENSION,
        form_details: FormDetails::new(),
        workflow,
        status,
        created_at: Utc::now(),
        revision: 0,
    }
}

pub(super) struct FixedSalt(pub(super) u16);

impl SaltSource for FixedSalt {
    fn salt(&self) -> u16 {
        self.0
    }
}

#[derive(Default)]
pub(super) struct MemoryState {
    pub(super) applications: HashMap<ReferenceNumber, Application>,
    pub(super) history: HashMap<ReferenceNumber, Vec<ActionEntry>>,
    pub(super) corrigenda: BTreeMap<CorrigendumId, Corrigendum>,
    pub(super) holds: HashMap<ReferenceNumber, WithheldApplication>,
    pub(super) eligibility: HashMap<ReferenceNumber, ExpiringEligibility>,
    pub(super) counters: HashMap<CounterKey, u64>,
}

type Interleaved = Box<dyn FnOnce() + Send>;

#[derive(Default, Clone)]
pub(super) struct MemoryRepository {
    state: Arc<Mutex<MemoryState>>,
    fail_next_commit: Arc<AtomicBool>,
    interleaved: Arc<Mutex<Option<Interleaved>>>,
}

impl MemoryRepository {
    pub(super) fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().expect("repository mutex poisoned")
    }

    pub(super) fn stored(&self, reference: &ReferenceNumber) -> Application {
        self.lock()
            .applications
            .get(reference)
            .cloned()
            .expect("application stored")
    }

    /// Make the next conditional commit fail as if the backend went away.
    pub(super) fn fail_next_commit(&self) {
        self.fail_next_commit.store(true, Ordering::SeqCst);
    }

    /// Run `step` just before the next conditional commit, as a competing caller would.
    pub(super) fn before_next_commit(&self, step: impl FnOnce() + Send + 'static) {
        *self.interleaved.lock().expect("hook mutex poisoned") = Some(Box::new(step));
    }

    fn injected_failure(&self) -> Result<(), RepositoryError> {
        let step = self.interleaved.lock().expect("hook mutex poisoned").take();
        if let Some(step) = step {
            step();
        }
        if self.fail_next_commit.swap(false, Ordering::SeqCst) {
            return Err(RepositoryError::Unavailable("database offline".to_string()));
        }
        Ok(())
    }
}

impl ApplicationRepository for MemoryRepository {
    fn insert_application(
        &self,
        application: &Application,
        entry: ActionEntry,
        eligibility: Option<&ExpiringEligibility>,
    ) -> Result<(), RepositoryError> {
        self.injected_failure()?;
        let mut state = self.lock();
        let reference = application.reference_number.clone();
        if state.applications.contains_key(&reference) {
            return Err(RepositoryError::Conflict);
        }
        state.applications.insert(reference.clone(), application.clone());
        state.history.entry(reference.clone()).or_default().push(entry);
        if let Some(eligibility) = eligibility {
            state.eligibility.insert(reference, eligibility.clone());
        }
        Ok(())
    }

    fn fetch_application(
        &self,
        reference: &ReferenceNumber,
    ) -> Result<Option<Application>, RepositoryError> {
        Ok(self.lock().applications.get(reference).cloned())
    }

    fn commit_application(
        &self,
        application: &Application,
        expected: Checkpoint,
        entry: ActionEntry,
    ) -> Result<(), RepositoryError> {
        self.injected_failure()?;
        let mut state = self.lock();
        let reference = &application.reference_number;
        let found = state
            .applications
            .get(reference)
            .ok_or(RepositoryError::NotFound)?
            .checkpoint();
        if found != expected {
            return Err(RepositoryError::Stale { found });
        }
        state.applications.insert(reference.clone(), application.clone());
        state.history.entry(reference.clone()).or_default().push(entry);
        Ok(())
    }

    fn history(&self, reference: &ReferenceNumber) -> Result<Vec<ActionEntry>, RepositoryError> {
        Ok(self
            .lock()
            .history
            .get(reference)
            .cloned()
            .unwrap_or_default())
    }

    fn active_applications(&self) -> Result<Vec<Application>, RepositoryError> {
        let mut active: Vec<Application> = self
            .lock()
            .applications
            .values()
            .filter(|application| application.status == ApplicationStatus::Initiated)
            .cloned()
            .collect();
        active.sort_by(|a, b| a.reference_number.cmp(&b.reference_number));
        Ok(active)
    }
}

impl CorrigendumRepository for MemoryRepository {
    fn insert_corrigendum(
        &self,
        corrigendum: &Corrigendum,
        parent_entry: ActionEntry,
    ) -> Result<(), RepositoryError> {
        self.injected_failure()?;
        let mut state = self.lock();
        let parent = corrigendum.reference_number.clone();
        if !state.applications.contains_key(&parent) {
            return Err(RepositoryError::NotFound);
        }
        let clashes = state.corrigenda.contains_key(&corrigendum.corrigendum_id)
            || state.corrigenda.values().any(|existing| {
                existing.reference_number == corrigendum.reference_number && existing.is_open()
            });
        if clashes {
            return Err(RepositoryError::Conflict);
        }
        state
            .corrigenda
            .insert(corrigendum.corrigendum_id.clone(), corrigendum.clone());
        state.history.entry(parent).or_default().push(parent_entry);
        Ok(())
    }

    fn fetch_corrigendum(
        &self,
        id: &CorrigendumId,
    ) -> Result<Option<Corrigendum>, RepositoryError> {
        Ok(self.lock().corrigenda.get(id).cloned())
    }

    fn commit_corrigendum(
        &self,
        corrigendum: &Corrigendum,
        expected: Checkpoint,
    ) -> Result<(), RepositoryError> {
        self.injected_failure()?;
        let mut state = self.lock();
        let found = state
            .corrigenda
            .get(&corrigendum.corrigendum_id)
            .ok_or(RepositoryError::NotFound)?
            .checkpoint();
        if found != expected {
            return Err(RepositoryError::Stale { found });
        }
        state
            .corrigenda
            .insert(corrigendum.corrigendum_id.clone(), corrigendum.clone());
        Ok(())
    }

    fn corrigenda_for(
        &self,
        reference: &ReferenceNumber,
    ) -> Result<Vec<Corrigendum>, RepositoryError> {
        Ok(self
            .lock()
            .corrigenda
            .values()
            .filter(|corrigendum| &corrigendum.reference_number == reference)
            .cloned()
            .collect())
    }

    fn open_corrigenda(&self) -> Result<Vec<Corrigendum>, RepositoryError> {
        Ok(self
            .lock()
            .corrigenda
            .values()
            .filter(|corrigendum| corrigendum.is_open())
            .cloned()
            .collect())
    }
}

impl HoldRepository for MemoryRepository {
    fn fetch_hold(
        &self,
        reference: &ReferenceNumber,
    ) -> Result<Option<WithheldApplication>, RepositoryError> {
        Ok(self.lock().holds.get(reference).cloned())
    }

    fn commit_hold(
        &self,
        hold: &WithheldApplication,
        expected: Checkpoint,
        entry: ActionEntry,
    ) -> Result<(), RepositoryError> {
        self.injected_failure()?;
        let mut state = self.lock();
        let reference = hold.reference_number.clone();
        let application = state
            .applications
            .get_mut(&reference)
            .ok_or(RepositoryError::NotFound)?;
        let found = application.checkpoint();
        if found != expected {
            return Err(RepositoryError::Stale { found });
        }
        application.revision = expected.revision + 1;
        state.holds.insert(reference.clone(), hold.clone());
        state.history.entry(reference).or_default().push(entry);
        Ok(())
    }
}

impl EligibilityRegistry for MemoryRepository {
    fn expiring_entry(
        &self,
        reference: &ReferenceNumber,
    ) -> Result<Option<ExpiringEligibility>, RepositoryError> {
        Ok(self.lock().eligibility.get(reference).cloned())
    }
}

impl CounterStore for MemoryRepository {
    fn increment(&self, key: &CounterKey) -> Result<u64, CounterError> {
        let mut state = self.lock();
        let counter = state.counters.entry(*key).or_insert(0);
        *counter += 1;
        Ok(*counter)
    }
}

#[derive(Default, Clone)]
pub(super) struct MemoryEvents {
    events: Arc<Mutex<Vec<WorkflowEvent>>>,
}

impl MemoryEvents {
    pub(super) fn kinds(&self) -> Vec<EventKind> {
        self.events
            .lock()
            .expect("event mutex poisoned")
            .iter()
            .map(|event| event.kind)
            .collect()
    }

    pub(super) fn events(&self) -> Vec<WorkflowEvent> {
        self.events.lock().expect("event mutex poisoned").clone()
    }
}

impl EventPublisher for MemoryEvents {
    fn publish(&self, event: WorkflowEvent) -> Result<(), EventError> {
        self.events
            .lock()
            .expect("event mutex poisoned")
            .push(event);
        Ok(())
    }
}

pub(super) struct OfflineEvents;

impl EventPublisher for OfflineEvents {
    fn publish(&self, _event: WorkflowEvent) -> Result<(), EventError> {
        Err(EventError::Transport("smtp relay offline".to_string()))
    }
}

#[derive(Default)]
pub(super) struct MemoryFiles {
    files: Mutex<BTreeMap<FileHandle, Vec<u8>>>,
    sequence: AtomicU64,
}

impl MemoryFiles {
    pub(super) fn with_files(handles: &[&str]) -> Self {
        let files = handles
            .iter()
            .map(|handle| (FileHandle(handle.to_string()), b"%PDF".to_vec()))
            .collect();
        Self {
            files: Mutex::new(files),
            sequence: AtomicU64::new(0),
        }
    }

    pub(super) fn contains(&self, handle: &str) -> bool {
        self.files
            .lock()
            .expect("file mutex poisoned")
            .contains_key(&FileHandle(handle.to_string()))
    }

    pub(super) fn len(&self) -> usize {
        self.files.lock().expect("file mutex poisoned").len()
    }
}

impl FileStorage for MemoryFiles {
    fn store(&self, file_name: &str, bytes: &[u8]) -> Result<FileHandle, StorageError> {
        let id = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let handle = FileHandle(format!("mem/{id}-{file_name}"));
        self.files
            .lock()
            .expect("file mutex poisoned")
            .insert(handle.clone(), bytes.to_vec());
        Ok(handle)
    }

    fn delete(&self, handle: &FileHandle) -> Result<(), StorageError> {
        self.files
            .lock()
            .expect("file mutex poisoned")
            .remove(handle)
            .map(|_| ())
            .ok_or_else(|| StorageError::Missing(handle.clone()))
    }
}

/// Catalog whose backing store is down.
pub(super) struct OfflineCatalog;

impl ServiceCatalog for OfflineCatalog {
    fn definition(&self, _service_id: ServiceId) -> Result<Option<ServiceDefinition>, CatalogError> {
        Err(CatalogError::Unavailable("configuration database offline".to_string()))
    }
}
