use chrono::NaiveDate;
use citizen_workflow::config::AppConfig;
use citizen_workflow::error::AppError;
use citizen_workflow::workflows::applications::{
    ActionEntry, Application, ApplicationRepository, ApplicationStatus, Checkpoint, Corrigendum,
    CorrigendumId, CorrigendumRepository, EligibilityRegistry, EventError, EventPublisher,
    ExpiringEligibility, FileHandle, FileStorage, HoldRepository, JsonServiceCatalog, NewUpload,
    ReferenceNumber, RepositoryError, StorageError, WithheldApplication, WorkflowEvent,
    WorkflowService,
};
use citizen_workflow::workflows::location::{CsvLocationDirectory, LocationResolver};
use citizen_workflow::workflows::reference::{CounterError, CounterKey, CounterStore};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};
use uuid::Uuid;

pub(crate) type CliService = WorkflowService<JsonFileStore, LogEventPublisher>;

/// Wire the service against the configured data directory and reference tables.
pub(crate) fn open_service(config: &AppConfig) -> Result<CliService, AppError> {
    let store = Arc::new(JsonFileStore::open(config.storage.store_file())?);
    let files = Arc::new(LocalFileStorage::new(config.storage.uploads_dir()));
    let catalog = JsonServiceCatalog::from_path(&config.reference_data.services_json)?;
    let directory = CsvLocationDirectory::from_paths(
        &config.reference_data.districts_csv,
        &config.reference_data.tehsils_csv,
    )?;
    let locations = LocationResolver::new(Arc::new(directory), config.reference.state_name.clone());

    Ok(WorkflowService::new(
        store,
        Arc::new(LogEventPublisher),
        Arc::new(catalog),
        files,
        locations,
        config.reference.portal_prefix.clone(),
    ))
}

/// Every document the operator store keeps, serialized as one JSON file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoreDocument {
    #[serde(default)]
    applications: BTreeMap<ReferenceNumber, Application>,
    #[serde(default)]
    history: BTreeMap<ReferenceNumber, Vec<ActionEntry>>,
    #[serde(default)]
    corrigenda: BTreeMap<CorrigendumId, Corrigendum>,
    #[serde(default)]
    holds: BTreeMap<ReferenceNumber, WithheldApplication>,
    #[serde(default)]
    eligibility: BTreeMap<ReferenceNumber, ExpiringEligibility>,
    #[serde(default)]
    counters: BTreeMap<String, u64>,
}

/// Document store backed by a single JSON file, or by memory alone for demos.
///
/// Each mutation is applied to a copy and flushed before it becomes visible, so a failed
/// write leaves the previous state in place. The mutex serializes writers within one
/// process; concurrent CLI processes against the same file are not coordinated.
#[derive(Debug)]
pub(crate) struct JsonFileStore {
    path: Option<PathBuf>,
    document: Mutex<StoreDocument>,
}

impl JsonFileStore {
    pub(crate) fn open(path: PathBuf) -> Result<Self, AppError> {
        let document = if path.exists() {
            let raw = fs::read(&path)?;
            serde_json::from_slice(&raw)?
        } else {
            StoreDocument::default()
        };
        debug!(path = %path.display(), "opened document store");
        Ok(Self {
            path: Some(path),
            document: Mutex::new(document),
        })
    }

    pub(crate) fn ephemeral() -> Self {
        Self {
            path: None,
            document: Mutex::new(StoreDocument::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, StoreDocument> {
        self.document.lock().expect("store mutex poisoned")
    }

    fn read<T>(&self, view: impl FnOnce(&StoreDocument) -> T) -> T {
        view(&self.lock())
    }

    fn write<T>(
        &self,
        change: impl FnOnce(&mut StoreDocument) -> Result<T, RepositoryError>,
    ) -> Result<T, RepositoryError> {
        let mut guard = self.lock();
        let mut next = guard.clone();
        let value = change(&mut next)?;
        if let Some(path) = &self.path {
            flush(path, &next).map_err(|err| RepositoryError::Unavailable(err.to_string()))?;
        }
        *guard = next;
        Ok(value)
    }
}

fn flush(path: &Path, document: &StoreDocument) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let bytes = serde_json::to_vec_pretty(document)?;
    let staging = path.with_extension("json.tmp");
    fs::write(&staging, bytes)?;
    fs::rename(&staging, path)
}

impl ApplicationRepository for JsonFileStore {
    fn insert_application(
        &self,
        application: &Application,
        entry: ActionEntry,
        eligibility: Option<&ExpiringEligibility>,
    ) -> Result<(), RepositoryError> {
        self.write(|document| {
            let reference = application.reference_number.clone();
            if document.applications.contains_key(&reference) {
                return Err(RepositoryError::Conflict);
            }
            document
                .applications
                .insert(reference.clone(), application.clone());
            document
                .history
                .entry(reference.clone())
                .or_default()
                .push(entry);
            if let Some(eligibility) = eligibility {
                document.eligibility.insert(reference, eligibility.clone());
            }
            Ok(())
        })
    }

    fn fetch_application(
        &self,
        reference: &ReferenceNumber,
    ) -> Result<Option<Application>, RepositoryError> {
        Ok(self.read(|document| document.applications.get(reference).cloned()))
    }

    fn commit_application(
        &self,
        application: &Application,
        expected: Checkpoint,
        entry: ActionEntry,
    ) -> Result<(), RepositoryError> {
        self.write(|document| {
            let reference = &application.reference_number;
            let found = document
                .applications
                .get(reference)
                .ok_or(RepositoryError::NotFound)?
                .checkpoint();
            if found != expected {
                return Err(RepositoryError::Stale { found });
            }
            document
                .applications
                .insert(reference.clone(), application.clone());
            document
                .history
                .entry(reference.clone())
                .or_default()
                .push(entry);
            Ok(())
        })
    }

    fn history(&self, reference: &ReferenceNumber) -> Result<Vec<ActionEntry>, RepositoryError> {
        Ok(self.read(|document| document.history.get(reference).cloned().unwrap_or_default()))
    }

    fn active_applications(&self) -> Result<Vec<Application>, RepositoryError> {
        Ok(self.read(|document| {
            document
                .applications
                .values()
                .filter(|application| application.status == ApplicationStatus::Initiated)
                .cloned()
                .collect()
        }))
    }
}

impl CorrigendumRepository for JsonFileStore {
    fn insert_corrigendum(
        &self,
        corrigendum: &Corrigendum,
        parent_entry: ActionEntry,
    ) -> Result<(), RepositoryError> {
        self.write(|document| {
            let parent = corrigendum.reference_number.clone();
            if !document.applications.contains_key(&parent) {
                return Err(RepositoryError::NotFound);
            }
            let clashes = document.corrigenda.contains_key(&corrigendum.corrigendum_id)
                || document.corrigenda.values().any(|existing| {
                    existing.reference_number == corrigendum.reference_number
                        && existing.is_open()
                });
            if clashes {
                return Err(RepositoryError::Conflict);
            }
            document
                .corrigenda
                .insert(corrigendum.corrigendum_id.clone(), corrigendum.clone());
            document.history.entry(parent).or_default().push(parent_entry);
            Ok(())
        })
    }

    fn fetch_corrigendum(&self, id: &CorrigendumId) -> Result<Option<Corrigendum>, RepositoryError> {
        Ok(self.read(|document| document.corrigenda.get(id).cloned()))
    }

    fn commit_corrigendum(
        &self,
        corrigendum: &Corrigendum,
        expected: Checkpoint,
    ) -> Result<(), RepositoryError> {
        self.write(|document| {
            let found = document
                .corrigenda
                .get(&corrigendum.corrigendum_id)
                .ok_or(RepositoryError::NotFound)?
                .checkpoint();
            if found != expected {
                return Err(RepositoryError::Stale { found });
            }
            document
                .corrigenda
                .insert(corrigendum.corrigendum_id.clone(), corrigendum.clone());
            Ok(())
        })
    }

    fn corrigenda_for(
        &self,
        reference: &ReferenceNumber,
    ) -> Result<Vec<Corrigendum>, RepositoryError> {
        Ok(self.read(|document| {
            document
                .corrigenda
                .values()
                .filter(|corrigendum| &corrigendum.reference_number == reference)
                .cloned()
                .collect()
        }))
    }

    fn open_corrigenda(&self) -> Result<Vec<Corrigendum>, RepositoryError> {
        Ok(self.read(|document| {
            document
                .corrigenda
                .values()
                .filter(|corrigendum| corrigendum.is_open())
                .cloned()
                .collect()
        }))
    }
}

impl HoldRepository for JsonFileStore {
    fn fetch_hold(
        &self,
        reference: &ReferenceNumber,
    ) -> Result<Option<WithheldApplication>, RepositoryError> {
        Ok(self.read(|document| document.holds.get(reference).cloned()))
    }

    fn commit_hold(
        &self,
        hold: &WithheldApplication,
        expected: Checkpoint,
        entry: ActionEntry,
    ) -> Result<(), RepositoryError> {
        self.write(|document| {
            let reference = hold.reference_number.clone();
            let application = document
                .applications
                .get_mut(&reference)
                .ok_or(RepositoryError::NotFound)?;
            let found = application.checkpoint();
            if found != expected {
                return Err(RepositoryError::Stale { found });
            }
            application.revision = expected.revision + 1;
            document.holds.insert(reference.clone(), hold.clone());
            document.history.entry(reference).or_default().push(entry);
            Ok(())
        })
    }
}

impl EligibilityRegistry for JsonFileStore {
    fn expiring_entry(
        &self,
        reference: &ReferenceNumber,
    ) -> Result<Option<ExpiringEligibility>, RepositoryError> {
        Ok(self.read(|document| document.eligibility.get(reference).cloned()))
    }
}

impl CounterStore for JsonFileStore {
    fn increment(&self, key: &CounterKey) -> Result<u64, CounterError> {
        self.write(|document| {
            let counter = document.counters.entry(key.storage_key()).or_insert(0);
            *counter += 1;
            Ok(*counter)
        })
        .map_err(|err| CounterError::Unavailable(err.to_string()))
    }
}

/// Uploaded documents kept as plain files under one directory.
#[derive(Debug, Clone)]
pub(crate) struct LocalFileStorage {
    root: PathBuf,
}

impl LocalFileStorage {
    pub(crate) fn new(root: PathBuf) -> Self {
        Self { root }
    }
}

impl FileStorage for LocalFileStorage {
    fn store(&self, file_name: &str, bytes: &[u8]) -> Result<FileHandle, StorageError> {
        let base = Path::new(file_name)
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("upload");
        let handle = FileHandle(format!("{}-{base}", Uuid::new_v4()));

        fs::create_dir_all(&self.root)
            .and_then(|_| fs::write(self.root.join(&handle.0), bytes))
            .map_err(|err| StorageError::Unavailable(err.to_string()))?;
        debug!(%handle, size = bytes.len(), "stored upload");
        Ok(handle)
    }

    fn delete(&self, handle: &FileHandle) -> Result<(), StorageError> {
        match fs::remove_file(self.root.join(&handle.0)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                Err(StorageError::Missing(handle.clone()))
            }
            Err(err) => Err(StorageError::Unavailable(err.to_string())),
        }
    }
}

/// Upload store for the in-memory demo.
#[derive(Debug, Default)]
pub(crate) struct MemoryFileStorage {
    files: Mutex<BTreeMap<FileHandle, Vec<u8>>>,
    issued: AtomicUsize,
}

impl MemoryFileStorage {
    pub(crate) fn len(&self) -> usize {
        self.files.lock().expect("file mutex poisoned").len()
    }
}

impl FileStorage for MemoryFileStorage {
    fn store(&self, file_name: &str, bytes: &[u8]) -> Result<FileHandle, StorageError> {
        let sequence = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        let handle = FileHandle(format!("demo/{sequence}-{file_name}"));
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

/// Stand-in for the e-mail and PDF adapters: events are logged only.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct LogEventPublisher;

impl EventPublisher for LogEventPublisher {
    fn publish(&self, event: WorkflowEvent) -> Result<(), EventError> {
        info!(
            reference = %event.reference_number,
            kind = %event.kind,
            corrigendum = ?event.corrigendum_id,
            "workflow event"
        );
        Ok(())
    }
}

/// Read a local file into an upload named after it.
pub(crate) fn read_upload(path: &Path) -> io::Result<NewUpload> {
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("upload")
        .to_string();
    Ok(NewUpload {
        file_name,
        bytes: fs::read(path)?,
    })
}

pub(crate) fn parse_date(raw: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|err| format!("failed to parse '{raw}' as YYYY-MM-DD ({err})"))
}

/// Parse `Field=path` pairs given on the command line.
pub(crate) fn parse_field_path(raw: &str) -> Result<(String, PathBuf), String> {
    match raw.split_once('=') {
        Some((field, path)) if !field.trim().is_empty() && !path.trim().is_empty() => {
            Ok((field.trim().to_string(), PathBuf::from(path.trim())))
        }
        _ => Err(format!("expected FIELD=PATH, found '{raw}'")),
    }
}
