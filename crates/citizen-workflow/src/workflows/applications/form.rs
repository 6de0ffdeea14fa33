//! Citizen form documents and field-level edits.
//!
//! Fields are addressed through a [`FieldIndex`] built once per loaded form instead of
//! searching the section tree on every lookup. A bare field name must be unique across
//! sections; colliding names are addressed as `Section/Field`.
//!
//! File-valued fields follow a three-way update convention when edits arrive as JSON:
//! a populated upload replaces the stored file, an explicit `null` removes it, and an
//! omitted entry or an empty object leaves the stored handle untouched.

use std::collections::BTreeMap;
use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize};

use crate::workflows::location::{LocationError, LocationSnapshot, DISTRICT_FIELD, TEHSIL_FIELD};

/// Opaque handle returned by the file-storage collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileHandle(pub String);

impl fmt::Display for FileHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormField {
    pub name: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<FileHandle>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub additional_values: BTreeMap<String, String>,
}

impl FormField {
    pub fn text(name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            label: name.clone(),
            name,
            value: value.into(),
            file: None,
            additional_values: BTreeMap::new(),
        }
    }

    pub fn with_file(mut self, handle: FileHandle) -> Self {
        self.file = Some(handle);
        self
    }
}

/// Form values grouped by section, in section order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FormDetails {
    sections: BTreeMap<String, Vec<FormField>>,
}

impl FormDetails {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_section(mut self, name: impl Into<String>, fields: Vec<FormField>) -> Self {
        self.sections.insert(name.into(), fields);
        self
    }

    pub fn sections(&self) -> &BTreeMap<String, Vec<FormField>> {
        &self.sections
    }

    pub fn index(&self) -> FieldIndex {
        FieldIndex::build(self)
    }

    pub fn field(&self, path: &FieldPath) -> Option<&FormField> {
        self.sections
            .get(&path.section)
            .and_then(|fields| fields.get(path.position))
    }

    fn field_mut(&mut self, path: &FieldPath) -> Option<&mut FormField> {
        self.sections
            .get_mut(&path.section)
            .and_then(|fields| fields.get_mut(path.position))
    }

    /// Value of a uniquely named field. An absent field is `None`; a name shared by
    /// several sections is an error rather than a guess.
    pub fn value_of(&self, index: &FieldIndex, name: &str) -> Result<Option<&str>, FormError> {
        match index.resolve(name) {
            Ok(path) => Ok(self.field(&path).map(|field| field.value.as_str())),
            Err(FormError::UnknownField(_)) => Ok(None),
            Err(other) => Err(other),
        }
    }

    /// Jurisdiction snapshot read from the `District`/`Tehsil` fields.
    pub fn location_snapshot(&self, index: &FieldIndex) -> Result<LocationSnapshot, FormError> {
        let district = self.value_of(index, DISTRICT_FIELD)?;
        let tehsil = self.value_of(index, TEHSIL_FIELD)?;
        Ok(LocationSnapshot::from_values(district, tehsil)?)
    }

    /// Parse a `YYYY-MM-DD` date field; blank values are `None`.
    pub fn date_of(&self, index: &FieldIndex, name: &str) -> Result<Option<NaiveDate>, FormError> {
        let path = index.resolve(name)?;
        let raw = self
            .field(&path)
            .map(|field| field.value.trim())
            .unwrap_or_default();
        if raw.is_empty() {
            return Ok(None);
        }
        NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .map(Some)
            .map_err(|_| FormError::InvalidDate {
                field: name.to_string(),
                value: raw.to_string(),
            })
    }

    /// Apply resolved edits, returning the handles the edits superseded.
    pub(crate) fn apply_changes(&mut self, changes: Vec<FieldChange>) -> Vec<FileHandle> {
        let mut superseded = Vec::new();
        for change in changes {
            let Some(field) = self.field_mut(&change.path) else {
                continue;
            };
            if let Some(value) = change.value {
                field.value = value;
            }
            match change.file {
                FileChange::Keep => {}
                FileChange::Clear => superseded.extend(field.file.take()),
                FileChange::Set(handle) => superseded.extend(field.file.replace(handle)),
            }
        }
        superseded
    }
}

/// Location of one field inside the section tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldPath {
    pub section: String,
    pub position: usize,
    pub name: String,
}

/// Flat name-to-location index over a form.
#[derive(Debug, Clone, Default)]
pub struct FieldIndex {
    entries: BTreeMap<String, Vec<FieldPath>>,
}

impl FieldIndex {
    pub fn build(form: &FormDetails) -> Self {
        let mut entries: BTreeMap<String, Vec<FieldPath>> = BTreeMap::new();
        for (section, fields) in &form.sections {
            for (position, field) in fields.iter().enumerate() {
                entries.entry(field.name.clone()).or_default().push(FieldPath {
                    section: section.clone(),
                    position,
                    name: field.name.clone(),
                });
            }
        }
        Self { entries }
    }

    /// Resolve `Name` (must be unique) or `Section/Name`.
    pub fn resolve(&self, name: &str) -> Result<FieldPath, FormError> {
        if let Some((section, field)) = name.split_once('/') {
            return self
                .entries
                .get(field)
                .and_then(|paths| paths.iter().find(|path| path.section == section))
                .cloned()
                .ok_or_else(|| FormError::UnknownField(name.to_string()));
        }

        match self.entries.get(name).map(Vec::as_slice) {
            None | Some([]) => Err(FormError::UnknownField(name.to_string())),
            Some([only]) => Ok(only.clone()),
            Some(many) => Err(FormError::AmbiguousField {
                name: name.to_string(),
                sections: many.iter().map(|path| path.section.clone()).collect(),
            }),
        }
    }

    /// Resolve several names at once. Two names reaching the same field (`UdidCard` and
    /// `Documents/UdidCard`) are rejected.
    pub fn resolve_all<'a>(
        &self,
        names: impl IntoIterator<Item = &'a str>,
    ) -> Result<Vec<(FieldPath, &'a str)>, FormError> {
        let mut resolved: Vec<(FieldPath, &'a str)> = Vec::new();
        for name in names {
            let path = self.resolve(name)?;
            if let Some((_, first)) = resolved.iter().find(|(seen, _)| *seen == path) {
                return Err(FormError::DuplicateField {
                    name: name.to_string(),
                    first: first.to_string(),
                });
            }
            resolved.push((path, name));
        }
        Ok(resolved)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.resolve(name).is_ok()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FormError {
    #[error("field '{0}' does not exist in the form")]
    UnknownField(String),
    #[error("field '{name}' appears in sections {sections:?}; qualify it as Section/{name}")]
    AmbiguousField { name: String, sections: Vec<String> },
    #[error("field '{name}' is the same field as '{first}'")]
    DuplicateField { name: String, first: String },
    #[error("field '{field}' must be a YYYY-MM-DD date (found '{value}')")]
    InvalidDate { field: String, value: String },
    #[error(transparent)]
    Location(#[from] LocationError),
}

/// File bytes supplied with an edit.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewUpload {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

/// Requested change to a file-valued field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum FileUpdate {
    /// Leave the stored handle as it is.
    #[default]
    Keep,
    /// Delete the stored file and clear the handle.
    Remove,
    /// Store a new file in place of the current one.
    Replace(NewUpload),
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct UploadPayload {
    #[serde(default)]
    file_name: Option<String>,
    #[serde(default)]
    bytes: Option<Vec<u8>>,
}

impl<'de> Deserialize<'de> for FileUpdate {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Option::<UploadPayload>::deserialize(deserializer)? {
            None => Ok(FileUpdate::Remove),
            Some(UploadPayload {
                file_name: None,
                bytes: None,
            }) => Ok(FileUpdate::Keep),
            Some(UploadPayload {
                file_name: Some(file_name),
                bytes: Some(bytes),
            }) => Ok(FileUpdate::Replace(NewUpload { file_name, bytes })),
            Some(_) => Err(serde::de::Error::custom(
                "an upload needs both fileName and bytes",
            )),
        }
    }
}

/// Edit to one field after uploads have been stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct FieldChange {
    pub(crate) path: FieldPath,
    pub(crate) value: Option<String>,
    pub(crate) file: FileChange,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum FileChange {
    Keep,
    Clear,
    Set(FileHandle),
}

/// Field edits submitted by a citizen, scoped to `fields`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldEdits {
    pub fields: Vec<String>,
    #[serde(default)]
    pub values: BTreeMap<String, String>,
    #[serde(default)]
    pub files: BTreeMap<String, FileUpdate>,
}

impl FieldEdits {
    pub fn new(fields: Vec<String>) -> Self {
        Self {
            fields,
            ..Self::default()
        }
    }

    pub fn value(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(name.into(), value.into());
        self
    }

    pub fn file(mut self, name: impl Into<String>, update: FileUpdate) -> Self {
        self.files.insert(name.into(), update);
        self
    }

    /// Resolve every named field against the index; values or files for fields outside
    /// `fields` are ignored.
    pub fn resolve(&self, index: &FieldIndex) -> Result<Vec<(FieldPath, &str)>, FormError> {
        index.resolve_all(self.fields.iter().map(String::as_str))
    }

    pub fn file_update(&self, name: &str) -> &FileUpdate {
        static KEEP: FileUpdate = FileUpdate::Keep;
        self.files.get(name).unwrap_or(&KEEP)
    }
}
