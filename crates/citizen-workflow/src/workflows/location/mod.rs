//! Jurisdiction ("officer area") resolution.
//!
//! Officers are scoped to a level (`State`, `Division`, `District`, `Tehsil`) and a code at
//! that level. The resolver turns a citizen's location snapshot into the code an officer
//! slot is bound to, names the area for display and audit, and reports drift when a
//! citizen edits the fields that determine jurisdiction.

mod directory;

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

pub use directory::{CsvLocationDirectory, DirectoryLoadError, District, LocationDirectory, Tehsil};

/// Field names in the citizen's form that carry jurisdiction.
pub const DISTRICT_FIELD: &str = "District";
pub const TEHSIL_FIELD: &str = "Tehsil";

/// Code bound to officers scoped to the whole state.
pub const STATE_CODE: u32 = 0;

/// Jurisdiction granularity an officer slot is authorized at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AccessLevel {
    State,
    Division,
    District,
    Tehsil,
}

impl AccessLevel {
    pub const fn label(self) -> &'static str {
        match self {
            AccessLevel::State => "State",
            AccessLevel::Division => "Division",
            AccessLevel::District => "District",
            AccessLevel::Tehsil => "Tehsil",
        }
    }
}

impl fmt::Display for AccessLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl std::str::FromStr for AccessLevel {
    type Err = LocationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "state" => Ok(AccessLevel::State),
            "division" => Ok(AccessLevel::Division),
            "district" => Ok(AccessLevel::District),
            "tehsil" => Ok(AccessLevel::Tehsil),
            _ => Err(LocationError::UnknownAccessLevel(value.to_string())),
        }
    }
}

/// The two macro-regions a district belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum Division {
    Jammu,
    Kashmir,
}

impl Division {
    pub const fn code(self) -> u32 {
        match self {
            Division::Jammu => 1,
            Division::Kashmir => 2,
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Division::Jammu => "Jammu",
            Division::Kashmir => "Kashmir",
        }
    }
}

impl TryFrom<u32> for Division {
    type Error = LocationError;

    fn try_from(code: u32) -> Result<Self, Self::Error> {
        match code {
            1 => Ok(Division::Jammu),
            2 => Ok(Division::Kashmir),
            other => Err(LocationError::UnknownDivision(other)),
        }
    }
}

impl From<Division> for u32 {
    fn from(division: Division) -> Self {
        division.code()
    }
}

/// Jurisdiction-determining values captured from a form at one point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationSnapshot {
    pub district: Option<u32>,
    pub tehsil: Option<u32>,
}

impl LocationSnapshot {
    /// Parse the raw form values; blank values count as absent.
    pub fn from_values(district: Option<&str>, tehsil: Option<&str>) -> Result<Self, LocationError> {
        Ok(Self {
            district: parse_code(DISTRICT_FIELD, district)?,
            tehsil: parse_code(TEHSIL_FIELD, tehsil)?,
        })
    }

    /// Most specific level present, used when stamping audit entries.
    pub fn most_specific(&self) -> Option<(AccessLevel, u32)> {
        match (self.tehsil, self.district) {
            (Some(tehsil), _) => Some((AccessLevel::Tehsil, tehsil)),
            (None, Some(district)) => Some((AccessLevel::District, district)),
            (None, None) => None,
        }
    }
}

fn parse_code(field: &'static str, raw: Option<&str>) -> Result<Option<u32>, LocationError> {
    match raw.map(str::trim).filter(|value| !value.is_empty()) {
        None => Ok(None),
        Some(value) => value
            .parse::<u32>()
            .map(Some)
            .map_err(|_| LocationError::InvalidCode {
                field,
                value: value.to_string(),
            }),
    }
}

/// Before/after pair of the most specific jurisdiction id in two snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JurisdictionDrift {
    pub level: AccessLevel,
    pub from: Option<u32>,
    pub to: Option<u32>,
}

impl JurisdictionDrift {
    pub fn is_shifted(&self) -> bool {
        self.from != self.to
    }
}

/// Compare two snapshots at the most specific level either of them carries.
///
/// A tehsil value on either side makes the comparison tehsil-level; otherwise districts
/// are compared.
pub fn detect_drift(before: &LocationSnapshot, after: &LocationSnapshot) -> JurisdictionDrift {
    if before.tehsil.is_some() || after.tehsil.is_some() {
        JurisdictionDrift {
            level: AccessLevel::Tehsil,
            from: before.tehsil,
            to: after.tehsil,
        }
    } else {
        JurisdictionDrift {
            level: AccessLevel::District,
            from: before.district,
            to: after.district,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LocationError {
    #[error("unknown district {0}")]
    UnknownDistrict(u32),
    #[error("unknown tehsil {0}")]
    UnknownTehsil(u32),
    #[error("unknown division code {0}")]
    UnknownDivision(u32),
    #[error("unknown access level '{0}'")]
    UnknownAccessLevel(String),
    #[error("location is missing the {0} needed for {0}-level officers")]
    MissingJurisdiction(AccessLevel),
    #[error("{field} must be a numeric code (found '{value}')")]
    InvalidCode { field: &'static str, value: String },
    #[error("tehsil {tehsil} does not belong to district {district}")]
    TehsilOutsideDistrict { tehsil: u32, district: u32 },
}

/// Read-only resolver over the district/tehsil reference tables.
#[derive(Clone)]
pub struct LocationResolver {
    directory: Arc<dyn LocationDirectory>,
    state_name: String,
}

impl fmt::Debug for LocationResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocationResolver")
            .field("state_name", &self.state_name)
            .finish_non_exhaustive()
    }
}

impl LocationResolver {
    pub fn new(directory: Arc<dyn LocationDirectory>, state_name: impl Into<String>) -> Self {
        Self {
            directory,
            state_name: state_name.into(),
        }
    }

    pub fn directory(&self) -> &dyn LocationDirectory {
        self.directory.as_ref()
    }

    /// Human-readable area name for an officer scoped to `code` at `level`.
    pub fn resolve(&self, level: AccessLevel, code: u32) -> Result<String, LocationError> {
        match level {
            AccessLevel::State => Ok(self.state_name.clone()),
            AccessLevel::Division => Ok(Division::try_from(code)?.label().to_string()),
            AccessLevel::District => self
                .directory
                .district(code)
                .map(|district| district.name)
                .ok_or(LocationError::UnknownDistrict(code)),
            AccessLevel::Tehsil => self
                .directory
                .tehsil(code)
                .map(|tehsil| tehsil.name)
                .ok_or(LocationError::UnknownTehsil(code)),
        }
    }

    /// Reject a snapshot whose tehsil lies in a different district than the one it names.
    /// Unknown ids are left to [`Self::jurisdiction_for`], which only needs the levels a
    /// chain actually uses.
    pub fn check_consistency(&self, snapshot: &LocationSnapshot) -> Result<(), LocationError> {
        let (Some(tehsil_id), Some(district_id)) = (snapshot.tehsil, snapshot.district) else {
            return Ok(());
        };
        match self.directory.tehsil(tehsil_id) {
            Some(tehsil) if tehsil.district_id != district_id => {
                Err(LocationError::TehsilOutsideDistrict {
                    tehsil: tehsil_id,
                    district: district_id,
                })
            }
            _ => Ok(()),
        }
    }

    /// Code an officer slot at `level` is bound to for a citizen at `snapshot`.
    pub fn jurisdiction_for(
        &self,
        level: AccessLevel,
        snapshot: &LocationSnapshot,
    ) -> Result<u32, LocationError> {
        let code = match level {
            AccessLevel::State => STATE_CODE,
            AccessLevel::Division => {
                let district_id = self.district_of(snapshot)?;
                self.directory
                    .district(district_id)
                    .ok_or(LocationError::UnknownDistrict(district_id))?
                    .division
                    .code()
            }
            AccessLevel::District => self.district_of(snapshot)?,
            AccessLevel::Tehsil => {
                let tehsil_id = snapshot
                    .tehsil
                    .ok_or(LocationError::MissingJurisdiction(AccessLevel::Tehsil))?;
                if self.directory.tehsil(tehsil_id).is_none() {
                    return Err(LocationError::UnknownTehsil(tehsil_id));
                }
                tehsil_id
            }
        };

        debug!(level = %level, code, "resolved officer jurisdiction");
        Ok(code)
    }

    fn district_of(&self, snapshot: &LocationSnapshot) -> Result<u32, LocationError> {
        if let Some(district_id) = snapshot.district {
            return Ok(district_id);
        }

        // Tehsil-only snapshots still identify a district through the reference table.
        let tehsil_id = snapshot
            .tehsil
            .ok_or(LocationError::MissingJurisdiction(AccessLevel::District))?;
        self.directory
            .tehsil(tehsil_id)
            .map(|tehsil| tehsil.district_id)
            .ok_or(LocationError::UnknownTehsil(tehsil_id))
    }
}
