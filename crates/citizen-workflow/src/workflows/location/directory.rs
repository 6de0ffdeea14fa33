use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::Division;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct District {
    pub district_id: u32,
    pub name: String,
    pub short_code: String,
    pub division: Division,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tehsil {
    pub tehsil_id: u32,
    pub district_id: u32,
    pub name: String,
}

/// Read-only district/tehsil lookups.
pub trait LocationDirectory: Send + Sync {
    fn district(&self, district_id: u32) -> Option<District>;
    fn tehsil(&self, tehsil_id: u32) -> Option<Tehsil>;
}

#[derive(Debug, thiserror::Error)]
pub enum DirectoryLoadError {
    #[error("failed to read reference table: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid reference table row: {0}")]
    Csv(#[from] csv::Error),
    #[error("tehsil {tehsil_id} points at unknown district {district_id}")]
    DanglingTehsil { tehsil_id: u32, district_id: u32 },
    #[error("duplicate {table} id {id}")]
    Duplicate { table: &'static str, id: u32 },
}

/// Directory loaded once from the `districts.csv`/`tehsils.csv` exports.
#[derive(Debug, Clone, Default)]
pub struct CsvLocationDirectory {
    districts: BTreeMap<u32, District>,
    tehsils: BTreeMap<u32, Tehsil>,
}

impl CsvLocationDirectory {
    pub fn new(
        districts: Vec<District>,
        tehsils: Vec<Tehsil>,
    ) -> Result<Self, DirectoryLoadError> {
        let mut directory = Self::default();

        for district in districts {
            let id = district.district_id;
            if directory.districts.insert(id, district).is_some() {
                return Err(DirectoryLoadError::Duplicate {
                    table: "district",
                    id,
                });
            }
        }

        for tehsil in tehsils {
            if !directory.districts.contains_key(&tehsil.district_id) {
                return Err(DirectoryLoadError::DanglingTehsil {
                    tehsil_id: tehsil.tehsil_id,
                    district_id: tehsil.district_id,
                });
            }
            let id = tehsil.tehsil_id;
            if directory.tehsils.insert(id, tehsil).is_some() {
                return Err(DirectoryLoadError::Duplicate { table: "tehsil", id });
            }
        }

        Ok(directory)
    }

    pub fn from_paths<P: AsRef<Path>, Q: AsRef<Path>>(
        districts: P,
        tehsils: Q,
    ) -> Result<Self, DirectoryLoadError> {
        let districts = std::fs::File::open(districts)?;
        let tehsils = std::fs::File::open(tehsils)?;
        Self::from_readers(districts, tehsils)
    }

    pub fn from_readers<D: Read, T: Read>(
        districts: D,
        tehsils: T,
    ) -> Result<Self, DirectoryLoadError> {
        let districts = read_rows::<District, _>(districts)?;
        let tehsils = read_rows::<Tehsil, _>(tehsils)?;
        Self::new(districts, tehsils)
    }

    pub fn districts(&self) -> impl Iterator<Item = &District> {
        self.districts.values()
    }
}

fn read_rows<T, R>(reader: R) -> Result<Vec<T>, csv::Error>
where
    T: for<'de> Deserialize<'de>,
    R: Read,
{
    let mut csv_reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);
    csv_reader.deserialize::<T>().collect()
}

impl LocationDirectory for CsvLocationDirectory {
    fn district(&self, district_id: u32) -> Option<District> {
        self.districts.get(&district_id).cloned()
    }

    fn tehsil(&self, tehsil_id: u32) -> Option<Tehsil> {
        self.tehsils.get(&tehsil_id).cloned()
    }
}
