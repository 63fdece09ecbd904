use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use log::info;
use ndarray::Array1;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("can't open archive {path}: {detail}")]
    Open { path: PathBuf, detail: String },
    /// The run did not configure this domain. Expected, not corruption.
    #[error("domain {0} is not present in this run")]
    DomainNotPresent(String),
    #[error("storage location {location} missing from domain {domain}")]
    LocationMissing { domain: String, location: String },
    #[error("metadata extraction failed for element {element}: {detail}")]
    Metadata { element: String, detail: String },
    #[error("archive is inconsistent: {0}")]
    Inconsistent(String),
}

/// Reading boundary of the native result archive.
///
/// Variable arrays are keyed by the simulator's own domain codes
/// ("PRIMARY", "SECONDAR", ...) and raw storage locations
/// ("primary_volume", "vessel_mesh", ...), exactly as the schema
/// tables enumerate them.
pub trait ArchiveSource {
    /// Ascending simulation save-point times
    fn saving_times(&self) -> Result<Vec<f64>, ArchiveError>;

    fn domain_present(&self, odessa_name: &str) -> bool;

    /// Variable arrays for one storage location at one save-point index
    fn read_location(
        &self,
        odessa_name: &str,
        location: &str,
        step: usize,
    ) -> Result<BTreeMap<String, Array1<f64>>, ArchiveError>;

    /// One row per element instance, one column per requested attribute.
    /// A `None` domain matches cross-cutting element tables.
    fn read_elements(
        &self,
        domain: Option<&str>,
        element: &str,
        attributes: &[String],
    ) -> Result<Vec<Vec<String>>, ArchiveError>;
}

/// Archive manifest exported from the odessa base as a single JSON file
#[derive(Debug, Deserialize)]
struct ArchiveFile {
    times: Vec<f64>,
    #[serde(default)]
    domains: BTreeMap<String, BTreeMap<String, LocationData>>,
    #[serde(default)]
    elements: Vec<ElementTable>,
}

#[derive(Debug, Deserialize)]
struct LocationData {
    /// variable name -> per-timepoint element arrays
    variables: BTreeMap<String, Vec<Vec<f64>>>,
}

#[derive(Debug, Deserialize)]
struct ElementTable {
    domain: Option<String>,
    element: String,
    /// attribute name -> one value per element instance
    attributes: BTreeMap<String, Vec<String>>,
}

/// [`ArchiveSource`] backed by an exported archive manifest on disk
#[derive(Debug)]
pub struct JsonArchiveSource {
    path: PathBuf,
    data: ArchiveFile,
}

impl JsonArchiveSource {
    pub fn open(path: &Path) -> Result<Self, ArchiveError> {
        info!("Opening archive export {}", path.display());
        let raw = fs::read_to_string(path).map_err(|err| ArchiveError::Open {
            path: path.to_path_buf(),
            detail: err.to_string(),
        })?;
        let data: ArchiveFile = serde_json::from_str(&raw).map_err(|err| ArchiveError::Open {
            path: path.to_path_buf(),
            detail: err.to_string(),
        })?;

        Ok(JsonArchiveSource {
            path: path.to_path_buf(),
            data,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ArchiveSource for JsonArchiveSource {
    fn saving_times(&self) -> Result<Vec<f64>, ArchiveError> {
        Ok(self.data.times.clone())
    }

    fn domain_present(&self, odessa_name: &str) -> bool {
        self.data.domains.contains_key(odessa_name)
    }

    fn read_location(
        &self,
        odessa_name: &str,
        location: &str,
        step: usize,
    ) -> Result<BTreeMap<String, Array1<f64>>, ArchiveError> {
        let domain = self
            .data
            .domains
            .get(odessa_name)
            .ok_or_else(|| ArchiveError::DomainNotPresent(odessa_name.to_string()))?;

        let data = domain.get(location).ok_or_else(|| ArchiveError::LocationMissing {
            domain: odessa_name.to_string(),
            location: location.to_string(),
        })?;

        let mut variables = BTreeMap::new();
        for (name, rows) in &data.variables {
            let row = rows.get(step).ok_or_else(|| {
                ArchiveError::Inconsistent(format!(
                    "variable {name} in {location} has no data at save-point {step}"
                ))
            })?;
            variables.insert(name.clone(), Array1::from(row.clone()));
        }

        Ok(variables)
    }

    fn read_elements(
        &self,
        domain: Option<&str>,
        element: &str,
        attributes: &[String],
    ) -> Result<Vec<Vec<String>>, ArchiveError> {
        let table = self
            .data
            .elements
            .iter()
            .find(|table| table.element == element && table.domain.as_deref() == domain)
            .ok_or_else(|| ArchiveError::Metadata {
                element: element.to_string(),
                detail: "no such element table in this archive".to_string(),
            })?;

        let mut columns = Vec::with_capacity(attributes.len());
        for attribute in attributes {
            let column = table.attributes.get(attribute).ok_or_else(|| {
                ArchiveError::Metadata {
                    element: element.to_string(),
                    detail: format!("attribute {attribute} is missing"),
                }
            })?;
            columns.push(column);
        }

        let rows = columns.first().map_or(0, |column| column.len());
        if columns.iter().any(|column| column.len() != rows) {
            return Err(ArchiveError::Metadata {
                element: element.to_string(),
                detail: "attribute columns differ in length".to_string(),
            });
        }

        Ok((0..rows)
            .map(|row| columns.iter().map(|column| column[row].clone()).collect())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    pub(crate) fn write_archive(json: &serde_json::Value) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{json}").unwrap();
        file
    }

    #[test]
    fn missing_file_is_an_open_error() {
        let err = JsonArchiveSource::open(Path::new("/no/such/archive.json")).unwrap_err();
        assert!(matches!(err, ArchiveError::Open { .. }));
    }

    #[test]
    fn absent_domain_reports_domain_not_present() {
        let file = write_archive(&serde_json::json!({ "times": [0.0] }));
        let source = JsonArchiveSource::open(file.path()).unwrap();

        assert!(!source.domain_present("PRIMARY"));
        let err = source.read_location("PRIMARY", "primary_volume", 0).unwrap_err();
        assert!(matches!(err, ArchiveError::DomainNotPresent(_)));
    }

    #[test]
    fn reads_variables_per_save_point() {
        let file = write_archive(&serde_json::json!({
            "times": [0.0, 10.0],
            "domains": {
                "SECONDAR": {
                    "secondar_volume": {
                        "variables": { "P": [[1.0, 2.0], [3.0, 4.0]] }
                    }
                }
            }
        }));
        let source = JsonArchiveSource::open(file.path()).unwrap();

        let vars = source.read_location("SECONDAR", "secondar_volume", 1).unwrap();
        assert_eq!(vars["P"].as_slice().unwrap(), &[3.0, 4.0]);
    }

    #[test]
    fn missing_attribute_is_a_metadata_error() {
        let file = write_archive(&serde_json::json!({
            "times": [0.0],
            "elements": [{
                "domain": "PRIMARY",
                "element": "JUNCTION",
                "attributes": { "NAME": ["j1"] }
            }]
        }));
        let source = JsonArchiveSource::open(file.path()).unwrap();

        let err = source
            .read_elements(Some("PRIMARY"), "JUNCTION", &["NAME".into(), "NV_UP".into()])
            .unwrap_err();
        assert!(matches!(err, ArchiveError::Metadata { .. }));
    }

    #[test]
    fn cross_cutting_tables_match_a_null_domain() {
        let file = write_archive(&serde_json::json!({
            "times": [0.0],
            "elements": [{
                "domain": null,
                "element": "CONNECTI",
                "attributes": {
                    "NAME": ["c1", "c2"],
                    "FROM": ["primary", "vessel"]
                }
            }]
        }));
        let source = JsonArchiveSource::open(file.path()).unwrap();

        let rows = source
            .read_elements(None, "CONNECTI", &["NAME".into(), "FROM".into()])
            .unwrap();
        assert_eq!(rows, vec![vec!["c1", "primary"], vec!["c2", "vessel"]]);
    }
}
