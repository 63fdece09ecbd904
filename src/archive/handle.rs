use std::collections::BTreeMap;
use std::path::Path;

use ndarray::Array1;

use crate::archive::source::{ArchiveError, ArchiveSource, JsonArchiveSource};
use crate::schema::config::{DomainEntry, MetadataVariable, SubgroupEntry};

/// Scoped handle on one opened archive.
///
/// The timepoint axis is read and validated once on open; iterating it is
/// restartable without re-opening the archive. Underlying reader resources
/// are released when the handle drops.
pub struct ArchiveHandle {
    source: Box<dyn ArchiveSource>,
    times: Vec<f64>,
}

impl std::fmt::Debug for ArchiveHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveHandle")
            .field("times", &self.times)
            .finish_non_exhaustive()
    }
}

impl ArchiveHandle {
    pub fn open(source: Box<dyn ArchiveSource>) -> Result<Self, ArchiveError> {
        let times = source.saving_times()?;
        if times.windows(2).any(|pair| pair[0] >= pair[1]) {
            return Err(ArchiveError::Inconsistent(
                "save-point times are not strictly ascending".to_string(),
            ));
        }

        Ok(ArchiveHandle { source, times })
    }

    /// Open an exported archive manifest from a filesystem path
    pub fn open_path(path: &Path) -> Result<Self, ArchiveError> {
        Self::open(Box::new(JsonArchiveSource::open(path)?))
    }

    /// Fresh iterator over the ascending save-point times on every call
    pub fn timepoints(&self) -> impl Iterator<Item = f64> + '_ {
        self.times.iter().copied()
    }

    pub fn timepoint_count(&self) -> usize {
        self.times.len()
    }

    pub fn domain_present(&self, domain: &DomainEntry) -> bool {
        self.source.domain_present(&domain.odessa_name)
    }

    pub fn domain_code_present(&self, odessa_name: &str) -> bool {
        self.source.domain_present(odessa_name)
    }

    /// All variable arrays a sub-group draws from, at one save-point index.
    /// On a name collision between storage locations the first location wins.
    pub fn read_domain_variables(
        &self,
        domain: &DomainEntry,
        subgroup: &SubgroupEntry,
        step: usize,
    ) -> Result<BTreeMap<String, Array1<f64>>, ArchiveError> {
        if !self.source.domain_present(&domain.odessa_name) {
            return Err(ArchiveError::DomainNotPresent(domain.odessa_name.clone()));
        }

        let mut variables = BTreeMap::new();
        for location in &subgroup.locations {
            for (name, array) in self.source.read_location(&domain.odessa_name, location, step)? {
                variables.entry(name).or_insert(array);
            }
        }

        Ok(variables)
    }

    /// Time-invariant per-element attribute rows for one metadata entry
    pub fn read_element_metadata(
        &self,
        entry: &MetadataVariable,
    ) -> Result<Vec<Vec<String>>, ArchiveError> {
        self.source
            .read_elements(entry.domain.as_deref(), &entry.element, &entry.attribute)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn open_handle(json: &serde_json::Value) -> ArchiveHandle {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{json}").unwrap();
        ArchiveHandle::open_path(file.path()).unwrap()
    }

    #[test]
    fn timepoints_are_restartable() {
        let handle = open_handle(&serde_json::json!({ "times": [0.0, 1.5, 20.0] }));

        let first: Vec<f64> = handle.timepoints().collect();
        let second: Vec<f64> = handle.timepoints().collect();
        assert_eq!(first, vec![0.0, 1.5, 20.0]);
        assert_eq!(first, second);
        assert_eq!(handle.timepoint_count(), 3);
    }

    #[test]
    fn non_ascending_times_are_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "times": [0.0, 10.0, 10.0] }}"#).unwrap();

        let err = ArchiveHandle::open_path(file.path()).unwrap_err();
        assert!(matches!(err, ArchiveError::Inconsistent(_)));
    }

    #[test]
    fn merges_variables_across_storage_locations() {
        let handle = open_handle(&serde_json::json!({
            "times": [0.0],
            "domains": {
                "OTHER": {
                    "global": { "variables": { "DT": [[0.1]] } },
                    "cavity": { "variables": { "VOL": [[2.0]] } }
                }
            }
        }));

        let schema = crate::schema::load::load_schema().unwrap();
        let domain = schema.domain("other").unwrap();
        let subgroup = domain
            .subgroups
            .iter()
            .find(|sub| sub.name == "global")
            .unwrap();

        let vars = handle.read_domain_variables(domain, subgroup, 0).unwrap();
        assert!(vars.contains_key("DT"));
        assert!(!vars.contains_key("VOL"));
    }
}
