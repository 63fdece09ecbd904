use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::Utc;
use hdf5::types::VarLenUnicode;
use hdf5::Group;
use log::{info, warn};
use ndarray::{Array1, Array2};
use thiserror::Error;

use crate::archive::handle::ArchiveHandle;
use crate::archive::source::ArchiveError;
use crate::convert::report::ConversionReport;
use crate::schema::config::{DomainEntry, SubgroupEntry, METADATA_SUBGROUP};
use crate::schema::load::VariableSchema;

/// Fatal conversion failures: the archive can't be opened at all, or the
/// output container can't be written. Everything else degrades to a
/// recorded warning and the conversion carries on.
#[derive(Debug, Error)]
pub enum ConversionError {
    #[error("can't read archive: {0}")]
    Archive(#[from] ArchiveError),
    #[error("can't write output container {path}: {detail}")]
    Output { path: PathBuf, detail: String },
}

/// Drives the variable schema against one opened archive and serialises the
/// result as chunked, deflate-compressed HDF5.
pub struct ConversionEngine<'a> {
    schema: &'a VariableSchema,
    /// Timepoint rows per chunk; appending save-points extends the last
    /// chunk instead of rewriting the dataset
    chunk_rows: usize,
    /// Deflate level; compression is mandatory because the same scalar
    /// fields repeat across thousands of near-identical save-points
    deflate: u8,
}

impl<'a> ConversionEngine<'a> {
    pub fn new(schema: &'a VariableSchema) -> Self {
        ConversionEngine {
            schema,
            chunk_rows: 64,
            deflate: 6,
        }
    }

    /// Open the archive at `archive_path` and convert it to `output_path`
    pub fn convert_archive(
        &self,
        archive_path: &Path,
        output_path: &Path,
    ) -> Result<ConversionReport, ConversionError> {
        let handle = ArchiveHandle::open_path(archive_path)?;
        self.convert(&handle, archive_path, output_path)
    }

    pub fn convert(
        &self,
        handle: &ArchiveHandle,
        archive_path: &Path,
        output_path: &Path,
    ) -> Result<ConversionReport, ConversionError> {
        let started = Instant::now();
        info!(
            "Converting {} into {}",
            archive_path.display(),
            output_path.display()
        );

        if let Some(parent) = output_path.parent() {
            fs::create_dir_all(parent).map_err(|err| output_error(output_path, err))?;
        }
        let file =
            hdf5::File::create(output_path).map_err(|err| output_error(output_path, err))?;

        let times: Vec<f64> = handle.timepoints().collect();
        self.write_time_axis(&file, &times)
            .map_err(|err| output_error(output_path, err))?;

        let mut omitted: Vec<String> = Vec::new();
        let mut warnings: Vec<String> = Vec::new();

        for domain in self.schema.domains() {
            if !handle.domain_present(domain) {
                info!("Domain {} is not present in this run, skipping", domain.name);
                omitted.push(domain.name.clone());
                continue;
            }

            for subgroup in &domain.subgroups {
                if subgroup.is_metadata_aggregate() {
                    continue;
                }

                match self.collect_variables(handle, domain, subgroup) {
                    Ok((variables, mut local_warnings)) => {
                        warnings.append(&mut local_warnings);
                        if variables.is_empty() {
                            continue;
                        }
                        // groups appear only once a variable survived reading
                        let domain_group = ensure_group(&file, &domain.name)
                            .map_err(|err| output_error(output_path, err))?;
                        let subgroup_group = ensure_group(&domain_group, &subgroup.name)
                            .map_err(|err| output_error(output_path, err))?;
                        for (name, data) in variables {
                            self.write_series(&subgroup_group, &name, data)
                                .map_err(|err| output_error(output_path, err))?;
                        }
                    }
                    Err(err) => {
                        warn!("Reading {}/{} failed: {err}", domain.name, subgroup.name);
                        warnings.push(format!("domain {}/{}: {err}", domain.name, subgroup.name));
                    }
                }
            }
        }

        self.write_element_metadata(handle, &file, output_path, &mut warnings)?;

        let duration = started.elapsed();
        self.write_summary(
            &file,
            archive_path,
            &times,
            &omitted,
            warnings.len(),
            duration.as_secs_f64(),
        )
        .map_err(|err| output_error(output_path, err))?;

        drop(file);
        let size_bytes = fs::metadata(output_path).map(|meta| meta.len()).unwrap_or(0);

        Ok(ConversionReport {
            output_path: output_path.to_path_buf(),
            size_bytes,
            timepoints: times.len(),
            omitted_domains: omitted,
            warnings,
            duration,
        })
    }

    /// Accumulate per-variable time series for one sub-group. Variables with
    /// gaps or changing element counts are skipped with a warning.
    fn collect_variables(
        &self,
        handle: &ArchiveHandle,
        domain: &DomainEntry,
        subgroup: &SubgroupEntry,
    ) -> Result<(BTreeMap<String, Array2<f64>>, Vec<String>), ArchiveError> {
        let steps = handle.timepoint_count();
        let mut series: BTreeMap<String, Vec<Array1<f64>>> = BTreeMap::new();

        for step in 0..steps {
            for (name, array) in handle.read_domain_variables(domain, subgroup, step)? {
                series.entry(name).or_default().push(array);
            }
        }

        let mut variables = BTreeMap::new();
        let mut warnings = Vec::new();

        for (name, arrays) in series {
            let path = format!("{}/{}/{}", domain.name, subgroup.name, name);
            let Some(first) = arrays.first() else { continue };
            let columns = first.len();

            if arrays.len() != steps {
                warnings.push(format!("variable {path} is missing at some save-points, skipped"));
                continue;
            }
            if columns == 0 {
                warnings.push(format!("variable {path} has no elements, skipped"));
                continue;
            }
            if arrays.iter().any(|array| array.len() != columns) {
                warnings.push(format!(
                    "variable {path} changes element count across save-points, skipped"
                ));
                continue;
            }

            let mut flat = Vec::with_capacity(steps * columns);
            for array in &arrays {
                flat.extend(array.iter().copied());
            }
            match Array2::from_shape_vec((steps, columns), flat) {
                Ok(data) => {
                    variables.insert(name, data);
                }
                Err(err) => warnings.push(format!("variable {path}: {err}")),
            }
        }

        Ok((variables, warnings))
    }

    /// One 2-D dataset per variable, time axis leading, chunked and compressed
    fn write_series(&self, group: &Group, name: &str, data: Array2<f64>) -> hdf5::Result<()> {
        let (rows, columns) = data.dim();
        let chunk_rows = self.chunk_rows.min(rows).max(1);

        group
            .new_dataset_builder()
            .with_data(&data)
            .chunk((chunk_rows, columns))
            .deflate(self.deflate)
            .create(name)?;

        Ok(())
    }

    fn write_time_axis(&self, file: &hdf5::File, times: &[f64]) -> hdf5::Result<()> {
        let chunk_rows = self.chunk_rows.min(times.len()).max(1);
        file.new_dataset_builder()
            .with_data(&Array1::from(times.to_vec()))
            .chunk(chunk_rows)
            .deflate(self.deflate)
            .create("time")?;

        Ok(())
    }

    /// Element metadata is time-invariant: extracted once per entry and
    /// stored as fixed, unchunked tables under `<domain>/metadata`
    fn write_element_metadata(
        &self,
        handle: &ArchiveHandle,
        file: &hdf5::File,
        output_path: &Path,
        warnings: &mut Vec<String>,
    ) -> Result<(), ConversionError> {
        for (key, entry) in self.schema.metadata_variables() {
            let attempt = match &entry.domain {
                Some(code) => handle.domain_code_present(code),
                // cross-cutting entries are always attempted
                None => true,
            };
            if !attempt {
                continue;
            }

            let rows = match handle.read_element_metadata(entry) {
                Ok(rows) => rows,
                Err(err) => {
                    warn!("Metadata extraction for {key} failed: {err}");
                    warnings.push(format!("metadata {key}: {err}"));
                    continue;
                }
            };
            if rows.is_empty() {
                warnings.push(format!("metadata {key}: element table is empty, skipped"));
                continue;
            }

            let domain_group = ensure_group(file, entry.target_domain())
                .map_err(|err| output_error(output_path, err))?;
            let metadata_group = ensure_group(&domain_group, METADATA_SUBGROUP)
                .map_err(|err| output_error(output_path, err))?;

            for (index, attribute) in entry.attribute.iter().enumerate() {
                let column: Vec<String> = rows
                    .iter()
                    .map(|row| row.get(index).cloned().unwrap_or_default())
                    .collect();

                match to_varlen(&column) {
                    Ok(values) => {
                        let name =
                            format!("{}_{}", entry.element.to_lowercase(), attribute.to_lowercase());
                        metadata_group
                            .new_dataset_builder()
                            .with_data(&Array1::from(values))
                            .create(name.as_str())
                            .map_err(|err| output_error(output_path, err))?;
                    }
                    Err(detail) => warnings.push(format!("metadata {key}: {detail}")),
                }
            }
        }

        Ok(())
    }

    fn write_summary(
        &self,
        file: &hdf5::File,
        archive_path: &Path,
        times: &[f64],
        omitted: &[String],
        warning_count: usize,
        duration_seconds: f64,
    ) -> hdf5::Result<()> {
        let archive_name = archive_path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| "archive".to_string());

        write_str_attr(file, "name", &archive_name)?;
        write_str_attr(file, "source_archive", &archive_path.display().to_string())?;
        write_str_attr(file, "omitted_domains", &omitted.join(","))?;
        write_str_attr(file, "created_utc", &Utc::now().to_rfc3339())?;

        file.new_attr::<u64>()
            .create("timepoint_count")?
            .write_scalar(&(times.len() as u64))?;
        file.new_attr::<u64>()
            .create("warning_count")?
            .write_scalar(&(warning_count as u64))?;
        file.new_attr::<f64>()
            .create("duration_seconds")?
            .write_scalar(&duration_seconds)?;

        Ok(())
    }
}

fn ensure_group(parent: &Group, name: &str) -> hdf5::Result<Group> {
    if parent.link_exists(name) {
        parent.group(name)
    } else {
        parent.create_group(name)
    }
}

fn write_str_attr(group: &Group, name: &str, value: &str) -> hdf5::Result<()> {
    // interior nul bytes can't be represented; strip them rather than fail
    let cleaned: String = value.chars().filter(|ch| *ch != '\0').collect();
    let value: VarLenUnicode = cleaned.parse().map_err(|_| {
        hdf5::Error::from(format!("attribute {name} is not valid unicode"))
    })?;
    group
        .new_attr::<VarLenUnicode>()
        .create(name)?
        .write_scalar(&value)?;

    Ok(())
}

fn to_varlen(values: &[String]) -> Result<Vec<VarLenUnicode>, String> {
    values
        .iter()
        .map(|value| {
            value
                .parse::<VarLenUnicode>()
                .map_err(|err| format!("value {value:?} is not valid unicode: {err}"))
        })
        .collect()
}

fn output_error(path: &Path, err: impl std::fmt::Display) -> ConversionError {
    ConversionError::Output {
        path: path.to_path_buf(),
        detail: err.to_string(),
    }
}
