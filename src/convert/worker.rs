use std::path::PathBuf;

use anyhow::{Context, Result};
use log::{info, warn};
use rusqlite::Connection;

use crate::convert::engine::ConversionEngine;
use crate::db::catalogue;
use crate::db::record::DatasetStatus;
use crate::schema::load::load_schema;
use crate::WorkingDirectory;

/// Worker body executed inside the SLURM allocation. Records its own
/// outcome so a crash between the job finishing and the next orchestrator
/// poll can't lose the result.
///
/// An orchestrator poll tick may observe the job running and move the
/// record to `running` before the worker gets here, so the transition is
/// only applied to records still in `submitted`.
pub fn run_conversion(conn: &Connection, wd: &WorkingDirectory, id: &str) -> Result<()> {
    let schema = load_schema()?;
    let record = catalogue::find(conn, id)?;
    if record.status == DatasetStatus::Submitted {
        catalogue::update_status(conn, id, DatasetStatus::Running, None)?;
    }

    let archive_path = PathBuf::from(&record.archive_path);
    let output_path = wd.path.join(id).join("dataset.h5");
    let engine = ConversionEngine::new(&schema);

    match engine.convert_archive(&archive_path, &output_path) {
        Ok(report) => {
            if report.has_warnings() {
                warn!("Conversion of {id} finished with warnings");
            }
            catalogue::set_result(
                conn,
                id,
                &report.output_path.display().to_string(),
                report.size_bytes,
            )?;
            catalogue::update_status(conn, id, DatasetStatus::Converted, Some(&report.detail()))?;
            info!("Dataset {id}: {}", report.detail());

            Ok(())
        }
        Err(err) => {
            catalogue::update_status(
                conn,
                id,
                DatasetStatus::Failed,
                Some(&format!("conversion failed: {err}")),
            )?;

            Err(err).context(format!("convert dataset {id}"))
        }
    }
}
