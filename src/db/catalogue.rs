use chrono::Utc;
use log::info;
use rusqlite::{Connection, OptionalExtension, Row};
use thiserror::Error;
use uuid::Uuid;

use crate::db::record::{DatasetRecord, DatasetStatus};

#[derive(Debug, Error)]
pub enum CatalogueError {
    #[error("dataset {0} not found")]
    NotFound(String),
    #[error("invalid status transition {from} -> {to} for dataset {id}")]
    InvalidTransition {
        id: String,
        from: DatasetStatus,
        to: DatasetStatus,
    },
    #[error(transparent)]
    Db(#[from] rusqlite::Error),
}

const COLUMNS: &str = "uuid, archive_path, status, detail, output_path, size_bytes, \
                       slurm_id, attempts, cancel_requested, submitted_at, updated_at";

/// Create a new pending record, or return the existing identifier when the
/// archive path is already known. Never resets an existing status.
pub fn register(conn: &Connection, archive_path: &str) -> Result<String, CatalogueError> {
    let tx = conn.unchecked_transaction()?;

    let uuid = Uuid::new_v4().to_string();
    let inserted = tx.execute(
        "INSERT OR IGNORE INTO dataset (uuid, archive_path, updated_at) VALUES (?1, ?2, ?3)",
        (&uuid, archive_path, now()),
    )?;
    let uuid: String = tx.query_row(
        "SELECT uuid FROM dataset WHERE archive_path = ?1",
        [archive_path],
        |row| row.get(0),
    )?;
    tx.commit()?;

    if inserted == 0 {
        info!("Archive {archive_path} is already registered as {uuid}");
    } else {
        info!("Registered archive {archive_path} as {uuid}");
    }

    Ok(uuid)
}

pub fn find(conn: &Connection, id: &str) -> Result<DatasetRecord, CatalogueError> {
    conn.query_row(
        &format!("SELECT {COLUMNS} FROM dataset WHERE uuid = ?1"),
        [id],
        from_row,
    )
    .optional()?
    .ok_or_else(|| CatalogueError::NotFound(id.to_string()))
}

pub fn find_by_path(
    conn: &Connection,
    archive_path: &str,
) -> Result<Option<DatasetRecord>, CatalogueError> {
    Ok(conn
        .query_row(
            &format!("SELECT {COLUMNS} FROM dataset WHERE archive_path = ?1"),
            [archive_path],
            from_row,
        )
        .optional()?)
}

/// Used by the orchestrator to find in-flight jobs and retry candidates
pub fn list_by_status(
    conn: &Connection,
    status: DatasetStatus,
) -> Result<Vec<DatasetRecord>, CatalogueError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {COLUMNS} FROM dataset WHERE status = ?1 ORDER BY updated_at"
    ))?;
    let rows = stmt.query_map([status.as_str()], from_row)?;

    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

pub fn list_all(conn: &Connection) -> Result<Vec<DatasetRecord>, CatalogueError> {
    let mut stmt = conn.prepare(&format!("SELECT {COLUMNS} FROM dataset ORDER BY updated_at"))?;
    let rows = stmt.query_map([], from_row)?;

    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

/// Apply one status transition atomically. The read-modify-write runs in a
/// single transaction so concurrent workers can't race conflicting updates
/// onto the same record.
pub fn update_status(
    conn: &Connection,
    id: &str,
    to: DatasetStatus,
    detail: Option<&str>,
) -> Result<(), CatalogueError> {
    let tx = conn.unchecked_transaction()?;

    let record = find(&tx, id)?;
    if !record.status.can_transition(to) {
        return Err(CatalogueError::InvalidTransition {
            id: id.to_string(),
            from: record.status,
            to,
        });
    }

    let submitted_at = (to == DatasetStatus::Submitted).then(now);
    tx.execute(
        "UPDATE dataset SET status = ?2, detail = COALESCE(?3, detail), \
         submitted_at = COALESCE(?4, submitted_at), updated_at = ?5 WHERE uuid = ?1",
        (id, to.as_str(), detail, submitted_at, now()),
    )?;
    tx.commit()?;

    info!("Dataset {id}: {} -> {to}", record.status);
    Ok(())
}

/// Record the conversion result. Only the worker calls this, on success.
pub fn set_result(
    conn: &Connection,
    id: &str,
    output_path: &str,
    size_bytes: u64,
) -> Result<(), CatalogueError> {
    let updated = conn.execute(
        "UPDATE dataset SET output_path = ?2, size_bytes = ?3, updated_at = ?4 WHERE uuid = ?1",
        (id, output_path, size_bytes, now()),
    )?;
    if updated == 0 {
        return Err(CatalogueError::NotFound(id.to_string()));
    }

    Ok(())
}

pub fn set_job(conn: &Connection, id: &str, slurm_id: &str) -> Result<(), CatalogueError> {
    info!("Dataset {id}: SLURM job id {slurm_id}");
    let updated = conn.execute(
        "UPDATE dataset SET slurm_id = ?2, updated_at = ?3 WHERE uuid = ?1",
        (id, slurm_id, now()),
    )?;
    if updated == 0 {
        return Err(CatalogueError::NotFound(id.to_string()));
    }

    Ok(())
}

/// Increment the retry counter and return the new count
pub fn bump_attempts(conn: &Connection, id: &str) -> Result<u32, CatalogueError> {
    let tx = conn.unchecked_transaction()?;
    let updated = tx.execute(
        "UPDATE dataset SET attempts = attempts + 1, updated_at = ?2 WHERE uuid = ?1",
        (id, now()),
    )?;
    if updated == 0 {
        return Err(CatalogueError::NotFound(id.to_string()));
    }
    let attempts: u32 =
        tx.query_row("SELECT attempts FROM dataset WHERE uuid = ?1", [id], |row| row.get(0))?;
    tx.commit()?;

    Ok(attempts)
}

pub fn mark_cancel_requested(conn: &Connection, id: &str) -> Result<(), CatalogueError> {
    let updated = conn.execute(
        "UPDATE dataset SET cancel_requested = 1, updated_at = ?2 WHERE uuid = ?1",
        (id, now()),
    )?;
    if updated == 0 {
        return Err(CatalogueError::NotFound(id.to_string()));
    }

    Ok(())
}

fn now() -> String {
    Utc::now().to_rfc3339()
}

fn from_row(row: &Row) -> rusqlite::Result<DatasetRecord> {
    let status: String = row.get(2)?;
    let status = status.parse::<DatasetStatus>().map_err(|err| {
        rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(err))
    })?;

    Ok(DatasetRecord {
        uuid: row.get(0)?,
        archive_path: row.get(1)?,
        status,
        detail: row.get(3)?,
        output_path: row.get(4)?,
        size_bytes: row.get(5)?,
        slurm_id: row.get(6)?,
        attempts: row.get(7)?,
        cancel_requested: row.get::<_, i64>(8)? != 0,
        submitted_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open::open_in_memory;
    use DatasetStatus::*;

    #[test]
    fn register_is_idempotent_by_archive_path() {
        let conn = open_in_memory().unwrap();

        let first = register(&conn, "/data/run42.archive").unwrap();
        let second = register(&conn, "/data/run42.archive").unwrap();
        assert_eq!(first, second);
        assert_eq!(list_all(&conn).unwrap().len(), 1);
    }

    #[test]
    fn re_registering_does_not_reset_status() {
        let conn = open_in_memory().unwrap();

        let id = register(&conn, "/data/run42.archive").unwrap();
        update_status(&conn, &id, Submitted, None).unwrap();

        let again = register(&conn, "/data/run42.archive").unwrap();
        assert_eq!(again, id);
        assert_eq!(find(&conn, &id).unwrap().status, Submitted);
    }

    #[test]
    fn disallowed_transitions_fail_and_leave_the_record_untouched() {
        let conn = open_in_memory().unwrap();
        let id = register(&conn, "/data/run42.archive").unwrap();

        let err = update_status(&conn, &id, Running, None).unwrap_err();
        assert!(matches!(
            err,
            CatalogueError::InvalidTransition { from: Pending, to: Running, .. }
        ));
        assert_eq!(find(&conn, &id).unwrap().status, Pending);
    }

    #[test]
    fn converted_records_reject_resubmission() {
        let conn = open_in_memory().unwrap();
        let id = register(&conn, "/data/run42.archive").unwrap();

        for status in [Submitted, Running, Converted] {
            update_status(&conn, &id, status, None).unwrap();
        }

        assert!(matches!(
            update_status(&conn, &id, Submitted, None),
            Err(CatalogueError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn failed_records_can_be_resubmitted() {
        let conn = open_in_memory().unwrap();
        let id = register(&conn, "/data/run42.archive").unwrap();

        update_status(&conn, &id, Submitted, None).unwrap();
        update_status(&conn, &id, Failed, Some("node failure")).unwrap();
        update_status(&conn, &id, Submitted, None).unwrap();

        let record = find(&conn, &id).unwrap();
        assert_eq!(record.status, Submitted);
        // detail from the failure is kept for the operator
        assert_eq!(record.detail.as_deref(), Some("node failure"));
    }

    #[test]
    fn lists_retry_candidates_by_status() {
        let conn = open_in_memory().unwrap();

        let failed = register(&conn, "/data/a.archive").unwrap();
        update_status(&conn, &failed, Submitted, None).unwrap();
        update_status(&conn, &failed, Failed, Some("preempted")).unwrap();
        register(&conn, "/data/b.archive").unwrap();

        let records = list_by_status(&conn, Failed).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].uuid, failed);
    }

    #[test]
    fn unknown_ids_are_not_found() {
        let conn = open_in_memory().unwrap();
        assert!(matches!(
            find(&conn, "no-such-id"),
            Err(CatalogueError::NotFound(_))
        ));
        assert!(matches!(
            update_status(&conn, "no-such-id", Submitted, None),
            Err(CatalogueError::NotFound(_))
        ));
    }

    #[test]
    fn conversion_results_are_recorded() {
        let conn = open_in_memory().unwrap();
        let id = register(&conn, "/data/run42.archive").unwrap();

        set_result(&conn, &id, "/results/run42/dataset.h5", 4096).unwrap();
        set_job(&conn, &id, "1234").unwrap();
        assert_eq!(bump_attempts(&conn, &id).unwrap(), 1);

        let record = find(&conn, &id).unwrap();
        assert_eq!(record.output_path.as_deref(), Some("/results/run42/dataset.h5"));
        assert_eq!(record.size_bytes, Some(4096));
        assert_eq!(record.slurm_id.as_deref(), Some("1234"));
        assert_eq!(record.attempts, 1);
    }
}
