use log::info;

use crate::WorkingDirectory;

pub fn open_db(wd: &WorkingDirectory) -> rusqlite::Result<rusqlite::Connection> {
    let path = wd.path.join("assasdb.db");
    if !path.exists() {
        info!("Creating new catalogue database {}", path.display())
    }
    let conn = rusqlite::Connection::open(&path)?;
    apply_schema(&conn)?;

    Ok(conn)
}

/// Private catalogue for tests and dry runs
pub fn open_in_memory() -> rusqlite::Result<rusqlite::Connection> {
    let conn = rusqlite::Connection::open_in_memory()?;
    apply_schema(&conn)?;

    Ok(conn)
}

fn apply_schema(conn: &rusqlite::Connection) -> rusqlite::Result<()> {
    static SCHEMA: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/data/db/schema.sql"));
    conn.execute_batch(SCHEMA)
}
