use std::time::Duration;

use duckdb::{AccessMode, Config, Connection};
use log::warn;

/// Open a DuckDB connection.  DuckDB only allows one writer per file, so if
/// another process has the file open, wait and try again, doubling the wait
/// each time.
/// Suggested `max_attempts = 8`, `initial_wait = Duration::from_millis(25)`.
pub fn open_with_retry(
    duckdb_path: &str,
    max_attempts: u32,
    initial_wait: Duration,
    access_mode: AccessMode,
) -> Result<Connection, duckdb::Error> {
    let mut attempts = 0;
    let mut wait_duration = initial_wait;

    loop {
        let config = Config::default().access_mode(same_mode(&access_mode))?;
        match Connection::open_with_flags(duckdb_path, config) {
            Ok(conn) => return Ok(conn),
            Err(e) => {
                attempts += 1;
                if attempts >= max_attempts {
                    return Err(e);
                }
                warn!(
                    "failed to open {} ({}), attempt {}/{}, retrying in {:?}",
                    duckdb_path, e, attempts, max_attempts, wait_duration
                );
                std::thread::sleep(wait_duration);
                wait_duration *= 2;
            }
        }
    }
}

fn same_mode(mode: &AccessMode) -> AccessMode {
    match mode {
        AccessMode::Automatic => AccessMode::Automatic,
        AccessMode::ReadOnly => AccessMode::ReadOnly,
        AccessMode::ReadWrite => AccessMode::ReadWrite,
    }
}
