use std::{
    fs::{self, File},
    io::{BufReader, BufWriter},
    path::{Path, PathBuf},
    time::Duration,
};

use duckdb::{AccessMode, Connection};
use log::{info, warn};

use crate::{
    config::PipelineConfig,
    error::{LoadError, PipelineError},
    load::{create_table, get_rows, upsert, StoredRow},
    records::{IndicatorRecord, WideRow},
    utils::lib_duckdb::open_with_retry,
};

/// Where the World Bank indicator data lives: the raw json landing file
/// written by the extract stage, and the DuckDB file with the wide table.
#[derive(Clone, Debug)]
pub struct IndicatorArchive {
    pub base_dir: String,
    pub duckdb_path: String,
}

impl IndicatorArchive {
    /// Path of the json file with the records of the last extraction.
    pub fn filename(&self) -> PathBuf {
        Path::new(&self.base_dir).join("Raw").join("raw_data.json")
    }

    pub fn write_raw(&self, records: &[IndicatorRecord]) -> Result<PathBuf, PipelineError> {
        let path = self.filename();
        let landing = |message: String| PipelineError::Landing {
            path: path.clone(),
            message,
        };
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).map_err(|e| landing(e.to_string()))?;
        }
        let file = File::create(&path).map_err(|e| landing(e.to_string()))?;
        serde_json::to_writer_pretty(BufWriter::new(file), records)
            .map_err(|e| landing(e.to_string()))?;
        info!("wrote {} records to {}", records.len(), path.display());
        Ok(path)
    }

    pub fn read_raw(&self) -> Result<Vec<IndicatorRecord>, PipelineError> {
        let path = self.filename();
        let landing = |message: String| PipelineError::Landing {
            path: path.clone(),
            message,
        };
        let file = File::open(&path)
            .map_err(|e| landing(format!("{}, run the extract stage first", e)))?;
        let items: Vec<serde_json::Value> =
            serde_json::from_reader(BufReader::new(file)).map_err(|e| landing(e.to_string()))?;
        let records = items
            .into_iter()
            .enumerate()
            .map(|(row, item)| {
                serde_json::from_value::<IndicatorRecord>(item)
                    .map_err(|e| landing(format!("row {}: {}", row, e)))
            })
            .collect::<Result<Vec<_>, _>>()?;
        if records.is_empty() {
            warn!("landing file {} has no records", path.display());
        }
        info!("read {} records from {}", records.len(), path.display());
        Ok(records)
    }

    /// Remove the landing file once its content is safely in the database.
    /// A failure here doesn't undo the load, so it is only logged.
    pub fn remove_raw(&self) {
        let path = self.filename();
        if !path.exists() {
            return;
        }
        match fs::remove_file(&path) {
            Ok(_) => info!("cleaned up {}", path.display()),
            Err(e) => warn!("failed to delete {}: {}", path.display(), e),
        }
    }

    pub fn open(&self, access_mode: AccessMode) -> Result<Connection, LoadError> {
        if let Some(dir) = Path::new(&self.duckdb_path).parent() {
            if !matches!(access_mode, AccessMode::ReadOnly) && !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir)?;
            }
        }
        let conn = open_with_retry(
            &self.duckdb_path,
            8,
            Duration::from_millis(25),
            access_mode,
        )?;
        Ok(conn)
    }

    /// Create the table if needed and upsert the rows.
    pub fn update_duckdb(
        &self,
        config: &PipelineConfig,
        rows: &[WideRow],
    ) -> Result<usize, LoadError> {
        info!(
            "loading {} rows into {}:{} ...",
            rows.len(),
            self.duckdb_path,
            config.table_name
        );
        let mut conn = self.open(AccessMode::ReadWrite)?;
        create_table(&conn, config)?;
        upsert(&mut conn, config, rows)
    }

    pub fn get_data(
        &self,
        config: &PipelineConfig,
        country_code: Option<&str>,
    ) -> Result<Vec<StoredRow>, LoadError> {
        let conn = self.open(AccessMode::ReadOnly)?;
        get_rows(&conn, config, country_code)
    }
}
