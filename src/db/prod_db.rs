use std::env;

use super::indicator_archive::IndicatorArchive;

pub struct ProdDb {}

impl ProdDb {
    /// Locations come from `ARCHIVE_DIR` and `DUCKDB_PATH` (see `.env/prod.env`).
    pub fn world_bank_indicators() -> IndicatorArchive {
        IndicatorArchive {
            base_dir: env::var("ARCHIVE_DIR")
                .unwrap_or_else(|_| "data/Archive/WorldBank/Indicators".to_string()),
            duckdb_path: env::var("DUCKDB_PATH")
                .unwrap_or_else(|_| "data/Archive/DuckDB/world_bank/indicators.duckdb".to_string()),
        }
    }
}
