use duckdb::{params, params_from_iter, types::Value, Connection};
use itertools::Itertools;
use log::{info, warn};

use crate::{
    config::{is_sql_identifier, PipelineConfig},
    error::LoadError,
    records::WideRow,
};

/// Rows per INSERT statement into the staging table.
const CHUNK_SIZE: usize = 250;

/// A row as stored in the wide table.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRow {
    pub country_code: String,
    pub country_name: Option<String>,
    pub year: i32,
    pub values: Vec<Option<f64>>,
}

fn table_name(config: &PipelineConfig) -> Result<&str, LoadError> {
    if !is_sql_identifier(&config.table_name) {
        return Err(LoadError::InvalidIdentifier(config.table_name.clone()));
    }
    if let Some(column) = config.columns().into_iter().find(|c| !is_sql_identifier(c)) {
        return Err(LoadError::InvalidIdentifier(column.to_string()));
    }
    Ok(&config.table_name)
}

/// Create the wide table if it doesn't exist.  An existing table is never
/// altered, but if it lacks some of the configured columns the load can't go
/// ahead and we fail with [`LoadError::SchemaDrift`].
pub fn create_table(conn: &Connection, config: &PipelineConfig) -> Result<(), LoadError> {
    let table = table_name(config)?;
    let indicator_columns = config
        .indicators
        .iter()
        .map(|e| format!("    {} DOUBLE,", e.column))
        .join("\n");
    let sql = format!(
        r#"
CREATE TABLE IF NOT EXISTS {table} (
    country_code VARCHAR NOT NULL,
    country_name VARCHAR,
    year INTEGER NOT NULL,
{indicator_columns}
    PRIMARY KEY (country_code, year)
);"#
    );
    conn.execute_batch(&sql)?;

    let mut stmt = conn.prepare(
        "SELECT column_name FROM information_schema.columns WHERE table_name = ? ORDER BY ordinal_position;",
    )?;
    let live = stmt
        .query_map(params![table], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;

    let mut expected = vec!["country_code", "country_name", "year"];
    expected.extend(config.columns());
    let missing = expected
        .iter()
        .filter(|c| !live.iter().any(|l| l == *c))
        .map(|c| c.to_string())
        .collect::<Vec<_>>();
    if !missing.is_empty() {
        return Err(LoadError::SchemaDrift {
            table: table.to_string(),
            missing,
        });
    }
    let extra = live
        .iter()
        .filter(|l| !expected.contains(&l.as_str()))
        .collect::<Vec<_>>();
    if !extra.is_empty() {
        warn!(
            "table {} has columns that are not configured, they will be left alone: {}",
            table,
            extra.iter().join(", ")
        );
    }
    Ok(())
}

/// Upsert the rows into the wide table keyed on (country_code, year).
///
/// The rows are first bulk inserted into a staging table, then merged into
/// the target with a single `INSERT ... ON CONFLICT DO UPDATE`.  Everything
/// happens in one transaction, so either the whole batch lands or nothing
/// does.  An existing row is replaced in full: indicators missing from the
/// new row become NULL.
///
/// Returns the number of rows inserted or updated.
pub fn upsert(
    conn: &mut Connection,
    config: &PipelineConfig,
    rows: &[WideRow],
) -> Result<usize, LoadError> {
    let table = table_name(config)?.to_string();
    if rows.is_empty() {
        info!("nothing to load into {}", table);
        return Ok(0);
    }
    let staging = format!("{}_staging", table);
    let mut columns = vec!["country_code", "country_name", "year"];
    columns.extend(config.columns());
    let column_list = columns.join(", ");
    let placeholders = format!("({})", vec!["?"; columns.len()].join(", "));

    let tx = conn.transaction()?;
    tx.execute_batch(&format!(
        "CREATE OR REPLACE TEMP TABLE {staging} AS SELECT {column_list} FROM {table} LIMIT 0;"
    ))?;

    for chunk in rows.chunks(CHUNK_SIZE) {
        let sql = format!(
            "INSERT INTO {staging} ({column_list}) VALUES {};",
            vec![placeholders.as_str(); chunk.len()].join(", ")
        );
        let values = chunk
            .iter()
            .flat_map(|row| {
                let mut values = vec![
                    Value::Text(row.country_code.clone()),
                    row.country_name.clone().map_or(Value::Null, Value::Text),
                    Value::Int(row.year),
                ];
                values.extend(row.values().into_iter().map(|v| v.map_or(Value::Null, Value::Double)));
                values
            })
            .collect::<Vec<_>>();
        tx.execute(&sql, params_from_iter(values))?;
    }

    let updates = columns
        .iter()
        .filter(|c| **c != "country_code" && **c != "year")
        .map(|c| format!("{c} = EXCLUDED.{c}"))
        .join(",\n    ");
    let n = tx.execute(
        &format!(
            r#"
INSERT INTO {table} ({column_list})
SELECT {column_list} FROM {staging}
ON CONFLICT (country_code, year) DO UPDATE SET
    {updates};"#
        ),
        [],
    )?;
    tx.execute_batch(&format!("DROP TABLE {staging};"))?;
    tx.commit()?;

    info!("{} rows were upserted into {}", n, table);
    Ok(n)
}

/// Read the wide table back, sorted by country and year.  Optionally only
/// for one country.
pub fn get_rows(
    conn: &Connection,
    config: &PipelineConfig,
    country_code: Option<&str>,
) -> Result<Vec<StoredRow>, LoadError> {
    let table = table_name(config)?;
    let columns = config.columns();
    let query = format!(
        r#"
SELECT country_code, country_name, year, {}
FROM {}
{}
ORDER BY country_code, year;"#,
        columns.join(", "),
        table,
        if country_code.is_some() {
            "WHERE country_code = ?"
        } else {
            ""
        }
    );
    let mut stmt = conn.prepare(&query)?;
    let n = columns.len();
    let rows = match country_code {
        Some(code) => stmt
            .query_map(params![code], |row| stored_row(row, n))?
            .collect::<Result<Vec<_>, _>>()?,
        None => stmt
            .query_map([], |row| stored_row(row, n))?
            .collect::<Result<Vec<_>, _>>()?,
    };
    Ok(rows)
}

fn stored_row(row: &duckdb::Row, n: usize) -> duckdb::Result<StoredRow> {
    let mut values = Vec::with_capacity(n);
    for i in 0..n {
        values.push(row.get::<_, Option<f64>>(3 + i)?);
    }
    Ok(StoredRow {
        country_code: row.get(0)?,
        country_name: row.get(1)?,
        year: row.get(2)?,
        values,
    })
}

#[cfg(test)]
mod tests {
    use std::error::Error;

    use crate::{config::Indicator, records::Cell};

    use super::*;

    fn config() -> PipelineConfig {
        let mut config = PipelineConfig::ecowas();
        config.table_name = "metrics_wide".into();
        config.indicators = ["A", "B", "C"]
            .iter()
            .map(|code| Indicator {
                code: format!("indicator_{}", code),
                description: code.to_string(),
                column: format!("col_{}", code.to_lowercase()),
                non_negative: false,
            })
            .collect();
        config
    }

    fn row(country: &str, year: i32, cells: Vec<Cell>) -> WideRow {
        WideRow {
            country_code: country.into(),
            country_name: Some(format!("{} name", country)),
            year,
            cells,
        }
    }

    fn setup() -> Result<(Connection, PipelineConfig), Box<dyn Error>> {
        let _ = env_logger::builder()
            .filter_level(log::LevelFilter::Info)
            .is_test(true)
            .try_init();
        let conn = Connection::open_in_memory()?;
        let config = config();
        create_table(&conn, &config)?;
        Ok((conn, config))
    }

    #[test]
    fn create_table_twice() -> Result<(), Box<dyn Error>> {
        let (conn, config) = setup()?;
        create_table(&conn, &config)?;
        assert!(get_rows(&conn, &config, None)?.is_empty());
        Ok(())
    }

    #[test]
    fn schema_drift() -> Result<(), Box<dyn Error>> {
        let (conn, mut config) = setup()?;
        config.indicators.push(Indicator {
            code: "indicator_D".into(),
            description: "D".into(),
            column: "col_d".into(),
            non_negative: false,
        });
        let res = create_table(&conn, &config);
        match res {
            Err(LoadError::SchemaDrift { missing, .. }) => assert_eq!(missing, vec!["col_d"]),
            other => panic!("expected schema drift, got {:?}", other),
        }
        Ok(())
    }

    #[test]
    fn extra_live_columns_are_tolerated() -> Result<(), Box<dyn Error>> {
        let (mut conn, mut config) = setup()?;
        config.indicators.pop();
        create_table(&conn, &config)?;
        let n = upsert(&mut conn, &config, &[row("NGA", 2020, vec![Cell::Value(1.0), Cell::Null])])?;
        assert_eq!(n, 1);
        Ok(())
    }

    #[test]
    fn idempotent_load() -> Result<(), Box<dyn Error>> {
        let (mut conn, config) = setup()?;
        let rows = vec![
            row("GHA", 2020, vec![Cell::Value(1.0), Cell::Null, Cell::Missing]),
            row("NGA", 2020, vec![Cell::Value(10.0), Cell::Value(20.0), Cell::Value(30.0)]),
        ];
        upsert(&mut conn, &config, &rows)?;
        let once = get_rows(&conn, &config, None)?;
        upsert(&mut conn, &config, &rows)?;
        let twice = get_rows(&conn, &config, None)?;
        assert_eq!(once, twice);
        assert_eq!(twice.len(), 2);
        assert_eq!(twice[0].values, vec![Some(1.0), None, None]);
        assert_eq!(twice[0].country_name.as_deref(), Some("GHA name"));
        Ok(())
    }

    #[test]
    fn upsert_replaces_full_row() -> Result<(), Box<dyn Error>> {
        let (mut conn, config) = setup()?;
        upsert(
            &mut conn,
            &config,
            &[
                row("NGA", 2020, vec![Cell::Value(10.0), Cell::Value(20.0), Cell::Value(30.0)]),
                row("SEN", 2020, vec![Cell::Value(1.0), Cell::Value(2.0), Cell::Value(3.0)]),
            ],
        )?;
        // col_a changes, col_b is carried again, col_c is not reported anymore
        let n = upsert(
            &mut conn,
            &config,
            &[row("NGA", 2020, vec![Cell::Value(15.0), Cell::Value(20.0), Cell::Missing])],
        )?;
        assert_eq!(n, 1);

        let nga = get_rows(&conn, &config, Some("NGA"))?;
        assert_eq!(nga.len(), 1);
        assert_eq!(nga[0].values, vec![Some(15.0), Some(20.0), None]);

        let sen = get_rows(&conn, &config, Some("SEN"))?;
        assert_eq!(sen[0].values, vec![Some(1.0), Some(2.0), Some(3.0)]);
        Ok(())
    }

    #[test]
    fn insert_new_keys_alongside_old() -> Result<(), Box<dyn Error>> {
        let (mut conn, config) = setup()?;
        upsert(&mut conn, &config, &[row("NGA", 2019, vec![Cell::Value(1.0), Cell::Missing, Cell::Missing])])?;
        upsert(&mut conn, &config, &[row("NGA", 2020, vec![Cell::Value(2.0), Cell::Missing, Cell::Missing])])?;
        let rows = get_rows(&conn, &config, None)?;
        let years = rows.iter().map(|r| r.year).collect::<Vec<_>>();
        assert_eq!(years, vec![2019, 2020]);
        Ok(())
    }

    #[test]
    fn large_batch_spans_chunks() -> Result<(), Box<dyn Error>> {
        let (mut conn, config) = setup()?;
        let rows = (0..(2 * CHUNK_SIZE + 7))
            .map(|i| row("NGA", 1000 + i as i32, vec![Cell::Value(i as f64), Cell::Null, Cell::Missing]))
            .collect::<Vec<_>>();
        let n = upsert(&mut conn, &config, &rows)?;
        assert_eq!(n, rows.len());
        assert_eq!(get_rows(&conn, &config, None)?.len(), rows.len());
        Ok(())
    }

    #[test]
    fn failed_batch_leaves_table_untouched() -> Result<(), Box<dyn Error>> {
        let (mut conn, config) = setup()?;
        upsert(&mut conn, &config, &[row("NGA", 2020, vec![Cell::Value(1.0), Cell::Missing, Cell::Missing])])?;

        // the first chunk stages fine, the last row has too few cells
        let mut bad = (0..CHUNK_SIZE)
            .map(|i| row("NGA", 2020 + i as i32, vec![Cell::Value(5.0), Cell::Missing, Cell::Missing]))
            .collect::<Vec<_>>();
        bad.push(row("SEN", 2020, vec![Cell::Value(6.0)]));
        assert!(upsert(&mut conn, &config, &bad).is_err());

        let rows = get_rows(&conn, &config, None)?;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].values, vec![Some(1.0), None, None]);

        // the connection is still usable
        let n = upsert(&mut conn, &config, &bad[..2])?;
        assert_eq!(n, 2);
        assert_eq!(get_rows(&conn, &config, None)?[0].values[0], Some(5.0));
        Ok(())
    }

    #[test]
    fn empty_batch_is_a_noop() -> Result<(), Box<dyn Error>> {
        let (mut conn, config) = setup()?;
        assert_eq!(upsert(&mut conn, &config, &[])?, 0);
        Ok(())
    }

    #[test]
    fn reject_bad_identifiers() -> Result<(), Box<dyn Error>> {
        let conn = Connection::open_in_memory()?;
        let mut config = config();
        config.table_name = "x; DROP TABLE y".into();
        assert!(matches!(
            create_table(&conn, &config),
            Err(LoadError::InvalidIdentifier(_))
        ));
        Ok(())
    }
}
