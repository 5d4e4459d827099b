use std::collections::BTreeMap;

use log::info;
use tabled::{builder::Builder, settings::Style};

use crate::{
    config::PipelineConfig,
    records::{Cell, ValidatedRecordSet, WideRow},
};

/// Pivot the long records into one row per (country, year), one cell per
/// configured indicator.  Rows come out sorted by country code, then year.
/// Only (country, year) pairs with at least one record get a row.
pub fn transform(config: &PipelineConfig, records: &ValidatedRecordSet) -> Vec<WideRow> {
    let mut groups: BTreeMap<(&str, i32), WideRow> = BTreeMap::new();
    for record in records.records() {
        // the validator guarantees the indicator is configured
        let Some(idx) = config.indicator_index(&record.indicator_code) else {
            continue;
        };
        let row = groups
            .entry((record.country_code.as_str(), record.year))
            .or_insert_with(|| WideRow {
                country_code: record.country_code.clone(),
                country_name: config.country(&record.country_code).map(|c| c.name.clone()),
                year: record.year,
                cells: vec![Cell::Missing; config.indicators.len()],
            });
        row.cells[idx] = Cell::from(record.value);
    }

    let rows = groups.into_values().collect::<Vec<_>>();
    info!(
        "pivoted {} records into {} rows x {} indicators",
        records.len(),
        rows.len(),
        config.indicators.len()
    );
    rows
}

/// Make an ASCII table from the wide rows, for eyeballing in a terminal.
pub fn ascii_table(config: &PipelineConfig, rows: &[WideRow]) -> tabled::Table {
    let mut builder = Builder::new();
    let mut header = vec!["country".to_string(), "year".to_string()];
    header.extend(config.columns().iter().map(|c| c.to_string()));
    builder.push_record(header);
    for row in rows {
        let mut record = vec![row.country_code.clone(), row.year.to_string()];
        record.extend(row.cells.iter().map(|c| c.to_string()));
        builder.push_record(record);
    }
    let mut table = builder.build();
    table.with(Style::sharp());
    table
}
