use std::fmt;

use serde::{Deserialize, Serialize};

/// One observation, as returned by the API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IndicatorRecord {
    pub country_code: String,
    pub indicator_code: String,
    pub year: i32,
    pub value: Option<f64>,
}

/// Records that passed every schema check.  Only [`crate::validate::validate`]
/// can make one.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedRecordSet {
    records: Vec<IndicatorRecord>,
}

impl ValidatedRecordSet {
    pub(crate) fn new(records: Vec<IndicatorRecord>) -> Self {
        ValidatedRecordSet { records }
    }

    pub fn records(&self) -> &[IndicatorRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// The content of one indicator column for a (country, year).
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Cell {
    /// No record for this indicator
    #[default]
    Missing,
    /// The source reported the observation without a value
    Null,
    Value(f64),
}

impl Cell {
    pub fn value(&self) -> Option<f64> {
        match self {
            Cell::Value(v) => Some(*v),
            _ => None,
        }
    }
}

impl From<Option<f64>> for Cell {
    fn from(value: Option<f64>) -> Self {
        match value {
            Some(v) => Cell::Value(v),
            None => Cell::Null,
        }
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Missing => write!(f, ""),
            Cell::Null => write!(f, "null"),
            Cell::Value(v) => write!(f, "{}", v),
        }
    }
}

/// One row of the wide table.  `cells` follow the order of the configured
/// indicators.
#[derive(Debug, Clone, PartialEq)]
pub struct WideRow {
    pub country_code: String,
    pub country_name: Option<String>,
    pub year: i32,
    pub cells: Vec<Cell>,
}

impl WideRow {
    pub fn values(&self) -> Vec<Option<f64>> {
        self.cells.iter().map(|c| c.value()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cell_test() {
        assert_eq!(Cell::from(Some(1.5)), Cell::Value(1.5));
        assert_eq!(Cell::from(None), Cell::Null);
        assert_eq!(Cell::Null.value(), None);
        assert_eq!(Cell::Missing.value(), None);
        assert_eq!(Cell::default(), Cell::Missing);
    }

    #[test]
    fn record_json_test() -> Result<(), Box<dyn std::error::Error>> {
        let json = r#"{"country_code":"NGA","indicator_code":"SP.POP.TOTL","year":2020,"value":null}"#;
        let record: IndicatorRecord = serde_json::from_str(json)?;
        assert_eq!(record.value, None);
        assert_eq!(serde_json::to_string(&record)?, json);
        Ok(())
    }

    #[test]
    fn record_json_is_strict() {
        let extra = r#"{"country_code":"NGA","indicator_code":"SP.POP.TOTL","year":2020,"value":1.0,"unit":""}"#;
        assert!(serde_json::from_str::<IndicatorRecord>(extra).is_err());
        let no_year = r#"{"country_code":"NGA","indicator_code":"SP.POP.TOTL","value":1.0}"#;
        assert!(serde_json::from_str::<IndicatorRecord>(no_year).is_err());
    }
}
