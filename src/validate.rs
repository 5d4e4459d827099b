use std::collections::{HashMap, HashSet};

use log::{error, info};
use regex::Regex;

use crate::{
    config::PipelineConfig,
    error::{Field, SchemaViolationError, Violation},
    records::{IndicatorRecord, ValidatedRecordSet},
};

/// Check every record against the configured schema.  All violations are
/// collected, and a single one rejects the whole batch.
pub fn validate(
    config: &PipelineConfig,
    records: Vec<IndicatorRecord>,
) -> Result<ValidatedRecordSet, SchemaViolationError> {
    let iso3 = Regex::new(r"^[A-Z]{3}$").unwrap();
    let countries = config
        .countries
        .iter()
        .map(|c| c.code.as_str())
        .collect::<HashSet<_>>();
    let indicators = config
        .indicators
        .iter()
        .map(|e| (e.code.as_str(), e))
        .collect::<HashMap<_, _>>();

    let mut violations: Vec<Violation> = Vec::new();
    let mut seen: HashMap<(&str, &str, i32), usize> = HashMap::new();

    for (row, record) in records.iter().enumerate() {
        let mut flag = |field: Field, value: String, reason: String| {
            violations.push(Violation {
                row,
                field,
                value,
                reason,
            })
        };

        let code = record.country_code.as_str();
        if code.is_empty() {
            flag(Field::CountryCode, String::new(), "is required".into());
        } else if !iso3.is_match(code) {
            flag(
                Field::CountryCode,
                code.to_string(),
                "is not an ISO alpha-3 code".into(),
            );
        } else if !countries.contains(code) {
            flag(
                Field::CountryCode,
                code.to_string(),
                "is not a configured country".into(),
            );
        }

        let indicator = indicators.get(record.indicator_code.as_str());
        if record.indicator_code.is_empty() {
            flag(Field::IndicatorCode, String::new(), "is required".into());
        } else if indicator.is_none() {
            flag(
                Field::IndicatorCode,
                record.indicator_code.clone(),
                "is not a configured indicator".into(),
            );
        }

        if record.year < config.start_year || record.year > config.end_year {
            flag(
                Field::Year,
                record.year.to_string(),
                format!("is outside [{}, {}]", config.start_year, config.end_year),
            );
        }

        if let Some(value) = record.value {
            if !value.is_finite() {
                flag(Field::Value, value.to_string(), "is not a finite number".into());
            } else if value < 0.0 && indicator.is_some_and(|e| e.non_negative) {
                flag(
                    Field::Value,
                    value.to_string(),
                    format!("is negative for {}", record.indicator_code),
                );
            }
        }

        let key = (code, record.indicator_code.as_str(), record.year);
        if let Some(first) = seen.get(&key) {
            flag(
                Field::Year,
                record.year.to_string(),
                format!(
                    "duplicates row {} for {}/{}",
                    first, record.country_code, record.indicator_code
                ),
            );
        } else {
            seen.insert(key, row);
        }
    }

    if !violations.is_empty() {
        error!(
            "validation failed, {} violation(s) in {} records",
            violations.len(),
            records.len()
        );
        for v in &violations {
            error!("  {}", v);
        }
        return Err(SchemaViolationError { violations });
    }

    info!("validated {} records", records.len());
    Ok(ValidatedRecordSet::new(records))
}
