use std::{fmt, path::PathBuf};

use itertools::Itertools;
use thiserror::Error;

use crate::pipeline::Stage;

#[derive(Error, Debug, Clone)]
pub enum ExtractError {
    /// Network failure, timeout or a server side error.  Safe to retry.
    #[error("transient fetch error for {context}: {message}")]
    TransientFetch { context: String, message: String },

    /// The API answered with something we don't understand.  Needs a human.
    #[error("malformed response for {context}: {message}")]
    MalformedResponse { context: String, message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    CountryCode,
    IndicatorCode,
    Year,
    Value,
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Field::CountryCode => write!(f, "country_code"),
            Field::IndicatorCode => write!(f, "indicator_code"),
            Field::Year => write!(f, "year"),
            Field::Value => write!(f, "value"),
        }
    }
}

/// One failed check, with enough detail to diagnose without re-extracting.
#[derive(Debug, Clone, PartialEq)]
pub struct Violation {
    pub row: usize,
    pub field: Field,
    pub value: String,
    pub reason: String,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "row {}: {} = '{}' {}",
            self.row, self.field, self.value, self.reason
        )
    }
}

#[derive(Error, Debug)]
#[error("{} schema violation(s): {}", .violations.len(), summarize(.violations))]
pub struct SchemaViolationError {
    pub violations: Vec<Violation>,
}

fn summarize(violations: &[Violation]) -> String {
    let mut out = violations.iter().take(5).join("; ");
    if violations.len() > 5 {
        out.push_str(&format!("; ... and {} more", violations.len() - 5));
    }
    out
}

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("duckdb error: {0}")]
    Db(#[from] duckdb::Error),

    #[error("table {table} is missing configured columns: {}", .missing.join(", "))]
    SchemaDrift { table: String, missing: Vec<String> },

    #[error("invalid SQL identifier: {0}")]
    InvalidIdentifier(String),

    #[error("failed to prepare database directory: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),

    #[error("missing environment variable {0}")]
    MissingVar(String),
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Extract(#[from] ExtractError),

    #[error(transparent)]
    Validation(#[from] SchemaViolationError),

    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(
        "{} series failed ({}), rows of {} were not loaded",
        .series.len(),
        .series.join(", "),
        .countries.join(", ")
    )]
    Incomplete {
        series: Vec<String>,
        countries: Vec<String>,
    },

    #[error("landing file {path}: {message}")]
    Landing { path: PathBuf, message: String },

    #[error("failed to build http client: {0}")]
    Client(#[from] reqwest::Error),
}

impl PipelineError {
    /// Only network hiccups are worth another attempt.  Everything else fails
    /// the same way the second time around.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PipelineError::Extract(ExtractError::TransientFetch { .. }))
    }
}

/// A pipeline error tagged with the stage that produced it.
#[derive(Error, Debug)]
#[error("stage {stage} failed: {error}")]
pub struct StageError {
    pub stage: Stage,
    #[source]
    pub error: PipelineError,
}

impl StageError {
    pub fn new(stage: Stage, error: impl Into<PipelineError>) -> Self {
        StageError {
            stage,
            error: error.into(),
        }
    }
}
