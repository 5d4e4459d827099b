use std::{fmt, time::Duration};

use itertools::Itertools;
use log::{info, warn};
use reqwest::Client;

use crate::{
    config::PipelineConfig,
    db::indicator_archive::IndicatorArchive,
    error::{PipelineError, StageError},
    extract::{extract, make_client, Extraction},
    records::{IndicatorRecord, ValidatedRecordSet, WideRow},
    transform::transform,
    validate::validate,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Extract,
    Validate,
    Transform,
    Load,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Extract => "extract",
            Stage::Validate => "validate",
            Stage::Transform => "transform",
            Stage::Load => "load",
        };
        write!(f, "{}", name)
    }
}

/// Counts reported at the end of a run.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct RunSummary {
    pub extracted: usize,
    pub failed_pairs: usize,
    pub validated: usize,
    pub wide_rows: usize,
    pub upserted: usize,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "extracted {} records ({} failed series), {} valid, {} wide rows, {} upserted",
            self.extracted, self.failed_pairs, self.validated, self.wide_rows, self.upserted
        )
    }
}

/// Sequences the stages.  Stages invoked one at a time hand off their
/// records through the archive's landing file.
pub struct Pipeline {
    pub config: PipelineConfig,
    pub archive: IndicatorArchive,
    client: Client,
}

impl Pipeline {
    pub fn new(config: PipelineConfig, archive: IndicatorArchive) -> Result<Pipeline, PipelineError> {
        let client = make_client(&config)?;
        Ok(Pipeline::with_client(config, archive, client))
    }

    pub fn with_client(config: PipelineConfig, archive: IndicatorArchive, client: Client) -> Pipeline {
        Pipeline {
            config,
            archive,
            client,
        }
    }

    /// Fetch everything and write the landing file.  Countries with a failed
    /// series are left out of the landing file, see [`Pipeline::check_complete`].
    pub async fn extract(&self) -> Result<Extraction, StageError> {
        let mut extraction = extract(&self.client, &self.config)
            .await
            .map_err(|e| StageError::new(Stage::Extract, e))?;
        extraction.drop_incomplete_countries();
        self.archive
            .write_raw(&extraction.records)
            .map_err(|e| StageError::new(Stage::Extract, e))?;
        Ok(extraction)
    }

    /// Run the extract stage, trying again after `retry_delay_secs` if the
    /// failure was transient, at most `retries` more times.
    pub async fn extract_with_retry(&self) -> Result<Extraction, StageError> {
        let mut attempt = 0;
        loop {
            match self.extract().await {
                Ok(extraction) => return Ok(extraction),
                Err(e) if e.error.is_retryable() && attempt < self.config.retries => {
                    attempt += 1;
                    warn!(
                        "{}, retrying in {}s (attempt {} of {})",
                        e, self.config.retry_delay_secs, attempt, self.config.retries
                    );
                    tokio::time::sleep(Duration::from_secs(self.config.retry_delay_secs)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Check the landing file.
    pub fn validate(&self) -> Result<ValidatedRecordSet, StageError> {
        let records = self
            .archive
            .read_raw()
            .map_err(|e| StageError::new(Stage::Validate, e))?;
        self.validate_records(records)
    }

    /// Validate and pivot the landing file, without loading.
    pub fn transform(&self) -> Result<Vec<WideRow>, StageError> {
        let validated = self.validate()?;
        Ok(transform(&self.config, &validated))
    }

    /// Validate, pivot and upsert the landing file, then remove it.
    pub fn load(&self) -> Result<RunSummary, StageError> {
        let records = self
            .archive
            .read_raw()
            .map_err(|e| StageError::new(Stage::Load, e))?;
        let summary = self.process(records)?;
        self.archive.remove_raw();
        Ok(summary)
    }

    /// Validate, pivot and upsert records already in memory.  Nothing is
    /// written if any record is invalid.
    pub fn process(&self, records: Vec<IndicatorRecord>) -> Result<RunSummary, StageError> {
        let extracted = records.len();
        let validated = self.validate_records(records)?;
        let rows = transform(&self.config, &validated);
        let upserted = self
            .archive
            .update_duckdb(&self.config, &rows)
            .map_err(|e| StageError::new(Stage::Load, e))?;
        Ok(RunSummary {
            extracted,
            failed_pairs: 0,
            validated: validated.len(),
            wide_rows: rows.len(),
            upserted,
        })
    }

    /// All the stages, in order.  If some series failed, the other countries
    /// are still loaded but the run ends with an error.
    pub async fn run(&self) -> Result<RunSummary, StageError> {
        info!("starting pipeline {}", self.config.pipeline_name);
        let extraction = self.extract_with_retry().await?;
        let mut summary = self.load()?;
        summary.failed_pairs = extraction.failures.len();
        info!("pipeline {} done: {}", self.config.pipeline_name, summary);
        Pipeline::check_complete(&extraction)?;
        Ok(summary)
    }

    /// An error naming the failed series, if there are any.
    pub fn check_complete(extraction: &Extraction) -> Result<(), StageError> {
        if extraction.failures.is_empty() {
            return Ok(());
        }
        let countries = extraction
            .failures
            .iter()
            .map(|f| f.country_code.clone())
            .unique()
            .collect();
        Err(StageError::new(
            Stage::Extract,
            PipelineError::Incomplete {
                series: extraction.failed_series(),
                countries,
            },
        ))
    }

    fn validate_records(&self, records: Vec<IndicatorRecord>) -> Result<ValidatedRecordSet, StageError> {
        validate(&self.config, records).map_err(|e| StageError::new(Stage::Validate, e))
    }
}
