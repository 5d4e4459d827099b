use std::{pin::pin, time::Duration};

use futures::{stream, FutureExt, StreamExt};
use itertools::Itertools;
use log::{debug, error, info, warn};
use reqwest::{Client, StatusCode};
use serde_json::Value;

use crate::{
    config::{Country, FailurePolicy, Indicator, PipelineConfig},
    error::ExtractError,
    records::IndicatorRecord,
};

/// A (country, indicator) pair that could not be fetched.
#[derive(Debug)]
pub struct PairFailure {
    pub country_code: String,
    pub indicator_code: String,
    pub error: ExtractError,
}

#[derive(Debug, Default)]
pub struct Extraction {
    pub records: Vec<IndicatorRecord>,
    /// Only populated with [`FailurePolicy::Continue`]
    pub failures: Vec<PairFailure>,
}

impl Extraction {
    /// Remove the records of every country with a failed series, so that a
    /// full-row upsert can't overwrite stored values with NULL.  Returns the
    /// dropped countries.
    pub fn drop_incomplete_countries(&mut self) -> Vec<String> {
        let countries = self
            .failures
            .iter()
            .map(|f| f.country_code.clone())
            .unique()
            .collect::<Vec<_>>();
        if countries.is_empty() {
            return countries;
        }
        let before = self.records.len();
        self.records.retain(|r| !countries.contains(&r.country_code));
        warn!(
            "dropped {} records of {} because some of their series failed",
            before - self.records.len(),
            countries.join(", ")
        );
        countries
    }

    /// The failed series as "country/indicator".
    pub fn failed_series(&self) -> Vec<String> {
        self.failures
            .iter()
            .map(|f| format!("{}/{}", f.country_code, f.indicator_code))
            .collect()
    }
}

/// One page of an API response.
#[derive(Debug, PartialEq)]
pub struct Page {
    pub page: u32,
    pub pages: u32,
    pub records: Vec<IndicatorRecord>,
}

pub fn make_client(config: &PipelineConfig) -> Result<Client, reqwest::Error> {
    Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()
}

/// Fetch all the configured (country, indicator) pairs, at most
/// `max_concurrency` at a time.  Records come back in pair order
/// (countries, then indicators, as configured), pages in the order received.
pub async fn extract(client: &Client, config: &PipelineConfig) -> Result<Extraction, ExtractError> {
    let pairs = config
        .countries
        .iter()
        .cartesian_product(config.indicators.iter())
        .collect::<Vec<_>>();
    info!(
        "extracting {} indicators for {} countries, {}-{} ({} series)",
        config.indicators.len(),
        config.countries.len(),
        config.start_year,
        config.end_year,
        pairs.len()
    );

    let mut results = pin!(stream::iter(pairs)
        .map(|(country, indicator)| {
            fetch_pair(client, config, country, indicator)
                .map(move |res| (country, indicator, res))
        })
        .buffered(config.max_concurrency));

    let mut extraction = Extraction::default();
    let mut first_error: Option<ExtractError> = None;
    let mut succeeded = 0;
    while let Some((country, indicator, res)) = results.next().await {
        match res {
            Ok(records) => {
                succeeded += 1;
                extraction.records.extend(records);
            }
            Err(e) => match config.failure_policy {
                FailurePolicy::Abort => return Err(e),
                FailurePolicy::Continue => {
                    error!("{}", e);
                    if first_error.is_none() {
                        first_error = Some(e.clone());
                    }
                    extraction.failures.push(PairFailure {
                        country_code: country.code.clone(),
                        indicator_code: indicator.code.clone(),
                        error: e,
                    });
                }
            },
        }
    }

    if succeeded == 0 {
        if let Some(e) = first_error {
            return Err(e);
        }
    }
    if !extraction.failures.is_empty() {
        warn!(
            "{} of {} series failed: {}",
            extraction.failures.len(),
            extraction.failures.len() + succeeded,
            extraction.failed_series().join(", ")
        );
    }
    if extraction.records.is_empty() {
        warn!("no data was returned by the api");
    }
    info!("extracted {} records", extraction.records.len());
    Ok(extraction)
}

pub fn page_url(config: &PipelineConfig, country_code: &str, indicator_code: &str, page: u32) -> String {
    format!(
        "{}/country/{}/indicator/{}?format=json&date={}:{}&per_page={}&page={}",
        config.api_base_url.trim_end_matches('/'),
        country_code,
        indicator_code,
        config.start_year,
        config.end_year,
        config.per_page,
        page
    )
}

/// Get all the pages for one (country, indicator) pair.
pub async fn fetch_pair(
    client: &Client,
    config: &PipelineConfig,
    country: &Country,
    indicator: &Indicator,
) -> Result<Vec<IndicatorRecord>, ExtractError> {
    let context = format!("{}/{}", country.code, indicator.code);
    let mut records = Vec::new();
    let mut page = 1;
    loop {
        if config.request_delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(config.request_delay_ms)).await;
        }
        let url = page_url(config, &country.code, &indicator.code, page);
        debug!("GET {}", url);
        let body = fetch_page(client, &url, &context).await?;
        let parsed = parse_page(&body, &context)?;
        if parsed.pages > 0 && parsed.page != page {
            return Err(ExtractError::MalformedResponse {
                context,
                message: format!("asked for page {}, got page {}", page, parsed.page),
            });
        }
        records.extend(parsed.records);
        if parsed.page >= parsed.pages {
            break;
        }
        page += 1;
    }
    debug!("{}: {} records in {} page(s)", context, records.len(), page);
    Ok(records)
}

async fn fetch_page(client: &Client, url: &str, context: &str) -> Result<String, ExtractError> {
    let transient = |message: String| ExtractError::TransientFetch {
        context: context.to_string(),
        message,
    };
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| transient(e.to_string()))?;

    let status = response.status();
    if status != StatusCode::OK {
        let message = format!("HTTP status {}", status);
        return Err(if is_transient_status(status) {
            transient(message)
        } else {
            ExtractError::MalformedResponse {
                context: context.to_string(),
                message,
            }
        });
    }
    response.text().await.map_err(|e| transient(e.to_string()))
}

/// Server errors and throttling go away on their own, the rest don't.
pub fn is_transient_status(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
}

/// Parse one page of the API response.  The API returns `[metadata, data]`
/// where `data` is `null` when there are no observations, or a single
/// `[{"message": [...]}]` element on error.
pub fn parse_page(body: &str, context: &str) -> Result<Page, ExtractError> {
    let malformed = |message: String| ExtractError::MalformedResponse {
        context: context.to_string(),
        message,
    };

    let json: Value =
        serde_json::from_str(body).map_err(|e| malformed(format!("invalid json: {}", e)))?;
    let parts = json
        .as_array()
        .ok_or_else(|| malformed("expected a json array".into()))?;
    let meta = parts
        .first()
        .ok_or_else(|| malformed("empty response".into()))?;
    if let Some(message) = meta.get("message") {
        return Err(malformed(format!("api error: {}", message)));
    }
    if parts.len() != 2 {
        return Err(malformed(format!(
            "expected [metadata, data], got {} elements",
            parts.len()
        )));
    }
    let page = as_u32(meta.get("page")).ok_or_else(|| malformed("missing page number".into()))?;
    let pages =
        as_u32(meta.get("pages")).ok_or_else(|| malformed("missing page count".into()))?;

    let records = match &parts[1] {
        Value::Null => Vec::new(),
        Value::Array(items) => items
            .iter()
            .enumerate()
            .map(|(i, item)| {
                parse_observation(item).map_err(|m| malformed(format!("observation {}: {}", i, m)))
            })
            .collect::<Result<Vec<_>, _>>()?,
        other => return Err(malformed(format!("unexpected data element {}", other))),
    };

    Ok(Page {
        page,
        pages,
        records,
    })
}

/// The API is not consistent, sometimes numbers come as strings.
fn as_u32(value: Option<&Value>) -> Option<u32> {
    match value? {
        Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn text(value: Option<&Value>) -> &str {
    value.and_then(Value::as_str).map(str::trim).unwrap_or("")
}

fn parse_observation(item: &Value) -> Result<IndicatorRecord, String> {
    let mut country_code = text(item.get("countryiso3code"));
    if country_code.is_empty() {
        country_code = text(item.pointer("/country/id"));
    }
    let indicator_code = text(item.pointer("/indicator/id"));
    let date = text(item.get("date"));
    let year = date
        .parse::<i32>()
        .map_err(|_| format!("date '{}' is not a year", date))?;
    let value = match item.get("value") {
        None | Some(Value::Null) => None,
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) if s.trim().is_empty() => None,
        Some(Value::String(s)) => Some(
            s.trim()
                .parse::<f64>()
                .map_err(|_| format!("value '{}' is not numeric", s))?,
        ),
        Some(other) => return Err(format!("value {} is not numeric", other)),
    };

    Ok(IndicatorRecord {
        country_code: country_code.to_string(),
        indicator_code: indicator_code.to_string(),
        year,
        value,
    })
}
