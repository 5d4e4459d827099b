use std::{collections::HashSet, env, fs, path::Path};

use log::info;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub const WORLD_BANK_API: &str = "https://api.worldbank.org/v2";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Country {
    /// ISO 3166 alpha-3 code, e.g. "NGA"
    pub code: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Indicator {
    /// Source identifier, e.g. "AG.LND.AGRI.ZS"
    pub code: String,
    pub description: String,
    /// Column name in the wide table
    pub column: String,
    /// Reject negative values for this indicator
    #[serde(default)]
    pub non_negative: bool,
}

/// What to do when one (country, indicator) pair can't be fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Fail the extract stage on the first error.
    #[default]
    Abort,
    /// Keep going, report the failed pairs at the end.
    Continue,
}

/// Everything a run needs to know.  Loaded once, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub pipeline_name: String,
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    pub countries: Vec<Country>,
    pub indicators: Vec<Indicator>,
    pub start_year: i32,
    pub end_year: i32,
    pub table_name: String,
    #[serde(default = "default_per_page")]
    pub per_page: u32,
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub request_delay_ms: u64,
    #[serde(default)]
    pub failure_policy: FailurePolicy,
    #[serde(default = "default_retries")]
    pub retries: u32,
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,
}

fn default_api_base_url() -> String {
    WORLD_BANK_API.to_string()
}

fn default_per_page() -> u32 {
    1000
}

fn default_max_concurrency() -> usize {
    4
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_retries() -> u32 {
    2
}

fn default_retry_delay_secs() -> u64 {
    60
}

/// True if `s` can be spliced into SQL as an unquoted identifier.
pub fn is_sql_identifier(s: &str) -> bool {
    let re = Regex::new(r"^[a-z_][a-z0-9_]*$").unwrap();
    re.is_match(s)
}

impl PipelineConfig {
    /// ECOWAS member states with agriculture, trade and population indicators.
    pub fn ecowas() -> PipelineConfig {
        let countries = [
            ("BEN", "Benin"),
            ("BFA", "Burkina Faso"),
            ("CPV", "Cape Verde"),
            ("CIV", "Côte d'Ivoire"),
            ("GMB", "The Gambia"),
            ("GHA", "Ghana"),
            ("GIN", "Guinea"),
            ("GNB", "Guinea-Bissau"),
            ("LBR", "Liberia"),
            ("MLI", "Mali"),
            ("NER", "Niger"),
            ("NGA", "Nigeria"),
            ("SEN", "Senegal"),
            ("SLE", "Sierra Leone"),
            ("TGO", "Togo"),
        ]
        .into_iter()
        .map(|(code, name)| Country {
            code: code.to_string(),
            name: name.to_string(),
        })
        .collect();

        let indicators = [
            // agriculture & food supply
            ("AG.PRD.FOOD.XD", "Food production index", "food_production_idx", false),
            ("AG.YLD.CREL.KG", "Cereal yield (kg per hectare)", "cereal_yield_kg_per_hectare", true),
            ("AG.PRD.CROP.XD", "Crop production index", "crop_production_idx", false),
            ("AG.LND.AGRI.ZS", "Agricultural land (% of land area)", "agricultural_land_pct", true),
            // economic access & trade
            ("NY.GDP.PCAP.CD", "GDP per capita (current US$)", "gdp_per_capita_usd", true),
            ("FP.CPI.TOTL", "Consumer Price Index (2010 = 100)", "food_cpi_2010_base_100", true),
            ("TM.VAL.FOOD.ZS.UN", "Food imports (% of merchandise imports)", "food_imports_pct_merch", true),
            ("TX.VAL.FOOD.ZS.UN", "Food exports (% of merchandise exports)", "food_exports_pct_merch", true),
            // population
            ("SP.POP.TOTL", "Total population", "population_total", true),
            ("SP.URB.TOTL.IN.ZS", "Urban population (% of total)", "population_urban_pct", true),
            ("SP.POP.GROW", "Population growth (annual %)", "population_growth_annual_pct", false),
        ]
        .into_iter()
        .map(|(code, description, column, non_negative)| Indicator {
            code: code.to_string(),
            description: description.to_string(),
            column: column.to_string(),
            non_negative,
        })
        .collect();

        PipelineConfig {
            pipeline_name: "west_african_agri_metrics".to_string(),
            api_base_url: default_api_base_url(),
            countries,
            indicators,
            start_year: 1999,
            end_year: 2022,
            table_name: "west_african_agri_metrics_wide".to_string(),
            per_page: default_per_page(),
            max_concurrency: default_max_concurrency(),
            timeout_secs: default_timeout_secs(),
            request_delay_ms: 500,
            failure_policy: FailurePolicy::Abort,
            retries: default_retries(),
            retry_delay_secs: default_retry_delay_secs(),
        }
    }

    /// Read a registry from a json file.  Fails if it doesn't pass [`validate`].
    ///
    /// [`validate`]: PipelineConfig::validate
    pub fn from_file(path: &Path) -> Result<PipelineConfig, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: PipelineConfig =
            serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        config.validate()?;
        info!(
            "loaded config {} from {} ({} countries, {} indicators)",
            config.pipeline_name,
            path.display(),
            config.countries.len(),
            config.indicators.len()
        );
        Ok(config)
    }

    /// Use the file given explicitly, then `CONFIG_FILE`, then the built-in registry.
    pub fn load(path: Option<&Path>) -> Result<PipelineConfig, ConfigError> {
        match path {
            Some(path) => PipelineConfig::from_file(path),
            None => match env::var("CONFIG_FILE") {
                Ok(file) => PipelineConfig::from_file(Path::new(&file)),
                Err(_) => {
                    let config = PipelineConfig::ecowas();
                    config.validate()?;
                    Ok(config)
                }
            },
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.countries.is_empty() {
            return Err(ConfigError::Invalid("no countries configured".into()));
        }
        if self.indicators.is_empty() {
            return Err(ConfigError::Invalid("no indicators configured".into()));
        }
        if self.start_year > self.end_year {
            return Err(ConfigError::Invalid(format!(
                "start_year {} is after end_year {}",
                self.start_year, self.end_year
            )));
        }
        if self.per_page == 0 || self.max_concurrency == 0 {
            return Err(ConfigError::Invalid(
                "per_page and max_concurrency must be positive".into(),
            ));
        }
        if !is_sql_identifier(&self.table_name) {
            return Err(ConfigError::Invalid(format!(
                "table name '{}' is not a valid identifier",
                self.table_name
            )));
        }

        let mut codes = HashSet::new();
        for country in &self.countries {
            if !codes.insert(country.code.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate country {}",
                    country.code
                )));
            }
        }

        let reserved = ["country_code", "country_name", "year"];
        let mut codes = HashSet::new();
        let mut columns = HashSet::new();
        for indicator in &self.indicators {
            if !codes.insert(indicator.code.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate indicator {}",
                    indicator.code
                )));
            }
            if !is_sql_identifier(&indicator.column) || reserved.contains(&indicator.column.as_str())
            {
                return Err(ConfigError::Invalid(format!(
                    "column '{}' for indicator {} is not usable",
                    indicator.column, indicator.code
                )));
            }
            if !columns.insert(indicator.column.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate column {}",
                    indicator.column
                )));
            }
        }
        Ok(())
    }

    pub fn country(&self, code: &str) -> Option<&Country> {
        self.countries.iter().find(|c| c.code == code)
    }

    /// Position of the indicator in the configured order, which is also the
    /// column order of the wide table.
    pub fn indicator_index(&self, code: &str) -> Option<usize> {
        self.indicators.iter().position(|e| e.code == code)
    }

    pub fn columns(&self) -> Vec<&str> {
        self.indicators.iter().map(|e| e.column.as_str()).collect()
    }
}

/// Sender, credential and recipient for failure alerts.
#[derive(Debug, Clone)]
pub struct AlertSettings {
    pub sender: String,
    pub credential: String,
    pub recipient: String,
    pub api_url: String,
}

pub const MAILTRAP_API: &str = "https://send.api.mailtrap.io/api/send";

impl AlertSettings {
    /// Read `EMAIL_FROM`, `MAILTRAP_API_KEY` and `EMAIL_TO`.
    pub fn from_env() -> Result<AlertSettings, ConfigError> {
        let var = |name: &str| env::var(name).map_err(|_| ConfigError::MissingVar(name.into()));
        Ok(AlertSettings {
            sender: var("EMAIL_FROM")?,
            credential: var("MAILTRAP_API_KEY")?,
            recipient: var("EMAIL_TO")?,
            api_url: env::var("MAILTRAP_API_URL").unwrap_or_else(|_| MAILTRAP_API.to_string()),
        })
    }
}
