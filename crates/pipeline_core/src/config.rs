//! Deploy-time configuration, resolved once per invocation from
//! environment-style key/value pairs and passed to each stage explicitly.

use std::time::Duration;

use thiserror::Error;

use crate::notification::{
    NotificationFilter, DEFAULT_NOTIFICATION_PREFIX, DEFAULT_NOTIFICATION_SUFFIX,
};
use crate::storage_keys::{
    report_object_key, DEFAULT_POPULATION_KEY, DEFAULT_PRICE_RELATIVE_KEY,
    DEFAULT_RESULTS_PREFIX,
};

pub const DEFAULT_SERIES_ID: &str = "PRS30006032";
pub const DEFAULT_PERIOD: &str = "Q01";
pub const DEFAULT_POPULATION_SOURCE_URL: &str =
    "https://api.worldbank.org/v2/country/USA/indicator/SP.POP.TOTL?format=json";
pub const DEFAULT_PRICE_RELATIVE_SOURCE_URL: &str =
    "https://download.bls.gov/pub/time.series/pr/pr.data.0.Current";
pub const DEFAULT_USER_AGENT: &str = "population-report-pipeline/0.1";
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_INGEST_BUDGET_SECS: u64 = 540;
pub const DEFAULT_REPORT_BUDGET_SECS: u64 = 270;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ConfigError {
    message: String,
}

impl ConfigError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Settings shared by both stages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    pub bucket: String,
    pub population_key: String,
    pub price_relative_key: String,
    pub series_id: String,
    pub period: String,
    pub results_prefix: String,
    pub notification_filter: NotificationFilter,
}

impl PipelineConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let bucket = optional(&lookup, "S3_BUCKET")
            .ok_or_else(|| ConfigError::new("S3_BUCKET must be configured"))?;

        let config = Self {
            bucket,
            population_key: optional(&lookup, "POP_S3_KEY")
                .unwrap_or_else(|| DEFAULT_POPULATION_KEY.to_string()),
            price_relative_key: optional(&lookup, "PR_CURRENT_KEY")
                .unwrap_or_else(|| DEFAULT_PRICE_RELATIVE_KEY.to_string()),
            series_id: optional(&lookup, "SERIES_ID")
                .unwrap_or_else(|| DEFAULT_SERIES_ID.to_string()),
            period: optional(&lookup, "PERIOD").unwrap_or_else(|| DEFAULT_PERIOD.to_string()),
            results_prefix: optional(&lookup, "REPORT_RESULTS_PREFIX")
                .unwrap_or_else(|| DEFAULT_RESULTS_PREFIX.to_string()),
            notification_filter: NotificationFilter::new(
                optional(&lookup, "NOTIFICATION_PREFIX")
                    .unwrap_or_else(|| DEFAULT_NOTIFICATION_PREFIX.to_string()),
                optional(&lookup, "NOTIFICATION_SUFFIX")
                    .unwrap_or_else(|| DEFAULT_NOTIFICATION_SUFFIX.to_string()),
            ),
        };
        config.validate()?;
        Ok(config)
    }

    /// Defaults for everything but the bucket.
    pub fn for_bucket(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            population_key: DEFAULT_POPULATION_KEY.to_string(),
            price_relative_key: DEFAULT_PRICE_RELATIVE_KEY.to_string(),
            series_id: DEFAULT_SERIES_ID.to_string(),
            period: DEFAULT_PERIOD.to_string(),
            results_prefix: DEFAULT_RESULTS_PREFIX.to_string(),
            notification_filter: NotificationFilter::default(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bucket.trim().is_empty() {
            return Err(ConfigError::new("S3_BUCKET cannot be empty"));
        }
        if self.series_id.trim().is_empty() || self.period.trim().is_empty() {
            return Err(ConfigError::new("SERIES_ID and PERIOD cannot be empty"));
        }
        if self.population_key == self.price_relative_key {
            return Err(ConfigError::new(
                "POP_S3_KEY and PR_CURRENT_KEY must name different objects",
            ));
        }
        if !self.notification_filter.matches(&self.population_key) {
            return Err(ConfigError::new(format!(
                "POP_S3_KEY '{}' does not match the notification filter (prefix '{}', suffix '{}')",
                self.population_key,
                self.notification_filter.prefix,
                self.notification_filter.suffix
            )));
        }

        // Report writes must never re-trigger the report stage.
        let sample_report_key =
            report_object_key(&self.results_prefix, &self.series_id, &self.period, None);
        if self.notification_filter.matches(&sample_report_key) {
            return Err(ConfigError::new(format!(
                "REPORT_RESULTS_PREFIX '{}' produces keys matching the notification filter",
                self.results_prefix
            )));
        }
        Ok(())
    }

    pub fn report_key(&self, source_version: Option<&str>) -> String {
        report_object_key(
            &self.results_prefix,
            &self.series_id,
            &self.period,
            source_version,
        )
    }
}

/// Upstream sources for the ingest stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestConfig {
    pub population_source_url: String,
    /// `None` disables the price-relative sync.
    pub price_relative_source_url: Option<String>,
    pub user_agent: String,
    pub fetch_timeout: Duration,
}

impl IngestConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        // Unset falls back to the default source; set-but-empty disables the sync.
        let price_relative_source_url = match lookup("PR_SOURCE_URL") {
            None => Some(DEFAULT_PRICE_RELATIVE_SOURCE_URL.to_string()),
            Some(value) if value.trim().is_empty() => None,
            Some(value) => Some(value.trim().to_string()),
        };

        Ok(Self {
            population_source_url: optional(&lookup, "POP_API_URL")
                .unwrap_or_else(|| DEFAULT_POPULATION_SOURCE_URL.to_string()),
            price_relative_source_url,
            user_agent: optional(&lookup, "USER_AGENT")
                .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string()),
            fetch_timeout: Duration::from_secs(parse_secs(
                &lookup,
                "FETCH_TIMEOUT_SECS",
                DEFAULT_FETCH_TIMEOUT_SECS,
            )?),
        })
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            population_source_url: DEFAULT_POPULATION_SOURCE_URL.to_string(),
            price_relative_source_url: Some(DEFAULT_PRICE_RELATIVE_SOURCE_URL.to_string()),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            fetch_timeout: Duration::from_secs(DEFAULT_FETCH_TIMEOUT_SECS),
        }
    }
}

/// Wall-clock budget for one invocation, from `INVOCATION_BUDGET_SECS`.
pub fn invocation_budget(
    lookup: impl Fn(&str) -> Option<String>,
    default_secs: u64,
) -> Result<Duration, ConfigError> {
    parse_secs(&lookup, "INVOCATION_BUDGET_SECS", default_secs).map(Duration::from_secs)
}

fn optional(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    lookup(name)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_secs(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    default_secs: u64,
) -> Result<u64, ConfigError> {
    match optional(lookup, name) {
        None => Ok(default_secs),
        Some(raw) => match raw.parse::<u64>() {
            Ok(0) | Err(_) => Err(ConfigError::new(format!(
                "{name} must be a positive integer, got '{raw}'"
            ))),
            Ok(value) => Ok(value),
        },
    }
}
