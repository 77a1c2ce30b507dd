#![allow(dead_code)]

use pipeline_core::config::{IngestConfig, PipelineConfig};
use pipeline_core::contract::TEXT_CONTENT_TYPE;
use pipeline_core::delivery::DeliveryPolicy;
use pipeline_lambda::adapters::memory::{InMemoryDatasetStore, StaticUpstream};
use pipeline_lambda::adapters::object_store::DatasetStore;
use pipeline_lambda::local::LocalPipeline;
use serde_json::{json, Value};

pub const BUCKET: &str = "rearc-quest-test";
pub const POPULATION_URL: &str = "https://population.test/v2/country/USA/indicator/SP.POP.TOTL";
pub const SERIES_URL: &str = "https://series.test/pub/time.series/pr/pr.data.0.Current";
pub const VISIBILITY_TIMEOUT_MS: u64 = 30_000;

/// Price-relative file in the upstream layout: padded ids, a footnote column,
/// a non-quarterly period and a missing value.
pub const SERIES_FIXTURE: &str = "series_id                    \tyear\tperiod\t       value\tfootnote_codes\n\
PRS30006011                  \t2014\tQ01\t         1.0\t\n\
PRS30006011                  \t2014\tQ02\t         2.0\t\n\
PRS30006011                  \t2015\tQ01\t         5.0\t\n\
PRS30006012                  \t2016\tQ03\t         2.0\t\n\
PRS30006012                  \t2017\tQ01\t         2.0\t\n\
PRS30006032                  \t2013\tQ01\t         1.5\t\n\
PRS30006032                  \t2013\tQ02\t         0.5\t\n\
PRS30006032                  \t2014\tQ05\t         9.9\t\n\
PRS30006032                  \t2018\tQ01\t         1.9\t\n\
PRS30006032                  \t2019\tQ01\t           -\tR\n\
PRS30006032                  \t2020\tQ01\t        -0.8\t\n";

pub const POPULATION_ROWS: &[(i32, f64)] = &[
    (2019, 328.0),
    (2018, 326.0),
    (2017, 325.0),
    (2016, 323.0),
    (2015, 321.0),
    (2014, 318.0),
    (2013, 316.0),
    (2012, 310.0),
];

/// A population payload shaped like the World Bank indicator API response.
pub fn population_payload(rows: &[(i32, f64)]) -> String {
    let records: Vec<Value> = rows
        .iter()
        .map(|(year, population)| {
            json!({
                "indicator": { "id": "SP.POP.TOTL", "value": "Population, total" },
                "country": { "id": "US", "value": "United States" },
                "countryiso3code": "USA",
                "date": year.to_string(),
                "value": population,
                "unit": "",
                "obs_status": "",
                "decimal": 0
            })
        })
        .collect();
    json!([
        { "page": 1, "pages": 1, "per_page": 50, "total": rows.len() },
        records
    ])
    .to_string()
}

pub fn upstream_with(population_rows: &[(i32, f64)]) -> StaticUpstream {
    StaticUpstream::new()
        .with_response(POPULATION_URL, population_payload(population_rows))
        .with_response(SERIES_URL, SERIES_FIXTURE)
}

pub fn upstream() -> StaticUpstream {
    upstream_with(POPULATION_ROWS)
}

pub fn test_policy() -> DeliveryPolicy {
    DeliveryPolicy {
        visibility_timeout_ms: VISIBILITY_TIMEOUT_MS,
        max_receive_count: 3,
    }
}

pub fn pipeline_config() -> PipelineConfig {
    PipelineConfig::for_bucket(BUCKET)
}

/// A pipeline whose ingest only fetches population.
pub fn local_pipeline() -> LocalPipeline {
    LocalPipeline::new(pipeline_config(), ingest_config(false), test_policy())
}

/// A pipeline whose ingest also syncs the price-relative series.
pub fn syncing_pipeline() -> LocalPipeline {
    LocalPipeline::new(pipeline_config(), ingest_config(true), test_policy())
}

/// A population-only pipeline with the price-relative series already stored.
pub fn seeded_pipeline() -> LocalPipeline {
    let mut local = local_pipeline();
    let key = local.config().price_relative_key.clone();
    local
        .seed(&key, SERIES_FIXTURE.as_bytes(), TEXT_CONTENT_TYPE)
        .expect("series seed should be stored");
    local
}

fn ingest_config(sync_series: bool) -> IngestConfig {
    IngestConfig {
        population_source_url: POPULATION_URL.to_string(),
        price_relative_source_url: sync_series.then(|| SERIES_URL.to_string()),
        ..IngestConfig::default()
    }
}

pub fn stored_json(store: &InMemoryDatasetStore, key: &str, version_id: Option<&str>) -> Value {
    let bytes = store
        .get_object(key, version_id)
        .expect("object should be stored");
    serde_json::from_slice(&bytes).expect("stored object should be json")
}

pub fn assert_close(actual: &Value, expected: f64) {
    let actual = actual.as_f64().expect("value should be a number");
    assert!(
        (actual - expected).abs() < 1e-9,
        "expected {expected}, got {actual}"
    );
}
