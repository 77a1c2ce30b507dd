use std::time::Instant;

use pipeline_core::config::{IngestConfig, PipelineConfig};
use pipeline_core::contract::{
    content_fingerprint, normalize_json_payload, DatasetWrite, IngestResponse, SeriesSync,
    SyncStatus, JSON_CONTENT_TYPE, TEXT_CONTENT_TYPE,
};
use pipeline_core::dataset::{parse_population, parse_price_relative_series};
use pipeline_core::PipelineError;
use tracing::{error, info};

use crate::adapters::object_store::{DatasetStore, ObjectMetadata};
use crate::adapters::upstream::UpstreamSource;

/// Refreshes the price-relative series (when configured) and then writes a
/// new population version.
///
/// The population write comes last: it is the write that triggers the
/// report stage, which must see the refreshed series.
pub fn handle_ingest(
    pipeline: &PipelineConfig,
    ingest: &IngestConfig,
    upstream: &impl UpstreamSource,
    store: &impl DatasetStore,
) -> Result<IngestResponse, PipelineError> {
    let started_at = Instant::now();
    info!(
        component = "ingest_handler",
        event = "ingest_started",
        bucket = %pipeline.bucket,
        population_key = %pipeline.population_key,
        price_relative_enabled = ingest.price_relative_source_url.is_some(),
    );

    let result = run_ingest(pipeline, ingest, upstream, store);
    let duration_ms = started_at.elapsed().as_millis() as u64;

    match &result {
        Ok(response) => info!(
            component = "ingest_handler",
            event = "ingest_completed",
            population_version = %response.population.version_id,
            population_sha256 = %response.population.sha256,
            price_relative_status = ?response.price_relative.as_ref().map(|sync| sync.status),
            duration_ms,
        ),
        Err(failure) => error!(
            component = "ingest_handler",
            event = "ingest_failed",
            error_code = failure.code(),
            error = %failure,
            duration_ms,
        ),
    }
    result
}

fn run_ingest(
    pipeline: &PipelineConfig,
    ingest: &IngestConfig,
    upstream: &impl UpstreamSource,
    store: &impl DatasetStore,
) -> Result<IngestResponse, PipelineError> {
    let price_relative = match &ingest.price_relative_source_url {
        Some(url) => Some(sync_price_relative(pipeline, url, upstream, store)?),
        None => None,
    };

    let population = write_population(pipeline, &ingest.population_source_url, upstream, store)?;

    Ok(IngestResponse {
        status: "ok".to_string(),
        bucket: pipeline.bucket.clone(),
        population,
        price_relative,
    })
}

fn write_population(
    pipeline: &PipelineConfig,
    source_url: &str,
    upstream: &impl UpstreamSource,
    store: &impl DatasetStore,
) -> Result<DatasetWrite, PipelineError> {
    let raw = upstream.fetch(source_url)?;
    let normalized = normalize_json_payload(&raw, "population payload")?;
    let records = parse_population(&normalized)?;
    let sha256 = content_fingerprint(&normalized);

    let metadata = ObjectMetadata {
        content_type: JSON_CONTENT_TYPE.to_string(),
        sha256: sha256.clone(),
        source_url: Some(source_url.to_string()),
    };
    let version_id = store.put_object(&pipeline.population_key, &normalized, &metadata)?;

    info!(
        component = "ingest_handler",
        event = "population_written",
        key = %pipeline.population_key,
        version_id = %version_id,
        records = records.len(),
        bytes = normalized.len(),
    );

    Ok(DatasetWrite {
        key: pipeline.population_key.clone(),
        version_id,
        sha256,
        bytes: normalized.len(),
    })
}

fn sync_price_relative(
    pipeline: &PipelineConfig,
    source_url: &str,
    upstream: &impl UpstreamSource,
    store: &impl DatasetStore,
) -> Result<SeriesSync, PipelineError> {
    let raw = upstream.fetch(source_url)?;
    let observations = parse_price_relative_series(&raw)?;
    let sha256 = content_fingerprint(&raw);
    let key = &pipeline.price_relative_key;

    if store.object_fingerprint(key)?.as_deref() == Some(sha256.as_str()) {
        info!(
            component = "ingest_handler",
            event = "price_relative_unchanged",
            key = %key,
            sha256 = %sha256,
        );
        return Ok(SeriesSync {
            key: key.clone(),
            status: SyncStatus::Unchanged,
            sha256,
            version_id: None,
        });
    }

    let metadata = ObjectMetadata {
        content_type: TEXT_CONTENT_TYPE.to_string(),
        sha256: sha256.clone(),
        source_url: Some(source_url.to_string()),
    };
    let version_id = store.put_object(key, &raw, &metadata)?;
    info!(
        component = "ingest_handler",
        event = "price_relative_updated",
        key = %key,
        version_id = %version_id,
        observations = observations.len(),
    );

    Ok(SeriesSync {
        key: key.clone(),
        status: SyncStatus::Updated,
        sha256,
        version_id: Some(version_id),
    })
}
