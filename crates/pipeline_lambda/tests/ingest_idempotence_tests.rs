mod support;

use pipeline_core::contract::{content_fingerprint, SyncStatus, JSON_CONTENT_TYPE};
use pipeline_core::dataset::parse_population;
use support::{local_pipeline, population_payload, syncing_pipeline, upstream, POPULATION_ROWS};

#[test]
fn ingested_population_round_trips_through_storage() {
    let mut local = local_pipeline();
    let ingest = local.run_ingest(&upstream()).expect("ingest should succeed");

    let versions = local.store().versions(&ingest.population.key);
    assert_eq!(versions.len(), 1);
    let stored = &versions[0];
    assert_eq!(stored.metadata.content_type, JSON_CONTENT_TYPE);
    assert_eq!(stored.metadata.sha256, content_fingerprint(&stored.body));
    assert_eq!(stored.metadata.sha256, ingest.population.sha256);
    assert_eq!(
        stored.metadata.source_url.as_deref(),
        Some(support::POPULATION_URL)
    );

    let upstream_records = parse_population(population_payload(POPULATION_ROWS).as_bytes())
        .expect("fixture should parse");
    let stored_records = parse_population(&stored.body).expect("stored object should parse");
    assert_eq!(stored_records, upstream_records);
}

#[test]
fn double_ingest_writes_two_identical_versions() {
    let mut local = local_pipeline();
    let upstream = upstream();

    let first = local.run_ingest(&upstream).expect("first ingest should succeed");
    let second = local.run_ingest(&upstream).expect("second ingest should succeed");

    assert_ne!(first.population.version_id, second.population.version_id);
    assert_eq!(first.population.sha256, second.population.sha256);

    let versions = local.store().versions(&first.population.key);
    assert_eq!(versions.len(), 2);
    assert_eq!(versions[0].body, versions[1].body);
    assert_eq!(local.queue().len(), 2, "every write notifies");
}

#[test]
fn unchanged_series_is_not_rewritten() {
    let mut local = syncing_pipeline();
    let upstream = upstream();

    let first = local.run_ingest(&upstream).expect("first ingest should succeed");
    let second = local.run_ingest(&upstream).expect("second ingest should succeed");

    let first_sync = first.price_relative.expect("first sync");
    let second_sync = second.price_relative.expect("second sync");
    assert_eq!(first_sync.status, SyncStatus::Updated);
    assert_eq!(second_sync.status, SyncStatus::Unchanged);
    assert_eq!(local.store().versions(&first_sync.key).len(), 1);
}
