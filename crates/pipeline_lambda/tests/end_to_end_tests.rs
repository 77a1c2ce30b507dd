mod support;

use pipeline_core::delivery::DeliveryOutcome;
use serde_json::Value;
use support::{assert_close, seeded_pipeline, stored_json, syncing_pipeline, upstream};

#[test]
fn one_ingest_produces_one_report_matching_the_hand_computed_result() {
    let mut local = seeded_pipeline();
    assert!(local.queue().is_empty(), "seeding the series must not notify");

    let ingest = local.run_ingest(&upstream()).expect("ingest should succeed");
    assert_eq!(local.queue().len(), 1, "exactly one notification expected");

    let outcomes = local.drain().expect("drain should finish");
    assert_eq!(outcomes.len(), 1);
    let response = match &outcomes[0] {
        DeliveryOutcome::Completed { output, .. } => output,
        other => panic!("expected a completed delivery, got {other:?}"),
    };
    assert!(local.queue().is_empty());
    assert!(local.queue().dead_letters().is_empty());

    assert_eq!(response.reports.len(), 1);
    let write = &response.reports[0];
    assert_eq!(write.source_key, ingest.population.key);
    assert_eq!(
        write.source_version.as_deref(),
        Some(ingest.population.version_id.as_str())
    );
    assert_eq!(
        write.result_key,
        format!(
            "reports/dataset=series_population_report/series_id=PRS30006032/period=Q01/source_version={}/report.json",
            ingest.population.version_id
        )
    );

    let report = stored_json(local.store(), &write.result_key, None);
    assert_eq!(report["record_schema"], "v1");
    assert_eq!(report["series_id"], "PRS30006032");
    assert_eq!(report["period"], "Q01");

    // 2013..=2018: 316, 318, 321, 323, 325, 326
    let summary = &report["population_summary"];
    assert_eq!(summary["sample_count"], 6);
    assert_close(&summary["mean"], 321.5);
    assert_close(&summary["std_dev"], 15.5_f64.sqrt());

    let best_years = report["best_years"].as_array().expect("best years array");
    let ranked: Vec<(&str, i64)> = best_years
        .iter()
        .map(|entry| {
            (
                entry["series_id"].as_str().expect("series id"),
                entry["year"].as_i64().expect("year"),
            )
        })
        .collect();
    assert_eq!(
        ranked,
        vec![
            ("PRS30006011", 2015),
            ("PRS30006012", 2017),
            ("PRS30006032", 2013),
        ]
    );
    assert_close(&best_years[0]["value"], 5.0);
    assert_close(&best_years[2]["value"], 2.0);

    let rows = report["series_population"].as_array().expect("rows array");
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0]["year"], 2013);
    assert_close(&rows[0]["value"], 1.5);
    assert_close(&rows[0]["population"], 316.0);
    assert_eq!(rows[1]["year"], 2018);
    assert_close(&rows[1]["population"], 326.0);
    assert_eq!(rows[2]["year"], 2020);
    assert_eq!(rows[2]["population"], Value::Null);
}

#[test]
fn syncing_ingest_stores_the_series_before_the_triggering_write() {
    let mut local = syncing_pipeline();

    let ingest = local.run_ingest(&upstream()).expect("ingest should succeed");
    let sync = ingest
        .price_relative
        .as_ref()
        .expect("series sync should be reported");
    assert_eq!(
        sync.version_id.as_deref(),
        Some("v1"),
        "series must be written first"
    );
    assert_eq!(ingest.population.version_id, "v2");

    let outcomes = local.drain().expect("drain should finish");
    assert!(matches!(
        outcomes.as_slice(),
        [DeliveryOutcome::Completed { .. }]
    ));
}
