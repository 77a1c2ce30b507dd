use std::time::Instant;

use pipeline_core::config::PipelineConfig;
use pipeline_core::contract::{
    content_fingerprint, stable_contract_json, ReportResponse, ReportResult, ReportWrite,
    JSON_CONTENT_TYPE, REPORT_RECORD_SCHEMA_VERSION,
};
use pipeline_core::dataset::{parse_population, parse_price_relative_series, SeriesObservation};
use pipeline_core::notification::{parse_notification_body, ChangeNotification, NotificationBody};
use pipeline_core::report::build_report;
use pipeline_core::{FailureClass, PipelineError};
use tracing::{error, info};

use crate::adapters::dead_letter::{DeadLetterEnvelope, DeadLetterSink};
use crate::adapters::object_store::{DatasetStore, ObjectMetadata};

pub const STATUS_OK: &str = "ok";
pub const STATUS_IGNORED_TEST_EVENT: &str = "ignored_test_event";
pub const STATUS_DEAD_LETTERED: &str = "dead_lettered";

/// Handles one queue message and routes its failure, if any.
///
/// `Ok` acknowledges the message; `Err` leaves it on the queue for
/// redelivery.
pub fn process_report_message(
    body: &str,
    message_id: &str,
    config: &PipelineConfig,
    store: &impl DatasetStore,
    dead_letters: Option<&impl DeadLetterSink>,
) -> Result<ReportResponse, PipelineError> {
    handle_report_message(body, config, store)
        .or_else(|failure| route_report_failure(failure, message_id, body, dead_letters))
}

/// Malformed input is forwarded to the dead-letter sink and acknowledged.
/// Without a sink, and for every other failure class, the failure is
/// returned so the message is redelivered.
pub fn route_report_failure(
    failure: PipelineError,
    message_id: &str,
    body: &str,
    dead_letters: Option<&impl DeadLetterSink>,
) -> Result<ReportResponse, PipelineError> {
    if failure.class() != FailureClass::Malformed {
        return Err(failure);
    }
    let Some(sink) = dead_letters else {
        error!(
            component = "report_handler",
            event = "dead_letter_unavailable",
            message_id,
            error_code = failure.code(),
            error = %failure,
        );
        return Err(failure);
    };

    sink.forward(&DeadLetterEnvelope::new(&failure, Some(message_id), body))?;
    info!(
        component = "report_handler",
        event = "message_dead_lettered",
        message_id,
        error_code = failure.code(),
    );
    Ok(ReportResponse::ignored(STATUS_DEAD_LETTERED))
}

/// Processes one queue message carrying a storage change notification.
///
/// Each matching record produces one report, computed from the population
/// object version named in the record. Any failure fails the whole message.
pub fn handle_report_message(
    body: &str,
    config: &PipelineConfig,
    store: &impl DatasetStore,
) -> Result<ReportResponse, PipelineError> {
    let started_at = Instant::now();
    let result = run_report(body, config, store);
    let duration_ms = started_at.elapsed().as_millis() as u64;

    match &result {
        Ok(response) => info!(
            component = "report_handler",
            event = "message_completed",
            status = %response.status,
            reports = response.reports.len(),
            duration_ms,
        ),
        Err(failure) => error!(
            component = "report_handler",
            event = "message_failed",
            error_code = failure.code(),
            error = %failure,
            retryable = failure.is_retryable(),
            duration_ms,
        ),
    }
    result
}

fn run_report(
    body: &str,
    config: &PipelineConfig,
    store: &impl DatasetStore,
) -> Result<ReportResponse, PipelineError> {
    let notifications = match parse_notification_body(body)? {
        NotificationBody::TestEvent => {
            info!(component = "report_handler", event = "test_event_ignored");
            return Ok(ReportResponse::ignored(STATUS_IGNORED_TEST_EVENT));
        }
        NotificationBody::Changes(notifications) => notifications,
    };

    let matching: Vec<&ChangeNotification> = notifications
        .iter()
        .filter(|notification| is_relevant(notification, config))
        .collect();
    if matching.is_empty() {
        return Err(PipelineError::malformed(
            "notification",
            format!(
                "none of {} record(s) is an object-created event in bucket '{}' matching prefix '{}' and suffix '{}'",
                notifications.len(),
                config.bucket,
                config.notification_filter.prefix,
                config.notification_filter.suffix,
            ),
        ));
    }

    let series_bytes = store.get_object(&config.price_relative_key, None)?;
    let observations = parse_price_relative_series(&series_bytes)?;

    let reports = matching
        .into_iter()
        .map(|notification| write_report(notification, &observations, config, store))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(ReportResponse {
        status: STATUS_OK.to_string(),
        reports,
    })
}

fn is_relevant(notification: &ChangeNotification, config: &PipelineConfig) -> bool {
    notification.bucket == config.bucket
        && notification.is_object_created()
        && config.notification_filter.matches(&notification.key)
}

fn write_report(
    notification: &ChangeNotification,
    observations: &[SeriesObservation],
    config: &PipelineConfig,
    store: &impl DatasetStore,
) -> Result<ReportWrite, PipelineError> {
    let version_id = notification.version_id.as_deref();
    let population_bytes = store.get_object(&notification.key, version_id)?;
    let population = parse_population(&population_bytes)?;

    let body = build_report(observations, &population, &config.series_id, &config.period);
    let result = ReportResult {
        record_schema: REPORT_RECORD_SCHEMA_VERSION.to_string(),
        series_id: config.series_id.clone(),
        period: config.period.clone(),
        population_key: notification.key.clone(),
        population_version: notification.version_id.clone(),
        price_relative_key: config.price_relative_key.clone(),
        notification_event_time: notification.event_time.clone(),
        body,
    };

    let encoded = stable_contract_json(&result)?;
    let result_key = config.report_key(version_id);
    let metadata = ObjectMetadata {
        content_type: JSON_CONTENT_TYPE.to_string(),
        sha256: content_fingerprint(&encoded),
        source_url: None,
    };
    let result_version = store.put_object(&result_key, &encoded, &metadata)?;

    let summary = &result.body.population_summary;
    let matched_population = result
        .body
        .series_population
        .iter()
        .filter(|row| row.population.is_some())
        .count();
    info!(
        component = "report_handler",
        event = "report_written",
        source_key = %notification.key,
        source_version = ?notification.version_id,
        result_key = %result_key,
        series_id = %result.series_id,
        period = %result.period,
        population_mean = ?summary.mean,
        population_std_dev = ?summary.std_dev,
        best_year_series = result.body.best_years.len(),
        series_rows = result.body.series_population.len(),
        rows_with_population = matched_population,
    );

    Ok(ReportWrite {
        source_key: notification.key.clone(),
        source_version: notification.version_id.clone(),
        result_key,
        result_version,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use serde_json::Value;

    use super::*;
    use crate::adapters::memory::InMemoryDatasetStore;

    const SERIES: &str = "series_id\tyear\tperiod\tvalue\n\
PRS30006032\t2013\tQ01\t1.0\n\
PRS30006032\t2014\tQ01\t2.0\n";

    fn metadata() -> ObjectMetadata {
        ObjectMetadata {
            content_type: JSON_CONTENT_TYPE.to_string(),
            sha256: "seed".to_string(),
            source_url: None,
        }
    }

    fn seeded_store(config: &PipelineConfig) -> InMemoryDatasetStore {
        let store = InMemoryDatasetStore::new(config.bucket.clone());
        store
            .put_object(&config.price_relative_key, SERIES.as_bytes(), &metadata())
            .expect("series seed should be written");
        store
    }

    fn put_population(store: &InMemoryDatasetStore, config: &PipelineConfig, body: &str) -> String {
        store
            .put_object(&config.population_key, body.as_bytes(), &metadata())
            .expect("population should be written")
    }

    fn notification_for(config: &PipelineConfig, version_id: Option<&str>) -> String {
        ChangeNotification {
            bucket: config.bucket.clone(),
            key: config.population_key.clone(),
            version_id: version_id.map(str::to_string),
            event_time: "2026-01-05T12:00:00.000Z".to_string(),
            event_name: "ObjectCreated:Put".to_string(),
            sequencer: None,
        }
        .to_event_body()
    }

    #[derive(Default)]
    struct RecordingSink {
        forwarded: Mutex<Vec<DeadLetterEnvelope>>,
    }

    impl RecordingSink {
        fn forwarded(&self) -> Vec<DeadLetterEnvelope> {
            self.forwarded
                .lock()
                .expect("sink lock should not be poisoned")
                .clone()
        }
    }

    impl DeadLetterSink for RecordingSink {
        fn forward(&self, envelope: &DeadLetterEnvelope) -> Result<(), PipelineError> {
            self.forwarded
                .lock()
                .expect("sink lock should not be poisoned")
                .push(envelope.clone());
            Ok(())
        }
    }

    fn stored_report(store: &InMemoryDatasetStore, key: &str) -> Value {
        let bytes = store.get_object(key, None).expect("report should be stored");
        serde_json::from_slice(&bytes).expect("report should be json")
    }

    #[test]
    fn acknowledges_test_events_without_reading() {
        let config = PipelineConfig::for_bucket("quest-bucket");
        let store = InMemoryDatasetStore::new("quest-bucket");
        let body = r#"{"Service":"Amazon S3","Event":"s3:TestEvent","Bucket":"quest-bucket"}"#;

        let response =
            handle_report_message(body, &config, &store).expect("test event should be ignored");

        assert_eq!(response.status, STATUS_IGNORED_TEST_EVENT);
        assert!(response.reports.is_empty());
        assert!(store.keys().is_empty());
    }

    #[test]
    fn reads_the_notified_version_even_when_a_newer_one_exists() {
        let config = PipelineConfig::for_bucket("quest-bucket");
        let store = seeded_store(&config);
        let notified = put_population(
            &store,
            &config,
            r#"{"data":[{"year":2013,"population":100},{"year":2014,"population":300}]}"#,
        );
        put_population(
            &store,
            &config,
            r#"{"data":[{"year":2013,"population":1},{"year":2014,"population":1}]}"#,
        );

        let response = handle_report_message(
            &notification_for(&config, Some(&notified)),
            &config,
            &store,
        )
        .expect("report should succeed");

        assert_eq!(response.reports.len(), 1);
        let write = &response.reports[0];
        assert_eq!(write.source_version.as_deref(), Some(notified.as_str()));
        assert_eq!(write.result_key, config.report_key(Some(&notified)));

        let report = stored_report(&store, &write.result_key);
        assert_eq!(report["population_version"], Value::from(notified));
        assert_eq!(report["population_summary"]["mean"], Value::from(200.0));
        assert_eq!(report["series_population"][0]["population"], Value::from(100.0));
        assert_eq!(report["series_population"][1]["population"], Value::from(300.0));
    }

    #[test]
    fn missing_population_version_is_a_missing_dependency() {
        let config = PipelineConfig::for_bucket("quest-bucket");
        let store = seeded_store(&config);
        put_population(&store, &config, r#"{"data":[{"year":2013,"population":1}]}"#);

        let error = handle_report_message(&notification_for(&config, Some("v404")), &config, &store)
            .expect_err("unknown version must fail");

        assert_eq!(error.class(), FailureClass::MissingDependency);
        assert!(error.is_retryable());
        assert!(store
            .keys()
            .iter()
            .all(|key| !key.starts_with(&config.results_prefix)));
    }

    #[test]
    fn missing_series_is_a_missing_dependency() {
        let config = PipelineConfig::for_bucket("quest-bucket");
        let store = InMemoryDatasetStore::new("quest-bucket");
        let version = put_population(&store, &config, r#"{"data":[{"year":2013,"population":1}]}"#);

        let error = handle_report_message(&notification_for(&config, Some(&version)), &config, &store)
            .expect_err("missing series must fail");

        assert_eq!(error.class(), FailureClass::MissingDependency);
    }

    #[test]
    fn records_for_other_buckets_or_keys_are_malformed() {
        let config = PipelineConfig::for_bucket("quest-bucket");
        let store = seeded_store(&config);
        let body = ChangeNotification {
            bucket: "someone-elses-bucket".to_string(),
            key: config.population_key.clone(),
            version_id: None,
            event_time: "2026-01-05T12:00:00.000Z".to_string(),
            event_name: "ObjectCreated:Put".to_string(),
            sequencer: None,
        }
        .to_event_body();

        let error = handle_report_message(&body, &config, &store)
            .expect_err("foreign bucket must be rejected");

        assert_eq!(error.class(), FailureClass::Malformed);
        assert!(!error.is_retryable());
    }

    #[test]
    fn unparsable_population_is_malformed() {
        let config = PipelineConfig::for_bucket("quest-bucket");
        let store = seeded_store(&config);
        let version = put_population(&store, &config, "not json");

        let error = handle_report_message(&notification_for(&config, Some(&version)), &config, &store)
            .expect_err("garbage population must fail");

        assert_eq!(error.class(), FailureClass::Malformed);
    }

    #[test]
    fn redelivery_overwrites_the_same_report_key() {
        let config = PipelineConfig::for_bucket("quest-bucket");
        let store = seeded_store(&config);
        let version = put_population(&store, &config, r#"{"data":[{"year":2013,"population":5}]}"#);
        let body = notification_for(&config, Some(&version));

        let first = handle_report_message(&body, &config, &store).expect("first delivery");
        let second = handle_report_message(&body, &config, &store).expect("redelivery");

        assert_eq!(first.reports[0].result_key, second.reports[0].result_key);
        let versions = store.versions(&first.reports[0].result_key);
        assert_eq!(versions.len(), 2);
        assert_eq!(versions[0].body, versions[1].body);
    }

    #[test]
    fn malformed_message_is_dead_lettered_and_acknowledged() {
        let config = PipelineConfig::for_bucket("quest-bucket");
        let store = seeded_store(&config);
        let version = put_population(&store, &config, "not json");
        let body = notification_for(&config, Some(&version));
        let sink = RecordingSink::default();

        let response = process_report_message(&body, "msg-1", &config, &store, Some(&sink))
            .expect("dead-lettered message should be acknowledged");

        assert_eq!(response.status, STATUS_DEAD_LETTERED);
        assert!(response.reports.is_empty());
        let forwarded = sink.forwarded();
        assert_eq!(forwarded.len(), 1);
        assert_eq!(forwarded[0].error_code, "malformed_data");
        assert_eq!(forwarded[0].source_message_id.as_deref(), Some("msg-1"));
        assert_eq!(forwarded[0].original_body, body);
    }

    #[test]
    fn malformed_message_without_dead_letter_sink_fails() {
        let config = PipelineConfig::for_bucket("quest-bucket");
        let store = seeded_store(&config);
        let version = put_population(&store, &config, "not json");

        let error = process_report_message(
            &notification_for(&config, Some(&version)),
            "msg-1",
            &config,
            &store,
            None::<&RecordingSink>,
        )
        .expect_err("malformed message must fail without a dead-letter sink");

        assert_eq!(error.class(), FailureClass::Malformed);
    }

    #[test]
    fn retryable_failures_are_never_dead_lettered() {
        let config = PipelineConfig::for_bucket("quest-bucket");
        let store = InMemoryDatasetStore::new("quest-bucket");
        let version = put_population(&store, &config, r#"{"data":[{"year":2013,"population":1}]}"#);
        let sink = RecordingSink::default();

        let error = process_report_message(
            &notification_for(&config, Some(&version)),
            "msg-2",
            &config,
            &store,
            Some(&sink),
        )
        .expect_err("missing series must fail the invocation");
        assert_eq!(error.class(), FailureClass::MissingDependency);

        let transient = PipelineError::Storage {
            key: config.population_key.clone(),
            message: "503 Slow Down".to_string(),
        };
        let error = route_report_failure(transient, "msg-3", "{}", Some(&sink))
            .expect_err("transient failure must fail the invocation");
        assert_eq!(error.class(), FailureClass::Transient);

        assert!(sink.forwarded().is_empty());
    }
}
