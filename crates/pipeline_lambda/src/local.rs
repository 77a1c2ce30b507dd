//! Both stages wired together in-process.
//!
//! The in-memory store emits change notifications, which are forwarded to a
//! [`LeaseQueue`] and consumed by the report handler one message at a time.
//! The clock is simulated so lease expiry and redelivery are deterministic.

use pipeline_core::config::{IngestConfig, PipelineConfig};
use pipeline_core::contract::{content_fingerprint, IngestResponse, ReportResponse};
use pipeline_core::delivery::{process_next, DeliveryOutcome, DeliveryPolicy, LeaseQueue};
use pipeline_core::PipelineError;
use tracing::{info, warn};

use crate::adapters::memory::InMemoryDatasetStore;
use crate::adapters::object_store::{DatasetStore, ObjectMetadata};
use crate::adapters::upstream::UpstreamSource;
use crate::handlers::ingest::handle_ingest;
use crate::handlers::report::handle_report_message;

pub type ReportOutcome = DeliveryOutcome<ReportResponse>;

#[derive(Debug)]
pub struct LocalPipeline {
    config: PipelineConfig,
    ingest: IngestConfig,
    store: InMemoryDatasetStore,
    queue: LeaseQueue,
    clock_ms: u64,
}

impl LocalPipeline {
    pub fn new(config: PipelineConfig, ingest: IngestConfig, policy: DeliveryPolicy) -> Self {
        let store = InMemoryDatasetStore::with_notifications(
            config.bucket.clone(),
            config.notification_filter.clone(),
        );
        Self {
            config,
            ingest,
            store,
            queue: LeaseQueue::new(policy),
            clock_ms: 0,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn store(&self) -> &InMemoryDatasetStore {
        &self.store
    }

    pub fn queue(&self) -> &LeaseQueue {
        &self.queue
    }

    pub fn now_ms(&self) -> u64 {
        self.clock_ms
    }

    pub fn advance(&mut self, elapsed_ms: u64) {
        self.clock_ms = self.clock_ms.saturating_add(elapsed_ms);
    }

    /// Writes an object directly, as an operator or another job would.
    pub fn seed(
        &mut self,
        key: &str,
        body: &[u8],
        content_type: &str,
    ) -> Result<String, PipelineError> {
        let metadata = ObjectMetadata {
            content_type: content_type.to_string(),
            sha256: content_fingerprint(body),
            source_url: None,
        };
        let version_id = self.store.put_object(key, body, &metadata)?;
        self.forward_notifications();
        Ok(version_id)
    }

    /// Runs one scheduled ingest and enqueues the notifications it caused.
    pub fn run_ingest(
        &mut self,
        upstream: &impl UpstreamSource,
    ) -> Result<IngestResponse, PipelineError> {
        let result = handle_ingest(&self.config, &self.ingest, upstream, &self.store);
        // Writes that committed before a failure still notify.
        self.forward_notifications();
        result
    }

    pub fn forward_notifications(&mut self) -> usize {
        let notifications = self.store.take_notifications();
        for notification in &notifications {
            let message_id = self.queue.send(notification.to_event_body(), self.clock_ms);
            info!(
                message_id = %message_id,
                key = %notification.key,
                version_id = ?notification.version_id,
                "notification enqueued"
            );
        }
        notifications.len()
    }

    /// Delivers at most one visible message to the report handler.
    pub fn deliver_next(&mut self) -> Result<Option<ReportOutcome>, PipelineError> {
        let config = &self.config;
        let store = &self.store;
        let outcome = process_next(&mut self.queue, self.clock_ms, |message| {
            handle_report_message(&message.body, config, store)
        })?;

        match &outcome {
            Some(DeliveryOutcome::Failed {
                message_id,
                error,
                redeliverable_at_ms,
            }) => warn!(
                message_id = %message_id,
                error = %error,
                redeliverable_at_ms,
                "report failed; message left for redelivery"
            ),
            Some(DeliveryOutcome::DeadLettered { message_id, error }) => warn!(
                message_id = %message_id,
                error = %error,
                "report input malformed; message dead-lettered"
            ),
            _ => {}
        }
        Ok(outcome)
    }

    /// Delivers until the queue is empty, advancing the clock past lease
    /// expiry whenever only failed messages remain.
    pub fn drain(&mut self) -> Result<Vec<ReportOutcome>, PipelineError> {
        let mut outcomes = Vec::new();
        let mut retry_at: Option<u64> = None;

        loop {
            match self.deliver_next()? {
                Some(outcome) => {
                    if let DeliveryOutcome::Failed {
                        redeliverable_at_ms,
                        ..
                    } = &outcome
                    {
                        let at = *redeliverable_at_ms;
                        retry_at = Some(retry_at.map_or(at, |current| current.min(at)));
                    }
                    outcomes.push(outcome);
                }
                None => match retry_at.take() {
                    Some(at) if !self.queue.is_empty() => self.clock_ms = self.clock_ms.max(at),
                    _ => break,
                },
            }
        }
        Ok(outcomes)
    }
}

#[cfg(test)]
mod tests {
    use pipeline_core::contract::TEXT_CONTENT_TYPE;

    use super::*;
    use crate::adapters::memory::StaticUpstream;

    const POPULATION_URL: &str = "file://population.json";

    fn pipeline() -> LocalPipeline {
        let ingest = IngestConfig {
            population_source_url: POPULATION_URL.to_string(),
            price_relative_source_url: None,
            ..IngestConfig::default()
        };
        LocalPipeline::new(
            PipelineConfig::for_bucket("local-bucket"),
            ingest,
            DeliveryPolicy {
                visibility_timeout_ms: 1_000,
                max_receive_count: 2,
            },
        )
    }

    #[test]
    fn seeding_outside_the_filter_enqueues_nothing() {
        let mut local = pipeline();
        let key = local.config().price_relative_key.clone();
        local
            .seed(&key, b"series_id\tyear\tperiod\tvalue\n", TEXT_CONTENT_TYPE)
            .expect("seed should succeed");
        assert!(local.queue().is_empty());
    }

    #[test]
    fn retries_until_the_receive_limit_then_dead_letters() {
        let mut local = pipeline();
        let upstream = StaticUpstream::new()
            .with_response(POPULATION_URL, r#"{"data":[{"year":2013,"population":1}]}"#);

        // No series object yet, so every delivery fails with a missing dependency.
        local.run_ingest(&upstream).expect("ingest should succeed");
        let outcomes = local.drain().expect("drain should finish");

        assert_eq!(outcomes.len(), 2);
        assert!(outcomes
            .iter()
            .all(|outcome| matches!(outcome, DeliveryOutcome::Failed { .. })));
        assert!(local.queue().is_empty());
        assert_eq!(local.queue().dead_letters().len(), 1);
        assert_eq!(local.queue().dead_letters()[0].receive_count, 2);
        assert!(local.now_ms() >= 1_000);
    }
}
