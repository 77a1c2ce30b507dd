use aws_sdk_sqs::error::DisplayErrorContext;
use pipeline_core::PipelineError;
use tokio::runtime::Handle;
use tracing::warn;

use crate::adapters::dead_letter::{DeadLetterEnvelope, DeadLetterSink};

/// Forwards unprocessable messages to an SQS dead-letter queue.
#[derive(Debug, Clone)]
pub struct SqsDeadLetterQueue {
    queue_url: String,
    client: aws_sdk_sqs::Client,
    runtime: Handle,
}

impl SqsDeadLetterQueue {
    pub fn new(queue_url: impl Into<String>, client: aws_sdk_sqs::Client, runtime: Handle) -> Self {
        Self {
            queue_url: queue_url.into(),
            client,
            runtime,
        }
    }
}

impl DeadLetterSink for SqsDeadLetterQueue {
    fn forward(&self, envelope: &DeadLetterEnvelope) -> Result<(), PipelineError> {
        let body = serde_json::to_string(envelope).map_err(|error| {
            PipelineError::Internal(format!("failed to encode dead letter: {error}"))
        })?;

        warn!(
            queue_url = %self.queue_url,
            error_code = %envelope.error_code,
            source_message_id = ?envelope.source_message_id,
            "forwarding message to dead-letter queue"
        );

        self.runtime
            .block_on(
                self.client
                    .send_message()
                    .queue_url(&self.queue_url)
                    .message_body(body)
                    .send(),
            )
            .map(|_| ())
            .map_err(|error| PipelineError::Storage {
                key: self.queue_url.clone(),
                message: format!("failed to enqueue dead letter: {}", DisplayErrorContext(&error)),
            })
    }
}
