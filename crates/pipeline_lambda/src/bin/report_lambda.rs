use std::sync::Arc;
use std::time::{Duration, Instant};

use aws_lambda_events::event::sqs::SqsEvent;
use chrono::Utc;
use lambda_runtime::{service_fn, Error, LambdaEvent};
use pipeline_core::config::{invocation_budget, PipelineConfig, DEFAULT_REPORT_BUDGET_SECS};
use pipeline_core::contract::ReportResponse;
use pipeline_lambda::adapters::s3::S3DatasetStore;
use pipeline_lambda::adapters::sqs::SqsDeadLetterQueue;
use pipeline_lambda::budget::{effective_budget, run_with_budget, DeadlineGuard};
use pipeline_lambda::handlers::report::process_report_message;
use pipeline_lambda::telemetry::init_tracing;
use serde::Serialize;
use tracing::info;

struct RuntimeDependencies {
    pipeline: PipelineConfig,
    budget: Duration,
    store: S3DatasetStore,
    dead_letters: Option<SqsDeadLetterQueue>,
}

#[derive(Debug, Serialize)]
struct BatchResponse {
    status: String,
    messages: Vec<ReportResponse>,
}

async fn handle_request(
    event: LambdaEvent<SqsEvent>,
    deps: Arc<RuntimeDependencies>,
) -> Result<BatchResponse, Error> {
    let started_at = Instant::now();
    let deadline_ms = event.context.deadline;
    let mut messages = Vec::with_capacity(event.payload.records.len());
    info!(
        request_id = %event.context.request_id,
        records = event.payload.records.len(),
        "report batch received"
    );

    for record in event.payload.records {
        let message_id = record.message_id.unwrap_or_default();
        let body = record.body.unwrap_or_default();
        let now_ms = u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0);
        let budget = effective_budget(
            deps.budget.saturating_sub(started_at.elapsed()),
            deadline_ms,
            now_ms,
        );

        // Handling and dead-lettering share what is left of this record's budget.
        let handler_deps = Arc::clone(&deps);
        let response = run_with_budget(budget, move |deadline| {
            let store = DeadlineGuard::new(&handler_deps.store, deadline);
            let dead_letters = handler_deps
                .dead_letters
                .as_ref()
                .map(|sink| DeadlineGuard::new(sink, deadline));
            process_report_message(
                &body,
                &message_id,
                &handler_deps.pipeline,
                &store,
                dead_letters.as_ref(),
            )
        })
        .await?;
        // An error above leaves the message unacknowledged for redelivery.
        messages.push(response);
    }

    Ok(BatchResponse {
        status: "ok".to_string(),
        messages,
    })
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    init_tracing();

    let lookup = |name: &str| std::env::var(name).ok();
    let pipeline = PipelineConfig::from_lookup(lookup)?;
    let budget = invocation_budget(lookup, DEFAULT_REPORT_BUDGET_SECS)?;
    let dead_letter_queue_url = lookup("DEAD_LETTER_QUEUE_URL")
        .map(|url| url.trim().to_string())
        .filter(|url| !url.is_empty());

    let aws_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
    let runtime = tokio::runtime::Handle::current();
    let store = S3DatasetStore::new(
        pipeline.bucket.clone(),
        aws_sdk_s3::Client::new(&aws_config),
        runtime.clone(),
    );
    let dead_letters = dead_letter_queue_url.map(|queue_url| {
        SqsDeadLetterQueue::new(queue_url, aws_sdk_sqs::Client::new(&aws_config), runtime)
    });

    let deps = Arc::new(RuntimeDependencies {
        pipeline,
        budget,
        store,
        dead_letters,
    });
    lambda_runtime::run(service_fn(move |event| {
        handle_request(event, Arc::clone(&deps))
    }))
    .await
}
