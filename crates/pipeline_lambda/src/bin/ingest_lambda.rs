use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use lambda_runtime::{service_fn, Error, LambdaEvent};
use pipeline_core::config::{
    invocation_budget, IngestConfig, PipelineConfig, DEFAULT_INGEST_BUDGET_SECS,
};
use pipeline_core::contract::IngestResponse;
use pipeline_lambda::adapters::s3::S3DatasetStore;
use pipeline_lambda::adapters::upstream::HttpUpstream;
use pipeline_lambda::budget::{effective_budget, run_with_budget, DeadlineGuard};
use pipeline_lambda::handlers::ingest::handle_ingest;
use pipeline_lambda::telemetry::init_tracing;
use serde_json::Value;
use tracing::info;

struct RuntimeDependencies {
    pipeline: PipelineConfig,
    ingest: IngestConfig,
    budget: Duration,
    store: S3DatasetStore,
}

async fn handle_request(
    event: LambdaEvent<Value>,
    deps: Arc<RuntimeDependencies>,
) -> Result<IngestResponse, Error> {
    let now_ms = u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0);
    let budget = effective_budget(deps.budget, event.context.deadline, now_ms);
    info!(
        request_id = %event.context.request_id,
        budget_ms = budget.as_millis() as u64,
        "scheduled ingest invoked"
    );

    let response = run_with_budget(budget, move |deadline| {
        // The blocking client owns a runtime of its own and must live off the async threads.
        let upstream = HttpUpstream::new(&deps.ingest.user_agent, deps.ingest.fetch_timeout)?;
        let store = DeadlineGuard::new(&deps.store, deadline);
        handle_ingest(&deps.pipeline, &deps.ingest, &upstream, &store)
    })
    .await?;
    Ok(response)
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    init_tracing();

    let lookup = |name: &str| std::env::var(name).ok();
    let pipeline = PipelineConfig::from_lookup(lookup)?;
    let ingest = IngestConfig::from_lookup(lookup)?;
    let budget = invocation_budget(lookup, DEFAULT_INGEST_BUDGET_SECS)?;

    let aws_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
    let store = S3DatasetStore::new(
        pipeline.bucket.clone(),
        aws_sdk_s3::Client::new(&aws_config),
        tokio::runtime::Handle::current(),
    );

    let deps = Arc::new(RuntimeDependencies {
        pipeline,
        ingest,
        budget,
        store,
    });
    lambda_runtime::run(service_fn(move |event| {
        handle_request(event, Arc::clone(&deps))
    }))
    .await
}
