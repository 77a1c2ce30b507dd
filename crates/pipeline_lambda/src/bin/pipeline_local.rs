use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use pipeline_core::config::{IngestConfig, PipelineConfig};
use pipeline_core::contract::TEXT_CONTENT_TYPE;
use pipeline_core::delivery::{DeliveryOutcome, DeliveryPolicy};
use pipeline_lambda::adapters::memory::StaticUpstream;
use pipeline_lambda::adapters::object_store::DatasetStore;
use pipeline_lambda::local::LocalPipeline;
use pipeline_lambda::telemetry::init_tracing;

/// Runs the ingest and report stages in-process against local files.
#[derive(Parser)]
#[command(name = "pipeline_local")]
struct Cli {
    /// Population payload served in place of the population API
    #[arg(long)]
    population_file: PathBuf,
    /// Price-relative file; seeded directly unless --sync-series is set
    #[arg(long)]
    price_relative_file: PathBuf,
    /// Fetch the price-relative file through the ingest sync instead of seeding it
    #[arg(long, default_value_t = false)]
    sync_series: bool,
    #[arg(long, default_value = "local-bucket")]
    bucket: String,
    #[arg(long, env = "SERIES_ID")]
    series_id: Option<String>,
    #[arg(long, env = "PERIOD")]
    period: Option<String>,
    /// Number of scheduled ingest runs to simulate
    #[arg(long, default_value_t = 1)]
    ingest_runs: usize,
    /// Directory receiving every stored report; reports go to stdout otherwise
    #[arg(long)]
    output_dir: Option<PathBuf>,
}

const POPULATION_URL: &str = "file://population";
const PRICE_RELATIVE_URL: &str = "file://price-relative";

fn run(cli: Cli) -> Result<bool, String> {
    let population = fs::read(&cli.population_file).map_err(|error| {
        format!("failed to read {}: {error}", cli.population_file.display())
    })?;
    let price_relative = fs::read(&cli.price_relative_file).map_err(|error| {
        format!("failed to read {}: {error}", cli.price_relative_file.display())
    })?;

    let mut config = PipelineConfig::for_bucket(cli.bucket);
    if let Some(series_id) = cli.series_id {
        config.series_id = series_id;
    }
    if let Some(period) = cli.period {
        config.period = period;
    }
    config.validate().map_err(|error| error.to_string())?;

    let ingest = IngestConfig {
        population_source_url: POPULATION_URL.to_string(),
        price_relative_source_url: cli.sync_series.then(|| PRICE_RELATIVE_URL.to_string()),
        ..IngestConfig::default()
    };
    let upstream = StaticUpstream::new()
        .with_response(POPULATION_URL, population)
        .with_response(PRICE_RELATIVE_URL, price_relative.clone());

    let mut local = LocalPipeline::new(config, ingest, DeliveryPolicy::default());
    if !cli.sync_series {
        let key = local.config().price_relative_key.clone();
        local
            .seed(&key, &price_relative, TEXT_CONTENT_TYPE)
            .map_err(|error| error.to_string())?;
    }

    for _ in 0..cli.ingest_runs {
        local.run_ingest(&upstream).map_err(|error| error.to_string())?;
    }
    let outcomes = local.drain().map_err(|error| error.to_string())?;

    let mut succeeded = true;
    for outcome in &outcomes {
        match outcome {
            DeliveryOutcome::Completed { output, .. } => {
                for write in &output.reports {
                    let body = local
                        .store()
                        .get_object(&write.result_key, Some(&write.result_version))
                        .map_err(|error| error.to_string())?;
                    emit_report(cli.output_dir.as_ref(), &write.result_key, &body)?;
                }
            }
            DeliveryOutcome::Failed { message_id, error, .. } => {
                eprintln!("message {message_id} attempt failed: {error}");
            }
            // Reported with the dead letters below.
            DeliveryOutcome::DeadLettered { .. } => {}
        }
    }
    for dead_letter in local.queue().dead_letters() {
        succeeded = false;
        eprintln!(
            "message {} dead-lettered after {} receive(s): {}",
            dead_letter.message_id, dead_letter.receive_count, dead_letter.reason
        );
    }
    Ok(succeeded)
}

fn emit_report(output_dir: Option<&PathBuf>, key: &str, body: &[u8]) -> Result<(), String> {
    match output_dir {
        Some(dir) => {
            let path = dir.join(key);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)
                    .map_err(|error| format!("failed to create {}: {error}", parent.display()))?;
            }
            fs::write(&path, body)
                .map_err(|error| format!("failed to write {}: {error}", path.display()))?;
            eprintln!("wrote {}", path.display());
        }
        None => println!("{}", String::from_utf8_lossy(body)),
    }
    Ok(())
}

fn main() -> ExitCode {
    init_tracing();
    match run(Cli::parse()) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(message) => {
            eprintln!("error: {message}");
            ExitCode::FAILURE
        }
    }
}
