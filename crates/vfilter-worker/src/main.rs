//! Music removal worker binary.
//!
//! Usage:
//!   vfilter-worker <input> [output]
//!   vfilter-worker chunk-worker   (internal: one chunk request on stdin)

use std::path::PathBuf;
use tokio::sync::watch;
use tracing::{error, info};

use vfilter_media::default_output_path;
use vfilter_models::Stage;
use vfilter_worker::metrics::init_metrics;
use vfilter_worker::{
    init_tracing, run_chunk_worker, Orchestrator, ProgressAggregator, StageReporter, StageWeights, WorkerConfig,
    CHUNK_WORKER_ARG,
};

#[tokio::main]
async fn main() {
    // Load environment variables
    dotenvy::dotenv().ok();
    init_tracing();

    let args: Vec<String> = std::env::args().skip(1).collect();

    if args.first().map(String::as_str) == Some(CHUNK_WORKER_ARG) {
        // The parent decides on cancellation; a running chunk always finishes
        tokio::spawn(async {
            while tokio::signal::ctrl_c().await.is_ok() {
                info!("Chunk worker ignoring interrupt");
            }
        });
        if let Err(e) = run_chunk_worker().await {
            error!("Chunk worker error: {}", e);
            std::process::exit(1);
        }
        return;
    }

    let Some(input) = args.first().map(PathBuf::from) else {
        eprintln!("usage: vfilter-worker <input> [output]");
        std::process::exit(2);
    };
    let output = args
        .get(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| default_output_path(&input));

    let config = match WorkerConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            std::process::exit(2);
        }
    };
    info!("Worker config: {:?}", config);

    if let Some(port) = config.metrics_port {
        match init_metrics(port) {
            Ok(()) => info!(port, "Metrics listener started"),
            Err(e) => error!("Failed to start metrics listener: {}", e),
        }
    }

    // Ctrl-C stops dispatching further chunks
    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received shutdown signal, finishing running chunks");
            let _ = cancel_tx.send(true);
        }
    });

    let job = config.job(&input, &output);
    let orchestrator = Orchestrator::from_config(&config);

    let aggregator = std::sync::Mutex::new(None::<ProgressAggregator>);
    let reporter = StageReporter::from_fn(move |event| {
        let Ok(mut aggregator) = aggregator.lock() else {
            return;
        };
        let weights = if Stage::UNIT_STAGES.contains(&event.stage) {
            StageWeights::monolithic()
        } else {
            StageWeights::chunked()
        };
        let overall = aggregator
            .get_or_insert_with(|| ProgressAggregator::new(weights))
            .update(&event);
        info!(stage = %event.stage, percent = event.percent, overall, "Progress");
    });

    match orchestrator.run_with_cancel(&job, &reporter, cancel_rx).await {
        Ok(report) => {
            info!(
                output = %report.output.display(),
                mode = %report.mode,
                elapsed_secs = report.elapsed_secs(),
                "Done"
            );
        }
        Err(e) => {
            error!(kind = %e.kind(), "Job failed: {}", e);
            std::process::exit(1);
        }
    }
}
