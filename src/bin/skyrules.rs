//! CLI entry point: replay a file of newline-delimited JSON reports through the rule engine.

use std::io::BufRead;
use std::path::PathBuf;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use skyrules::actions::{DEFAULT_QUEUE_CAPACITY, DEFAULT_WORKER_COUNT};
use skyrules::config::EngineConfig;
use skyrules::driver::DriverLoop;
use skyrules::log_format::TargetFirstFormat;
use skyrules::ActionDispatcher;

#[derive(Parser, Debug)]
#[command(name = "skyrules", about = "Evaluate a rule set against a replayed stream of ADS-B reports.")]
struct Args {
    /// Path to the TOML rule configuration.
    #[arg(long)]
    config: PathBuf,

    /// Path to a newline-delimited JSON file of reports; defaults to stdin.
    #[arg(long)]
    input: Option<PathBuf>,

    /// Disable the optional spatial-grid index over latlongring rules.
    #[arg(long, default_value_t = false)]
    no_spatial_index: bool,

    /// Port to expose Prometheus-format metrics on (0 disables the exporter).
    #[arg(long, default_value_t = 0)]
    metrics_port: u16,
}

fn init_logging() {
    tracing_subscriber::fmt()
        .event_format(TargetFirstFormat)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
}

#[tokio::main]
async fn main() {
    init_logging();
    let args = Args::parse();

    if args.metrics_port != 0 {
        match metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(([0, 0, 0, 0], args.metrics_port))
            .install()
        {
            Ok(()) => info!(port = args.metrics_port, "metrics exporter listening"),
            Err(e) => error!(error = %e, "failed to start metrics exporter"),
        }
    }

    let mut dispatcher = ActionDispatcher::new();
    dispatcher.spawn_workers(DEFAULT_QUEUE_CAPACITY, DEFAULT_WORKER_COUNT, &tokio::runtime::Handle::current());

    let config = match EngineConfig::load(&args.config, &[]) {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "configuration error");
            std::process::exit(1);
        }
    };

    let rule_count = config.rules.len();
    info!(rules = rule_count, regions = config.regions.len(), "configuration loaded");

    let driver = DriverLoop::new(config, dispatcher, !args.no_spatial_index);

    let reader: Box<dyn BufRead> = match &args.input {
        Some(path) => match std::fs::File::open(path) {
            Ok(f) => Box::new(std::io::BufReader::new(f)),
            Err(e) => {
                error!(error = %e, path = ?path, "failed to open input file");
                std::process::exit(1);
            }
        },
        None => Box::new(std::io::BufReader::new(std::io::stdin())),
    };

    let source = reader.lines().filter_map(|line| {
        let line = line.ok()?;
        if line.trim().is_empty() {
            return None;
        }
        serde_json::from_str(&line).ok()
    });

    let fallback_now = chrono::Utc::now().timestamp();
    let cancel = CancellationToken::new();
    let cancel_for_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("received Ctrl+C, requesting cancellation");
            cancel_for_signal.cancel();
        }
    });

    driver.run(source, cancel, fallback_now).await;
}
