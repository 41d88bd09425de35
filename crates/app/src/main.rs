//! pmlog: sample the particulate sensor into the log, then forward pending
//! records to the bulk-update endpoint.

mod config;
mod sim_sensor;

use std::time::Duration;

use chrono::Utc;
use config::{Config, ExportFrom};
use pmlog_core::cursor::{load_or_start, Cursor, CursorStore, FileCursorStore};
use pmlog_core::delivery::{DeliveryClient, Network, SimulatedNetwork, TcpNetwork};
use pmlog_core::error::StorageError;
use pmlog_core::export::export_lines;
use pmlog_core::metrics::Metrics;
use pmlog_core::retry::{RecordingSleep, RetryPolicy, Sleep, ThreadSleep};
use pmlog_core::sampler::Sampler;
use pmlog_core::sensor::{ParticleSensor, PollTiming, PolledBus};
use pmlog_core::store::LogStore;
use pmlog_core::uploader::UploadBatcher;
use pmlog_core::volume::DirVolume;
use sim_sensor::{SimulatedBus, SimulatedGps};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Delay between sensor acquisition attempts.
const SENSOR_BACKOFF: Duration = Duration::from_millis(100);

fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let config = match Config::from_args(&args) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!("Run with --help for usage");
            std::process::exit(1);
        }
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level)))
        .init();

    if config.print_config {
        config.print();
    }

    if let Some(from) = config.export {
        if let Err(e) = export(&config, from) {
            error!(error = %e, "export failed");
            std::process::exit(1);
        }
        return;
    }

    let mut metrics = Metrics::new();
    let result = if config.simulate {
        // Simulated runs never block on delays
        let network = SimulatedNetwork::new(config.sim);
        let sleeper = RecordingSleep::new();
        let result = run(&config, network.clone(), sleeper, &mut metrics);
        let stats = network.stats();
        info!(
            connects = stats.connects,
            refused = stats.connect_failures,
            accepted = stats.accepted,
            rejected = stats.rejected,
            "simulated link"
        );
        result
    } else {
        run(&config, TcpNetwork::new(config.io_timeout), ThreadSleep, &mut metrics)
    };
    metrics.complete();

    if config.print_metrics {
        metrics.print_summary();
    }
    metrics.print_result();

    if let Err(e) = result {
        error!(error = %e, "run failed");
        std::process::exit(1);
    }
}

/// Dump the store to stdout, whole or since the upload cursor.
fn export(config: &Config, from: ExportFrom) -> pmlog_core::Result<()> {
    let volume = DirVolume::open(&config.data_dir).map_err(|source| StorageError::Open {
        name: config.data_dir.display().to_string(),
        source,
    })?;
    let store = LogStore::open_or_create(volume.clone(), config.log_file.as_str())?;
    let start = match from {
        ExportFrom::Start => Cursor::START,
        ExportFrom::Cursor => {
            load_or_start(&mut FileCursorStore::new(volume, config.cursor_file.as_str()))?
        }
    };

    let stdout = std::io::stdout();
    let summary = export_lines(&store, start, &mut stdout.lock())?;
    info!(lines = summary.lines, bytes = summary.bytes, "records exported");
    Ok(())
}

/// Sampling phase then upload phase over `network`.
fn run<N, S>(config: &Config, network: N, sleeper: S, metrics: &mut Metrics) -> pmlog_core::Result<()>
where
    N: Network,
    S: Sleep + Clone,
{
    let volume = DirVolume::open(&config.data_dir).map_err(|source| StorageError::Open {
        name: config.data_dir.display().to_string(),
        source,
    })?;
    let store = LogStore::open_or_create(volume.clone(), config.log_file.as_str())?;
    let mut cursor_store = FileCursorStore::new(volume, config.cursor_file.as_str());

    if config.recreate {
        warn!(store = store.name(), "recreating log store");
        store.recreate()?;
        cursor_store.save(Cursor::START)?;
    }

    if config.samples > 0 {
        sample(config, store.clone(), sleeper.clone(), metrics)?;
    }

    if config.upload {
        let client = DeliveryClient::new(network, config.endpoint.clone());
        let mut batcher = UploadBatcher::new(client, cursor_store, sleeper, config.upload_config());
        match batcher.run_upload_pass(&store) {
            Ok(report) => metrics.record_pass(&report),
            Err(e) => {
                metrics.passes_failed += 1;
                return Err(e);
            }
        }
    }

    Ok(())
}

fn sample<S: Sleep + Clone>(
    config: &Config,
    store: LogStore<DirVolume>,
    mut sleeper: S,
    metrics: &mut Metrics,
) -> pmlog_core::Result<()> {
    let bus = PolledBus::new(
        SimulatedBus::new(config.seed, config.corrupt_rate, config.timeout_rate),
        sleeper.clone(),
        PollTiming::default(),
    );
    let retry = RetryPolicy::bounded(config.sensor_attempts, SENSOR_BACKOFF);
    let mut sampler = Sampler::new(ParticleSensor::new(bus), store, retry, sleeper.clone());
    sampler.begin()?;

    let mut gps = SimulatedGps::new(config.seed, Utc::now());

    info!(samples = config.samples, "sampling started");
    for n in 0..config.samples {
        if n > 0 {
            sleeper.sleep(config.sample_interval);
        }
        let fix = gps.fix(config.sample_interval);
        if let Err(e) = sampler.sample(&fix, metrics) {
            warn!(sample = n, error = %e, "no reading this cycle");
        }
    }
    info!(
        logged = metrics.samples_logged,
        dropped = metrics.samples_dropped,
        "sampling finished"
    );
    Ok(())
}
