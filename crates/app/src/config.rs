//! Configuration for the pmlog application.
//!
//! Handles parsing command-line arguments and generating sensible defaults
//! (including randomized simulation defaults that are reproducible with a
//! seed).
//!
//! # Philosophy
//!
//! The tool should work with ZERO arguments: it samples the simulated sensor
//! into `./pmlog-data` and uploads over a simulated link. All defaults are
//! printed with `--print-config` so runs are reproducible.

use std::path::PathBuf;
use std::time::Duration;

use pmlog_core::batch::{BatchLimits, DEFAULT_MARGIN, DEFAULT_MAX_SIZE};
use pmlog_core::delivery::{Endpoint, SimConfig, DEFAULT_ACCEPTED_STATUS, DEFAULT_HOST, DEFAULT_PORT};
use pmlog_core::retry::RetryPolicy;
use pmlog_core::uploader::UploadConfig;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Environment variable holding the write API key.
pub const API_KEY_ENV: &str = "PMLOG_WRITE_API_KEY";

/// Key used when uploading to the simulated link without one.
const SIMULATED_API_KEY: &str = "SIMULATEDWRITEKEY";

/// Where a local export starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFrom {
    /// Whole store, header included
    Start,
    /// Lines after the saved upload cursor
    Cursor,
}

/// Complete configuration for a logger run.
#[derive(Debug, Clone)]
pub struct Config {
    // === Files ===
    /// Directory holding the log and cursor files
    pub data_dir: PathBuf,

    /// Log store file name
    pub log_file: String,

    /// Cursor file name
    pub cursor_file: String,

    /// Delete the log and reset the cursor before sampling
    pub recreate: bool,

    /// Dump the store to stdout instead of sampling and uploading
    pub export: Option<ExportFrom>,

    // === Sampling ===
    /// Samples to take (0 = upload only)
    pub samples: u32,

    /// Delay between samples
    pub sample_interval: Duration,

    /// Acquisition attempts per sample
    pub sensor_attempts: u32,

    // === Upload ===
    /// Whether to run an upload pass
    pub upload: bool,

    /// Remote endpoint
    pub endpoint: Endpoint,

    /// Write API key
    pub api_key: String,

    /// Request body limits
    pub limits: BatchLimits,

    /// Delay between delivery attempts
    pub backoff: Duration,

    /// Delivery attempts per batch (None = until accepted)
    pub max_attempts: Option<u32>,

    /// TCP connect/read/write timeout
    pub io_timeout: Duration,

    // === Simulation ===
    /// Use the simulated link instead of TCP
    pub simulate: bool,

    /// Seed for the simulated sensor, GPS and link
    pub seed: u64,

    /// Simulated link behaviour
    pub sim: SimConfig,

    /// Probability a simulated sensor frame is corrupt
    pub corrupt_rate: f64,

    /// Probability a simulated sensor read times out
    pub timeout_rate: f64,

    // === Behavior ===
    /// Default log filter when RUST_LOG is unset
    pub log_level: String,

    /// Whether to print detailed config
    pub print_config: bool,

    /// Whether to print detailed metrics summary
    pub print_metrics: bool,
}

/// Value following `args[*i]`, advancing `i`.
fn take_value<'a>(args: &'a [String], i: &mut usize, what: &str) -> Result<&'a str, String> {
    let flag = &args[*i];
    *i += 1;
    args.get(*i)
        .map(String::as_str)
        .ok_or_else(|| format!("{} requires {}", flag, what))
}

/// Parse the value following `args[*i]`.
fn take_parsed<T: std::str::FromStr>(args: &[String], i: &mut usize, what: &str) -> Result<T, String> {
    let flag = args[*i].clone();
    let value = take_value(args, i, what)?;
    value
        .parse()
        .map_err(|_| format!("invalid value for {}: {}", flag, value))
}

impl Config {
    /// Parse configuration from command-line arguments.
    ///
    /// If --seed is not provided, a time-based seed is used and printed with
    /// the configuration.
    pub fn from_args(args: &[String]) -> Result<Self, String> {
        Self::from_args_with_env(args, std::env::var(API_KEY_ENV).ok())
    }

    /// As [`Config::from_args`], with the API key environment value supplied.
    pub fn from_args_with_env(args: &[String], env_api_key: Option<String>) -> Result<Self, String> {
        let mut data_dir: Option<PathBuf> = None;
        let mut log_file: Option<String> = None;
        let mut cursor_file: Option<String> = None;
        let mut recreate = false;
        let mut export = false;
        let mut from_cursor = false;
        let mut samples: Option<u32> = None;
        let mut interval_ms: Option<u64> = None;
        let mut sensor_attempts: Option<u32> = None;
        let mut upload = true;
        let mut host: Option<String> = None;
        let mut port: Option<u16> = None;
        let mut channel_id: Option<u32> = None;
        let mut accepted_status: Option<u16> = None;
        let mut api_key: Option<String> = None;
        let mut max_body: Option<usize> = None;
        let mut margin: Option<usize> = None;
        let mut backoff_ms: Option<u64> = None;
        let mut max_attempts: Option<u32> = None;
        let mut io_timeout_ms: Option<u64> = None;
        let mut simulate = true;
        let mut seed: Option<u64> = None;
        let mut reject_rate: Option<f64> = None;
        let mut connect_failure_rate: Option<f64> = None;
        let mut corrupt_rate: Option<f64> = None;
        let mut timeout_rate: Option<f64> = None;
        let mut log_level: Option<String> = None;
        let mut print_config = false;
        let mut print_metrics = true;

        let mut i = 0;
        while i < args.len() {
            match args[i].as_str() {
                "--data-dir" => data_dir = Some(PathBuf::from(take_value(args, &mut i, "a path")?)),
                "--log-file" => log_file = Some(take_value(args, &mut i, "a file name")?.to_string()),
                "--cursor-file" => {
                    cursor_file = Some(take_value(args, &mut i, "a file name")?.to_string())
                }
                "--recreate" => recreate = true,
                "export" if i == 0 => export = true,
                "--from-cursor" => from_cursor = true,
                "--samples" => samples = Some(take_parsed(args, &mut i, "a number")?),
                "--interval-ms" => interval_ms = Some(take_parsed(args, &mut i, "a number")?),
                "--sensor-attempts" => sensor_attempts = Some(take_parsed(args, &mut i, "a number")?),
                "--no-upload" => upload = false,
                "--host" => host = Some(take_value(args, &mut i, "a host name")?.to_string()),
                "--port" => port = Some(take_parsed(args, &mut i, "a port")?),
                "--channel" => channel_id = Some(take_parsed(args, &mut i, "a channel id")?),
                "--accepted-status" => accepted_status = Some(take_parsed(args, &mut i, "a status code")?),
                "--api-key" => api_key = Some(take_value(args, &mut i, "a key")?.to_string()),
                "--max-body" => max_body = Some(take_parsed(args, &mut i, "a number")?),
                "--margin" => margin = Some(take_parsed(args, &mut i, "a number")?),
                "--backoff-ms" => backoff_ms = Some(take_parsed(args, &mut i, "a number")?),
                "--max-attempts" => max_attempts = Some(take_parsed(args, &mut i, "a number")?),
                "--io-timeout-ms" => io_timeout_ms = Some(take_parsed(args, &mut i, "a number")?),
                "--live" => simulate = false,
                "--seed" => seed = Some(take_parsed(args, &mut i, "a number")?),
                "--reject-rate" => reject_rate = Some(take_parsed(args, &mut i, "a rate")?),
                "--connect-failure-rate" => {
                    connect_failure_rate = Some(take_parsed(args, &mut i, "a rate")?)
                }
                "--corrupt-rate" => corrupt_rate = Some(take_parsed(args, &mut i, "a rate")?),
                "--timeout-rate" => timeout_rate = Some(take_parsed(args, &mut i, "a rate")?),
                "--perfect" => {
                    reject_rate = Some(0.0);
                    connect_failure_rate = Some(0.0);
                    corrupt_rate = Some(0.0);
                    timeout_rate = Some(0.0);
                }
                "--log-level" => log_level = Some(take_value(args, &mut i, "a level")?.to_string()),
                "--print-config" => print_config = true,
                "--no-metrics" => print_metrics = false,
                "--help" | "-h" => {
                    print_help();
                    std::process::exit(0);
                }
                other => return Err(format!("unknown argument: {}", other)),
            }
            i += 1;
        }

        for (name, rate) in [
            ("--reject-rate", reject_rate),
            ("--connect-failure-rate", connect_failure_rate),
            ("--corrupt-rate", corrupt_rate),
            ("--timeout-rate", timeout_rate),
        ] {
            if let Some(rate) = rate {
                if !(0.0..=1.0).contains(&rate) {
                    return Err(format!("{} must be between 0.0 and 1.0", name));
                }
            }
        }
        if from_cursor && !export {
            return Err("--from-cursor only applies to export".to_string());
        }
        if export && recreate {
            return Err("export cannot be combined with --recreate".to_string());
        }
        let export = match (export, from_cursor) {
            (false, _) => None,
            (true, false) => Some(ExportFrom::Start),
            (true, true) => Some(ExportFrom::Cursor),
        };
        // Exporting only reads the store
        let upload = upload && export.is_none();

        if max_attempts == Some(0) {
            return Err("--max-attempts must be at least 1".to_string());
        }

        let api_key = match api_key.or(env_api_key) {
            Some(key) => key,
            None if simulate => SIMULATED_API_KEY.to_string(),
            None if !upload => String::new(),
            None => {
                return Err(format!("--live upload needs --api-key or {}", API_KEY_ENV));
            }
        };

        // Determine seed (explicit or time-based)
        let seed = seed.unwrap_or_else(|| chrono::Utc::now().timestamp_millis() as u64);

        // Generate simulation defaults using seed
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mut small_rate = |max: f64| {
            // Bias toward small rates
            let r: f64 = rng.gen();
            (r * r * max).min(max)
        };

        let endpoint = Endpoint {
            host: host.unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port: port.unwrap_or(DEFAULT_PORT),
            channel_id: channel_id.unwrap_or(0),
            accepted_status: accepted_status.unwrap_or(DEFAULT_ACCEPTED_STATUS),
        };

        let config = Config {
            data_dir: data_dir.unwrap_or_else(|| PathBuf::from("./pmlog-data")),
            log_file: log_file.unwrap_or_else(|| pmlog_core::store::DEFAULT_FILE_NAME.to_string()),
            cursor_file: cursor_file
                .unwrap_or_else(|| pmlog_core::cursor::DEFAULT_FILE_NAME.to_string()),
            recreate,
            export,
            samples: if export.is_some() { 0 } else { samples.unwrap_or(120) },
            sample_interval: Duration::from_millis(interval_ms.unwrap_or(0)),
            sensor_attempts: sensor_attempts.unwrap_or(5),
            upload,
            sim: SimConfig {
                reject_rate: reject_rate.unwrap_or_else(|| small_rate(0.2)),
                connect_failure_rate: connect_failure_rate.unwrap_or_else(|| small_rate(0.1)),
                reject_code: 500,
                accepted_status: endpoint.accepted_status,
                seed,
            },
            corrupt_rate: corrupt_rate.unwrap_or_else(|| small_rate(0.05)),
            timeout_rate: timeout_rate.unwrap_or_else(|| small_rate(0.05)),
            endpoint,
            api_key,
            limits: BatchLimits::new(
                max_body.unwrap_or(DEFAULT_MAX_SIZE),
                margin.unwrap_or(DEFAULT_MARGIN),
            ),
            backoff: Duration::from_millis(backoff_ms.unwrap_or(15_000)),
            max_attempts,
            io_timeout: Duration::from_millis(io_timeout_ms.unwrap_or(10_000)),
            simulate,
            seed,
            log_level: log_level.unwrap_or_else(|| "info".to_string()),
            print_config,
            print_metrics,
        };

        Ok(config)
    }

    /// Retry policy for batch delivery.
    pub fn retry_policy(&self) -> RetryPolicy {
        match self.max_attempts {
            Some(n) => RetryPolicy::bounded(n, self.backoff),
            None => RetryPolicy::unbounded(self.backoff),
        }
    }

    /// Tunables for the upload batcher.
    pub fn upload_config(&self) -> UploadConfig {
        UploadConfig {
            limits: self.limits,
            retry: self.retry_policy(),
            api_key: self.api_key.clone(),
        }
    }

    /// Print the configuration in human-readable form.
    pub fn print(&self) {
        println!("=== Configuration ===");
        println!("Data dir:    {}", self.data_dir.display());
        println!("Log file:    {}", self.log_file);
        println!("Cursor file: {}", self.cursor_file);
        println!("Recreate:    {}", self.recreate);
        match self.export {
            Some(ExportFrom::Start) => println!("Export:      whole store"),
            Some(ExportFrom::Cursor) => println!("Export:      since upload cursor"),
            None => println!("Export:      off"),
        }
        println!();
        println!("=== Sampling ===");
        println!("Samples: {}", self.samples);
        println!("Interval: {} ms", self.sample_interval.as_millis());
        println!("Sensor attempts: {}", self.sensor_attempts);
        println!();
        println!("=== Upload ===");
        println!("Enabled: {}", self.upload);
        println!("Endpoint: {}:{}{}", self.endpoint.host, self.endpoint.port, self.endpoint.path());
        println!("Accepted status: {}", self.endpoint.accepted_status);
        println!("API key: {}", if self.api_key.is_empty() { "(none)" } else { "(set)" });
        println!("Max body: {} bytes (margin {})", self.limits.max_size, self.limits.margin);
        println!("Backoff: {} ms", self.backoff.as_millis());
        match self.max_attempts {
            Some(n) => println!("Max attempts: {}", n),
            None => println!("Max attempts: unbounded"),
        }
        println!("I/O timeout: {} ms", self.io_timeout.as_millis());
        println!();
        println!("=== Simulation ===");
        println!("Link: {}", if self.simulate { "simulated" } else { "tcp" });
        println!("Seed: {}", self.seed);
        println!("Reject rate: {:.2}%", self.sim.reject_rate * 100.0);
        println!("Connect failure rate: {:.2}%", self.sim.connect_failure_rate * 100.0);
        println!("Frame corrupt rate: {:.2}%", self.corrupt_rate * 100.0);
        println!("Bus timeout rate: {:.2}%", self.timeout_rate * 100.0);
        println!();
    }
}

fn print_help() {
    println!("pmlog: Field particulate logger with resumable bulk upload");
    println!();
    println!("USAGE:");
    println!("    pmlog [OPTIONS]");
    println!("    pmlog export [--from-cursor] [--data-dir <PATH>] [--log-file <NAME>]");
    println!();
    println!("OPTIONS:");
    println!("    --data-dir <PATH>            Directory for log and cursor (default: ./pmlog-data)");
    println!("    --log-file <NAME>            Log file name (default: data.txt)");
    println!("    --cursor-file <NAME>         Cursor file name (default: upload.cursor)");
    println!("    --recreate                   Delete the log and reset the cursor first");
    println!("    --from-cursor                With export: only lines not yet uploaded");
    println!();
    println!("    --samples <N>                Samples to take, 0 to only upload (default: 120)");
    println!("    --interval-ms <MS>           Delay between samples (default: 0)");
    println!("    --sensor-attempts <N>        Acquisition attempts per sample (default: 5)");
    println!();
    println!("    --no-upload                  Skip the upload pass");
    println!("    --host <HOST>                Endpoint host (default: api.thingspeak.com)");
    println!("    --port <N>                   Endpoint port (default: 80)");
    println!("    --channel <ID>               Channel id (default: 0)");
    println!("    --accepted-status <CODE>     Success status code (default: 202)");
    println!("    --api-key <KEY>              Write API key (or {})", API_KEY_ENV);
    println!("    --max-body <N>               Max request body bytes (default: 5000)");
    println!("    --margin <N>                 Bytes kept free below the max (default: 200)");
    println!("    --backoff-ms <MS>            Delay between delivery attempts (default: 15000)");
    println!("    --max-attempts <N>           Attempts per batch (default: until accepted)");
    println!("    --io-timeout-ms <MS>         TCP timeout (default: 10000)");
    println!();
    println!("    --live                       Upload over TCP instead of the simulated link");
    println!("    --seed <N>                   Random seed for determinism");
    println!("    --reject-rate <RATE>         Simulated rejection rate (default: random 0-0.2)");
    println!("    --connect-failure-rate <R>   Simulated refusal rate (default: random 0-0.1)");
    println!("    --corrupt-rate <RATE>        Simulated corrupt frame rate (default: random 0-0.05)");
    println!("    --timeout-rate <RATE>        Simulated bus timeout rate (default: random 0-0.05)");
    println!("    --perfect                    Zero all simulated failure rates");
    println!();
    println!("    --log-level <LEVEL>          Log filter when RUST_LOG is unset (default: info)");
    println!("    --print-config               Print resolved configuration");
    println!("    --no-metrics                 Don't print metrics summary");
    println!("    --help, -h                   Print this help");
    println!();
    println!("EXAMPLES:");
    println!("    pmlog                                      # Sample and upload, all simulated");
    println!("    pmlog --seed 42 --perfect                  # Deterministic, no failures");
    println!("    pmlog --samples 0 --live --channel 123     # Upload pending records over TCP");
    println!("    pmlog export --from-cursor > pending.csv   # Dump records not yet uploaded");
    println!();
}
