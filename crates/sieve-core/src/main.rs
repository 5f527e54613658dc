//! Sieve - contextual logging substrate
//!
//! The `sieve` binary hosts a running instance (`sieve run`) and offers the
//! operator commands that inspect or steer it through its data directory:
//! - status and queue listings from `state.json`
//! - drain, set-threshold and acknowledge-alert via `control.jsonl`
//! - metrics export from `metrics.jsonl`

use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use sieve_common::{Error, Importance, OutputFormat, QueueKey, Timestamp};
use sieve_config::{load_config, LoadedConfig};
use sieve_core::exit_codes::ExitCode;
use sieve_core::logging::{init_logging, LogConfig, LogFormat, LogLevel};
use sieve_core::monitor::{export, parse_duration, ExportFormat};
use sieve_core::runtime::{run_host, ControlCommand, ControlResult, RuntimeDir, RuntimeState};
use sieve_core::sink::JsonlFileSink;
use sieve_core::system::Sieve;

/// Sieve - classify, buffer and persist structured log messages
#[derive(Parser)]
#[command(name = "sieve")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    global: GlobalOpts,
}

/// Global options available to all commands
#[derive(Args, Debug)]
struct GlobalOpts {
    /// Path to the configuration file (JSON or TOML)
    #[arg(long, global = true, env = "SIEVE_CONFIG")]
    config: Option<PathBuf>,

    /// Output format for command results
    #[arg(long, short = 'o', global = true, default_value = "json")]
    output: OutputFormat,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Report the state published by the running instance
    Status,

    /// List queues with their fill and eviction counters
    ShowQueues,

    /// Hand up to COUNT entries of one queue to the sinks
    Drain(DrainArgs),

    /// Change the global persistence threshold
    SetThreshold(SetThresholdArgs),

    /// Write collected system snapshots
    ExportMetrics(ExportArgs),

    /// Acknowledge an active alert
    AcknowledgeAlert(AckArgs),

    /// Host a sieve instance, reading log lines from stdin
    Run(RunArgs),
}

// ============================================================================
// Command argument structs
// ============================================================================

#[derive(Args, Debug)]
struct DrainArgs {
    /// Queue as `application/name`, or an application for its default queue
    #[arg(long)]
    queue: String,

    /// Maximum entries to drain
    #[arg(long)]
    count: usize,

    /// How long to wait for the running instance to answer
    #[arg(long, default_value_t = 5000)]
    wait_ms: u64,
}

#[derive(Args, Debug)]
struct SetThresholdArgs {
    /// New minimum importance: low, medium, high or critical
    #[arg(long, value_parser = clap::value_parser!(Importance))]
    min: Importance,

    #[arg(long, default_value_t = 5000)]
    wait_ms: u64,
}

#[derive(Args, Debug)]
struct ExportArgs {
    /// Window to export, e.g. 30s, 15m, 2h, 1d
    #[arg(long)]
    since: String,

    #[arg(long, default_value = "csv")]
    format: ExportFormat,
}

#[derive(Args, Debug)]
struct AckArgs {
    /// Alert id as shown by `sieve status`
    #[arg(long)]
    id: String,

    #[arg(long, default_value_t = 5000)]
    wait_ms: u64,
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Application name for input lines that do not carry one
    #[arg(long, default_value = "stdin")]
    app: String,

    /// Interval between state publications (milliseconds)
    #[arg(long, default_value_t = 1000)]
    state_interval_ms: u64,

    /// Skip the Parquet sink and dead-letter store
    #[arg(long)]
    no_durable: bool,

    /// Also write persisted records as JSON lines to this file
    #[arg(long)]
    jsonl: Option<PathBuf>,
}

fn main() {
    let cli = Cli::parse();

    let log_level = if cli.global.quiet {
        LogLevel::Error
    } else {
        match cli.global.verbose {
            0 => LogLevel::Warn,
            1 => LogLevel::Info,
            _ => LogLevel::Debug,
        }
    };
    let log_format = match cli.global.output {
        OutputFormat::Json => LogFormat::Jsonl,
        _ => LogFormat::Human,
    };
    init_logging(&LogConfig::from_env(Some(log_level), Some(log_format)));

    let exit_code = match load_config(cli.global.config.as_deref()) {
        Ok(loaded) => match cli.command {
            Commands::Status => run_status(&cli.global, &loaded),
            Commands::ShowQueues => run_show_queues(&cli.global, &loaded),
            Commands::Drain(args) => run_drain(&cli.global, &loaded, &args),
            Commands::SetThreshold(args) => run_set_threshold(&cli.global, &loaded, &args),
            Commands::ExportMetrics(args) => run_export(&cli.global, &loaded, &args),
            Commands::AcknowledgeAlert(args) => run_acknowledge(&cli.global, &loaded, &args),
            Commands::Run(args) => run_host_command(&cli.global, loaded, &args),
        },
        Err(e) => output_error(&cli.global, &e.into()),
    };

    std::process::exit(exit_code.as_i32());
}

// ============================================================================
// Command implementations
// ============================================================================

fn runtime_dir(loaded: &LoadedConfig) -> RuntimeDir {
    RuntimeDir::new(loaded.config.storage.resolved_data_dir())
}

fn read_state(loaded: &LoadedConfig) -> Result<RuntimeState, Error> {
    runtime_dir(loaded).read_state()
}

fn run_status(global: &GlobalOpts, loaded: &LoadedConfig) -> ExitCode {
    let state = match read_state(loaded) {
        Ok(s) => s,
        Err(e) => return output_error(global, &e),
    };
    let status = &state.status;
    match global.output {
        OutputFormat::Json => print_json(&state),
        OutputFormat::Summary => {
            let health = status
                .monitor
                .health
                .as_ref()
                .map_or("unknown".to_string(), |h| h.status.to_string());
            println!(
                "[{}] {} queued={} health={} alerts={} emergency={}",
                status.instance_id,
                if state.running { "running" } else { "stopped" },
                status.queues.total_size,
                health,
                status.monitor.active_alerts.len(),
                status.queues.emergency
            );
        }
        OutputFormat::Human => {
            println!("# sieve status");
            println!();
            println!("Instance:   {} (pid {})", status.instance_id, state.pid);
            println!("Running:    {}", state.running);
            println!("Updated:    {}", state.updated_at.to_rfc3339());
            println!(
                "Config:     {} ({})",
                status.config.source,
                &status.config.content_hash[..12.min(status.config.content_hash.len())]
            );
            println!(
                "Queued:     {} / {}",
                status.queues.total_size, status.queues.total_capacity
            );
            println!("Emergency:  {}", status.queues.emergency);
            if let Some(h) = &status.monitor.health {
                println!("Health:     {}", h.status);
                for reason in &h.reasons {
                    println!("  - {}", reason);
                }
            }
            let p = &status.persistence;
            println!(
                "Decisions:  {} evaluated, {} persisted, {} queued-only, {} dropped",
                p.evaluated, p.persisted, p.queued_only, p.dropped
            );
            for alert in &status.monitor.active_alerts {
                println!(
                    "Alert:      {} {} {}={:.2} (threshold {:.2})",
                    alert.id, alert.name, alert.metric, alert.value, alert.threshold
                );
            }
            for sink in &status.sinks {
                println!("Sink:       {} {}", sink.name, sink.health);
            }
            for rec in &status.monitor.recommendations {
                println!("Advice:     {}", rec);
            }
        }
    }
    ExitCode::Success
}

fn run_show_queues(global: &GlobalOpts, loaded: &LoadedConfig) -> ExitCode {
    let state = match read_state(loaded) {
        Ok(s) => s,
        Err(e) => return output_error(global, &e),
    };
    let queues = &state.status.queues.queues;
    match global.output {
        OutputFormat::Json => print_json(queues),
        OutputFormat::Summary => {
            for q in queues {
                println!("{} {}/{}", q.queue, q.size, q.capacity);
            }
        }
        OutputFormat::Human => {
            println!(
                "{:<32} {:>8} {:>8} {:>7} {:>8} {:>8}",
                "QUEUE", "SIZE", "CAP", "FILL%", "EVICTED", "REJECTED"
            );
            for q in queues {
                println!(
                    "{:<32} {:>8} {:>8} {:>7.1} {:>8} {:>8}",
                    q.queue,
                    q.size,
                    q.capacity,
                    q.fill_percent(),
                    q.evicted.total(),
                    q.rejected
                );
            }
        }
    }
    ExitCode::Success
}

fn run_drain(global: &GlobalOpts, loaded: &LoadedConfig, args: &DrainArgs) -> ExitCode {
    let Some(key) = QueueKey::parse(&args.queue) else {
        return output_error(
            global,
            &Error::Configuration(format!("invalid queue name '{}'", args.queue)),
        );
    };
    if args.count == 0 {
        return output_error(global, &Error::Configuration("--count must be at least 1".into()));
    }
    let state = match read_state(loaded) {
        Ok(s) => s,
        Err(e) => return output_error(global, &e),
    };
    let label = key.to_string();
    if !state.status.queues.queues.iter().any(|q| q.queue == label) {
        return output_error(global, &Error::not_found("queue", label));
    }
    send_command(
        global,
        loaded,
        &state,
        ControlCommand::Drain {
            queue: key,
            count: args.count,
        },
        args.wait_ms,
    )
}

fn run_set_threshold(
    global: &GlobalOpts,
    loaded: &LoadedConfig,
    args: &SetThresholdArgs,
) -> ExitCode {
    let state = match read_state(loaded) {
        Ok(s) => s,
        Err(e) => return output_error(global, &e),
    };
    send_command(
        global,
        loaded,
        &state,
        ControlCommand::SetThreshold { min: args.min },
        args.wait_ms,
    )
}

fn run_acknowledge(global: &GlobalOpts, loaded: &LoadedConfig, args: &AckArgs) -> ExitCode {
    let state = match read_state(loaded) {
        Ok(s) => s,
        Err(e) => return output_error(global, &e),
    };
    if !state
        .status
        .monitor
        .active_alerts
        .iter()
        .any(|a| a.id == args.id)
    {
        return output_error(global, &Error::not_found("alert", args.id.clone()));
    }
    send_command(
        global,
        loaded,
        &state,
        ControlCommand::AcknowledgeAlert {
            id: args.id.clone(),
        },
        args.wait_ms,
    )
}

fn send_command(
    global: &GlobalOpts,
    loaded: &LoadedConfig,
    state: &RuntimeState,
    command: ControlCommand,
    wait_ms: u64,
) -> ExitCode {
    if !state.running {
        return output_error(
            global,
            &Error::SinkTransient {
                sink: "runtime".to_string(),
                message: "the instance that wrote state.json has stopped".to_string(),
            },
        );
    }
    let dir = runtime_dir(loaded);
    let request = match dir.submit_command(command) {
        Ok(r) => r,
        Err(e) => return output_error(global, &e),
    };
    match dir.wait_for_result(request.id, Duration::from_millis(wait_ms)) {
        Ok(Some(result)) => output_result(global, &result),
        Ok(None) => output_error(
            global,
            &Error::SinkTransient {
                sink: "runtime".to_string(),
                message: format!("no answer to request {} within {}ms", request.id, wait_ms),
            },
        ),
        Err(e) => output_error(global, &e),
    }
}

fn run_export(global: &GlobalOpts, loaded: &LoadedConfig, args: &ExportArgs) -> ExitCode {
    let Some(since) = parse_duration(&args.since) else {
        return output_error(
            global,
            &Error::Configuration(format!("invalid duration '{}'", args.since)),
        );
    };
    let now = chrono::Utc::now().timestamp_millis();
    let from = Timestamp::from_millis(now.saturating_sub(since.num_milliseconds()));
    let samples = match runtime_dir(loaded).read_metrics(from) {
        Ok(s) => s,
        Err(e) => return output_error(global, &e),
    };
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    if let Err(e) = export::write_snapshots(&samples, args.format, &mut out) {
        return output_error(global, &e);
    }
    let _ = out.flush();
    ExitCode::Success
}

fn run_host_command(global: &GlobalOpts, loaded: LoadedConfig, args: &RunArgs) -> ExitCode {
    let data_dir = loaded.config.storage.resolved_data_dir();
    let max_string_len = loaded.config.storage.max_string_len;
    #[cfg(feature = "metrics")]
    let http = loaded.config.http.clone();

    let mut builder = Sieve::builder(loaded.config)
        .snapshot(loaded.snapshot)
        .durable(!args.no_durable);
    if let Some(path) = &args.jsonl {
        match JsonlFileSink::open("jsonl", path.clone(), max_string_len) {
            Ok(sink) => builder = builder.sink(Arc::new(sink)),
            Err(e) => return output_error(global, &e.into()),
        }
    }
    let sieve = match builder.build() {
        Ok(s) => Arc::new(s),
        Err(e) => return output_error(global, &e),
    };

    #[cfg(feature = "metrics")]
    let _server = if http.enabled {
        let auth = std::env::var("SIEVE_HTTP_TOKEN").ok().map(|t| {
            Arc::new(sieve_core::http::BearerToken::new(t))
                as Arc<dyn sieve_core::http::Authenticator>
        });
        match sieve_core::http::HttpServer::start(&http, Arc::clone(&sieve), auth) {
            Ok(s) => Some(s),
            Err(e) => return output_error(global, &e),
        }
    } else {
        None
    };

    let input = std::io::BufReader::new(std::io::stdin());
    let summary = match run_host(
        sieve,
        RuntimeDir::new(data_dir),
        input,
        &args.app,
        Duration::from_millis(args.state_interval_ms.max(10)),
        Arc::new(AtomicBool::new(false)),
    ) {
        Ok(s) => s,
        Err(e) => return output_error(global, &e),
    };

    match global.output {
        OutputFormat::Json => print_json(&summary),
        _ => println!(
            "ingested={} rejected={} unparsed={} commands={} drained={} dead_lettered={}",
            summary.ingested,
            summary.rejected,
            summary.unparsed,
            summary.commands,
            summary.shutdown.drained,
            summary.shutdown.dead_lettered
        ),
    }
    ExitCode::Success
}

// ============================================================================
// Output helpers
// ============================================================================

fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(s) => println!("{}", s),
        Err(e) => eprintln!("failed to serialise output: {}", e),
    }
}

fn output_result(global: &GlobalOpts, result: &ControlResult) -> ExitCode {
    match global.output {
        OutputFormat::Json => print_json(result),
        _ => {
            if result.ok {
                println!("{}", result.message);
            } else {
                eprintln!("error: {}", result.message);
            }
        }
    }
    match result.exit_code {
        0 => ExitCode::Success,
        2 => ExitCode::InvalidArgs,
        3 => ExitCode::NotFound,
        _ => ExitCode::TransientFailure,
    }
}

/// Output an error in the requested format; returns its exit code.
fn output_error(global: &GlobalOpts, error: &Error) -> ExitCode {
    let exit_code = ExitCode::for_error(error);
    match global.output {
        OutputFormat::Json => {
            let response = serde_json::json!({
                "generated_at": chrono::Utc::now().to_rfc3339(),
                "status": "error",
                "error": {
                    "code": error.code(),
                    "exit_code": exit_code.code_name(),
                    "message": error.to_string(),
                    "hint": error.remediation(),
                }
            });
            match serde_json::to_string_pretty(&response) {
                Ok(s) => eprintln!("{}", s),
                Err(_) => eprintln!("error: {}", error),
            }
        }
        OutputFormat::Summary => eprintln!("[{}] {}", exit_code.code_name(), error),
        OutputFormat::Human => {
            eprintln!("# Error");
            eprintln!();
            eprintln!("{}", error);
        }
    }
    exit_code
}
