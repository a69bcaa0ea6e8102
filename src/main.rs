//! Tracescan CLI
//!
//! Command-line interface over a directory of segment files:
//! - Show store metadata
//! - Print one event
//! - Extract traces over an event range
//! - Search for triggers

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use tracescan::config::{Config, LoggingConfig};
use tracescan::scan::{
    Comparison, Direction, ScanHandler, ScanOutcome, ScanReport, TimeAxis, TimelineRequest, Trace,
};
use tracescan::store::{load_directory, EventStore, FieldSchema, InMemoryStore};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "tracescan")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Trace extraction and trigger search over segmented event files")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file (default: user config dir, then ./tracescan.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Directory holding the segment files
    #[arg(short, long, global = true)]
    pub data_dir: Option<String>,

    /// Output format (table, json)
    #[arg(short, long, default_value = "table", global = true)]
    pub format: String,

    /// Log verbosity: 0 debug, 1 info, 2 errors only
    #[arg(short, long, global = true)]
    pub verbosity: Option<u8>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show event count, segments and fields
    Info,

    /// Print the fields of one event
    Event {
        /// Event index
        event: u64,
        /// Fields to print
        #[arg(required = true)]
        fields: Vec<String>,
    },

    /// Extract traces over an event range
    Timeline {
        /// Fields to extract
        #[arg(required = true)]
        fields: Vec<String>,
        /// First event
        #[arg(long, default_value = "0")]
        start: u64,
        /// End event, exclusive (default: last event)
        #[arg(long)]
        end: Option<u64>,
        /// Step between visited events
        #[arg(short, long)]
        step: Option<u64>,
        /// Array reduction: >= 0 element, -1 mean, -2 max, -3 min
        #[arg(short, long, allow_hyphen_values = true)]
        position: Option<i32>,
        /// x axis: off (event index), on (timestamp), auto
        #[arg(short, long)]
        time_axis: Option<TimeAxis>,
    },

    /// Search for events matching a threshold condition
    Trigger {
        /// Field to test
        field: String,
        /// Comparison: '>', '<' or '='
        comparison: Comparison,
        /// Threshold
        #[arg(allow_hyphen_values = true)]
        threshold: f64,
        /// Array selector: >= 0 element, -1 mean, -2 max, -3 min, -4 any element
        #[arg(short, long, default_value = "0", allow_hyphen_values = true)]
        position: i32,
        /// Find only the first hit next to this event
        #[arg(long)]
        from: Option<u64>,
        /// Search backwards from --from
        #[arg(long, requires = "from")]
        backward: bool,
    },

    /// Generate default config file
    Config {
        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load_with_env(path)?,
        None => Config::load_default(),
    };
    if let Some(data_dir) = cli.data_dir {
        config.store.data_dir = data_dir;
    }
    if let Some(verbosity) = cli.verbosity {
        config.logging.level = LoggingConfig::level_from_verbosity(verbosity).to_string();
    }
    init_logging(&config.logging);

    let json = cli.format == "json";

    match cli.command {
        Commands::Info => {
            let store = open_store(&config)?;
            print_info(&store, json)?;
        }

        Commands::Event { event, fields } => {
            let mut handler = ScanHandler::new(open_store(&config)?);
            let timestamp = handler.read_timestamp(event)?;
            let traces = handler.inspect(&fields, event)?;

            if json {
                let body = serde_json::json!({
                    "event": event,
                    "timestamp": timestamp,
                    "fields": traces,
                });
                println!("{}", serde_json::to_string_pretty(&body)?);
            } else {
                println!("Event {} at {}", event, format_timestamp(timestamp));
                println!();
                for (name, trace) in traces {
                    let values: Vec<String> = trace.y.iter().map(|v| format!("{}", v)).collect();
                    println!("{:<30} {}", name, values.join(" "));
                }
            }
        }

        Commands::Timeline {
            fields,
            start,
            end,
            step,
            position,
            time_axis,
        } => {
            let mut handler = ScanHandler::new(open_store(&config)?);
            handler.activate(&fields)?;

            let mut request = TimelineRequest::from_config(&config.scan).range(start, end);
            if let Some(step) = step {
                request = request.step(step);
            }
            if let Some(position) = position {
                request = request.array_position(position);
            }
            if let Some(time_axis) = time_axis {
                request = request.time_axis(time_axis);
            }

            handler.start_timeline(&request)?;
            let report = wait(&mut handler, &config).await?;

            if json {
                let body = serde_json::json!({
                    "report": report,
                    "traces": handler.traces()?,
                });
                println!("{}", serde_json::to_string_pretty(&body)?);
            } else {
                print_report(&report);
                for (name, trace) in handler.traces()? {
                    let timestamps = match request.time_axis {
                        TimeAxis::Off => false,
                        TimeAxis::On => true,
                        TimeAxis::Auto => !handler.is_array_field(name)?,
                    };
                    print_trace(name, trace, timestamps);
                }
            }
        }

        Commands::Trigger {
            field,
            comparison,
            threshold,
            position,
            from,
            backward,
        } => {
            let mut handler = ScanHandler::new(open_store(&config)?);

            match from {
                Some(current) => {
                    let direction = if backward {
                        Direction::Backward
                    } else {
                        Direction::Forward
                    };
                    handler.start_simple_trigger_search(
                        &field, threshold, comparison, position, current, direction,
                    )?;
                }
                None => handler.start_trigger_search(&field, threshold, comparison, position)?,
            }
            let report = wait(&mut handler, &config).await?;
            if let ScanOutcome::Aborted(reason) = &report.outcome {
                bail!("Trigger search aborted: {}", reason);
            }

            let trigger = handler.last_trigger()?;
            let events = trigger.triggered_events();
            if json {
                let body = serde_json::json!({
                    "report": report,
                    "field": trigger.field(),
                    "condition": format!("{} {}", trigger.comparison(), trigger.threshold()),
                    "trigger_count": trigger.trigger_count(),
                    "events": events,
                });
                println!("{}", serde_json::to_string_pretty(&body)?);
            } else {
                print_report(&report);
                println!(
                    "{} {} {}: {} triggers in {} events",
                    trigger.field(),
                    trigger.comparison(),
                    trigger.threshold(),
                    trigger.trigger_count(),
                    events.len()
                );
                if trigger.is_simple_search() {
                    match trigger.next_event() {
                        Some(event) => println!("Next trigger: event {}", event),
                        None => println!("No trigger found"),
                    }
                } else {
                    for event in events.iter().take(50) {
                        println!("  {}", event);
                    }
                    if events.len() > 50 {
                        println!("  ... {} more", events.len() - 50);
                    }
                }
            }
        }

        Commands::Config { output } => {
            let config = tracescan::config::generate_default_config();

            match output {
                Some(path) => {
                    if let Some(parent) = path.parent() {
                        std::fs::create_dir_all(parent)?;
                    }
                    std::fs::write(&path, &config)?;
                    println!("Config written to {:?}", path);
                }
                None => {
                    print!("{}", config);
                }
            }
        }
    }

    Ok(())
}

fn init_logging(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("tracescan={}", config.level)));
    let registry = tracing_subscriber::registry().with(filter);

    if config.format == "json" {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

fn open_store(config: &Config) -> anyhow::Result<InMemoryStore> {
    load_directory(&config.store)
        .with_context(|| format!("Failed to open event store in {}", config.store.data_dir))
}

/// Wait for the running scan with the configured poll interval and timeout
async fn wait(handler: &mut ScanHandler, config: &Config) -> anyhow::Result<ScanReport> {
    let poll_interval = Duration::from_millis(config.scan.poll_interval_ms);
    let timeout = config.scan.timeout_secs.map(Duration::from_secs);

    let report = handler.wait(poll_interval, timeout).await?;
    if report.outcome.is_failure() {
        bail!("Scan failed: {:?}", report.outcome);
    }
    Ok(report)
}

fn print_info(store: &InMemoryStore, json: bool) -> anyhow::Result<()> {
    let fields: BTreeMap<String, FieldSchema> = store
        .field_names()
        .into_iter()
        .filter_map(|name| store.schema_of(&name).ok().map(|schema| (name, schema)))
        .collect();

    if json {
        let body = serde_json::json!({
            "events": store.total_events(),
            "segments": store.segment_count(),
            "segment_lengths": store.segment_lengths(),
            "first_timestamp": store.first_timestamp(),
            "last_timestamp": store.last_timestamp(),
            "fields": fields,
        });
        println!("{}", serde_json::to_string_pretty(&body)?);
        return Ok(());
    }

    println!("Tracescan v{}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("Events:   {}", store.total_events());
    println!("Segments: {}", store.segment_count());
    for (idx, len) in store.segment_lengths().iter().enumerate() {
        println!("  {:<40} {}", store.segment_name(idx).unwrap_or("-"), len);
    }
    if let (Some(first), Some(last)) = (store.first_timestamp(), store.last_timestamp()) {
        println!("Range:    {} .. {}", format_timestamp(first), format_timestamp(last));
    }

    println!();
    println!("{:<30} {:<8} {}", "Field", "Kind", "Type");
    println!("{}", "-".repeat(50));
    for (name, schema) in &fields {
        println!("{:<30} {:<8} {}", name, format!("{:?}", schema.kind), schema.type_name);
    }
    Ok(())
}

fn print_report(report: &ScanReport) {
    println!(
        "{:?}: {} events processed, {} skipped, {} field errors",
        report.outcome, report.processed, report.skipped, report.field_errors
    );
    println!();
}

fn print_trace(name: &str, trace: &Trace, timestamps: bool) {
    println!("{} ({} points)", name, trace.len());
    println!("{}", "-".repeat(50));
    for (x, y) in trace.points() {
        let x = if timestamps {
            format_timestamp(x)
        } else {
            format!("{}", x)
        };
        println!("{:<28} {}", x, y);
    }
    println!();
}

fn format_timestamp(seconds: f64) -> String {
    let secs = seconds.floor();
    let nanos = ((seconds - secs) * 1e9) as u32;
    chrono::DateTime::from_timestamp(secs as i64, nanos)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S%.3f").to_string())
        .unwrap_or_else(|| format!("{}", seconds))
}
