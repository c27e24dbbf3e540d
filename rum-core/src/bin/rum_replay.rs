//! RUM Replay CLI - fold a recorded command log into events
//!
//! Reads commands (a JSON array or one JSON command per line), runs them
//! through a fresh scope tree with a seeded identifier generator, and prints
//! the resulting events as JSON lines.
//!
//! Usage:
//!     rum-replay session.ndjson
//!     rum-replay --seed 7 --config rum.json session.ndjson
//!     rum-replay --summary session.ndjson
//!     rum-replay --expect golden.ndjson session.ndjson
//!     cat session.ndjson | rum-replay -

use std::io::Read;
use std::path::PathBuf;

use clap::Parser;
use rum_core::replay::{self, ReplayResult};
use rum_core::sink::{EventSink, JsonLinesSink};
use rum_core::{Event, RumConfig};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "rum-replay")]
#[command(about = "Replay a RUM command log and print the attributed events")]
#[command(version)]
struct Args {
    /// Command log to replay ("-" reads stdin)
    log: PathBuf,

    /// Path to a RUM configuration JSON file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Application id when no configuration file is given
    #[arg(long, default_value = "rum-replay")]
    application_id: String,

    /// Identifier generator seed
    #[arg(short, long, default_value_t = 0)]
    seed: u64,

    /// Print replay statistics instead of events
    #[arg(long)]
    summary: bool,

    /// Pretty-print JSON output
    #[arg(long)]
    pretty: bool,

    /// Compare the replayed events against a previously recorded event log
    #[arg(long)]
    expect: Option<PathBuf>,

    /// Verbose output (debug logging on stderr)
    #[arg(short, long)]
    verbose: bool,
}

fn main() {
    let args = Args::parse();
    init_logging(args.verbose);

    let config = match load_config(&args) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading configuration: {}", e);
            std::process::exit(1);
        }
    };

    let commands = match read_log(&args.log).and_then(|input| {
        replay::load_commands(&input).map_err(|e| format!("Failed to parse command log: {}", e))
    }) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error reading command log: {}", e);
            std::process::exit(1);
        }
    };
    debug!(commands = commands.len(), seed = args.seed, "Replaying command log");

    let result = match replay::replay(&commands, &config, args.seed) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("Error replaying: {}", e);
            std::process::exit(1);
        }
    };
    info!(
        events = result.stats.total_events,
        sessions = result.stats.sessions,
        "Replay finished"
    );

    if let Some(expected) = &args.expect {
        std::process::exit(compare(expected, &result, args.pretty));
    }

    if args.summary {
        print_json(&result.stats, args.pretty);
    } else if args.pretty {
        for event in &result.events {
            print_json(event, true);
        }
    } else {
        output_lines(result.events);
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose {
        "rum_core=debug,rum_replay=debug"
    } else {
        "warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(args: &Args) -> Result<RumConfig, String> {
    match &args.config {
        Some(path) => {
            debug!(path = %path.display(), "Loading configuration");
            RumConfig::from_json_file(path).map_err(|e| e.to_string())
        }
        None => Ok(RumConfig::new(args.application_id.clone())),
    }
}

fn read_log(path: &PathBuf) -> Result<String, String> {
    if path.as_os_str() == "-" {
        let mut input = String::new();
        std::io::stdin()
            .read_to_string(&mut input)
            .map_err(|e| format!("Failed to read stdin: {}", e))?;
        return Ok(input);
    }
    std::fs::read_to_string(path).map_err(|e| format!("Failed to read {}: {}", path.display(), e))
}

fn output_lines(events: Vec<Event>) {
    let sink = JsonLinesSink::new(std::io::stdout());
    for event in events {
        if let Err(e) = sink.write(event) {
            eprintln!("Error writing event: {}", e);
            std::process::exit(1);
        }
    }
    if let Err(e) = sink.flush() {
        eprintln!("Error flushing output: {}", e);
        std::process::exit(1);
    }
}

fn print_json<T: serde::Serialize>(value: &T, pretty: bool) {
    let rendered = if pretty {
        serde_json::to_string_pretty(value)
    } else {
        serde_json::to_string(value)
    };
    match rendered {
        Ok(s) => println!("{}", s),
        Err(e) => {
            eprintln!("Error serializing output: {}", e);
            std::process::exit(1);
        }
    }
}

/// Print the diff against a recorded event log; exit code 0 when identical
fn compare(path: &PathBuf, result: &ReplayResult, pretty: bool) -> i32 {
    let expected: Result<Vec<Event>, String> = read_log(path).and_then(|input| {
        input
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).map_err(|e| e.to_string()))
            .collect()
    });
    let expected = match expected {
        Ok(events) => events,
        Err(e) => {
            eprintln!("Error reading expected events: {}", e);
            return 1;
        }
    };

    let diff = replay::diff(&expected, &result.events);
    print_json(&diff, pretty);
    if diff.identical {
        0
    } else {
        2
    }
}
