//! Inspect and compare replay trace files.
//!
//! # Usage
//!
//! ```bash
//! # Show summary statistics of a trace file
//! coyote-trace summary --trace bug.trace.json
//!
//! # List the recorded steps (optionally a window)
//! coyote-trace show --trace bug.trace.json --from 100 --limit 20
//!
//! # Compare two traces for determinism
//! coyote-trace verify --trace-a run1.trace.json --trace-b run2.trace.json
//! ```

use clap::{Parser, Subcommand};
use coyote_trace::{load_trace_file, DeterminismVerifier, StepKind, TraceFile};
use log::{debug, warn};

#[derive(Parser)]
#[command(name = "coyote-trace")]
#[command(about = "Inspect controlled-concurrency replay traces")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show summary statistics for a trace file.
    Summary {
        /// Path to trace file (JSON).
        #[arg(short, long)]
        trace: String,
    },

    /// List the steps of a trace file.
    Show {
        /// Path to trace file (JSON).
        #[arg(short, long)]
        trace: String,

        /// First step to print.
        #[arg(short, long, default_value = "0")]
        from: usize,

        /// Maximum number of steps to print (0 = all).
        #[arg(short, long, default_value = "0")]
        limit: usize,

        /// Only print scheduling decisions that switch operations.
        #[arg(short, long)]
        switches_only: bool,
    },

    /// Compare two traces for deterministic equivalence.
    Verify {
        /// Path to first trace file (JSON).
        #[arg(long)]
        trace_a: String,

        /// Path to second trace file (JSON).
        #[arg(long)]
        trace_b: String,
    },
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Summary { trace } => cmd_summary(trace),
        Commands::Show {
            trace,
            from,
            limit,
            switches_only,
        } => cmd_show(trace, from, limit, switches_only),
        Commands::Verify { trace_a, trace_b } => cmd_verify(trace_a, trace_b),
    }
}

fn load_or_exit(path: &str) -> TraceFile {
    match load_trace_file(path.as_ref()) {
        Ok(file) => {
            debug!(
                "Loaded {}: test '{}', iteration {}, {} steps",
                path,
                file.test_name,
                file.iteration,
                file.trace.len()
            );
            file
        }
        Err(e) => {
            eprintln!("Failed to load {}: {}", path, e);
            std::process::exit(1);
        }
    }
}

fn cmd_summary(path: String) {
    let file = load_or_exit(&path);
    let summary = file.trace.summary();

    println!("Trace: {}", path);
    println!("Test: {}", file.test_name);
    println!("Seed: {}", file.seed);
    println!("Strategy: {}", file.strategy);
    println!("Iteration: {}", file.iteration);
    if let Some(ref bug) = file.bug {
        println!("Bug: [{}] {}", bug.kind, bug.message);
    }
    println!();

    println!("{:>20} {:>10}", "Steps", summary.total_steps);
    println!("{:>20} {:>10}", "Scheduling", summary.scheduling_steps);
    println!("{:>20} {:>10}", "Boolean choices", summary.boolean_steps);
    println!("{:>20} {:>10}", "Integer choices", summary.integer_steps);
    println!("{:>20} {:>10}", "Context switches", summary.context_switches);
    println!("{:>20} {:>10}", "Operations", summary.operations);
    println!("{:>20} {:>10}", "Groups", summary.groups);
    println!();

    let mut sorted: Vec<_> = summary.by_point.iter().collect();
    sorted.sort_by(|a, b| b.1.cmp(a.1));

    println!("{:>20} {:>10} {:>8}", "Scheduling point", "Count", "Percent");
    println!("{}", "-".repeat(40));
    let total = summary.scheduling_steps.max(1) as f64;
    for (name, count) in &sorted {
        let pct = **count as f64 / total * 100.0;
        println!("{:>20} {:>10} {:>7.1}%", name, count, pct);
    }
}

fn cmd_show(path: String, from: usize, limit: usize, switches_only: bool) {
    let file = load_or_exit(&path);
    let take = if limit == 0 { usize::MAX } else { limit };

    let mut printed = 0usize;
    for step in file.trace.iter().skip(from) {
        if printed >= take {
            break;
        }
        if switches_only
            && (step.kind() != StepKind::Scheduling || step.chosen() == Some(step.current))
        {
            continue;
        }
        println!("{}", step);
        printed += 1;
    }

    eprintln!("{} of {} steps shown", printed, file.trace.len());
}

fn cmd_verify(trace_a: String, trace_b: String) {
    let file_a = load_or_exit(&trace_a);
    let file_b = load_or_exit(&trace_b);

    eprintln!(
        "Trace A: {} steps, Trace B: {} steps",
        file_a.trace.len(),
        file_b.trace.len()
    );
    if file_a.seed != file_b.seed || file_a.strategy != file_b.strategy {
        warn!(
            "Traces come from different runs (seed {} vs {}, strategy {} vs {})",
            file_a.seed, file_b.seed, file_a.strategy, file_b.strategy
        );
    }

    let result = DeterminismVerifier::compare(&file_a.trace, &file_b.trace);
    println!("{}", result);

    if !result.is_deterministic {
        std::process::exit(1);
    }
}
