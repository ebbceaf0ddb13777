mod bytecode;
mod cfg;
mod collect;
mod descriptor;
mod effects;
mod engine;
mod heuristics;
mod hierarchy;
mod ir;
mod opcodes;
mod reachability;
mod report;
mod sarif;
mod scan;
mod store;
#[cfg(test)]
mod testing;
mod tracker;

use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use serde_json::json;
use serde_sarif::sarif::{
    Artifact, Invocation, Result as SarifResult, Run, SCHEMA_URL, Sarif, Tool, ToolComponent,
};

use crate::engine::analyze;
use crate::heuristics::HeuristicsConfig;
use crate::report::build_report;
use crate::sarif::uncovered_pair_results;
use crate::scan::scan_inputs;
use crate::store::DefUseStore;
use crate::tracker::{ExecutionTracker, TrackerStats, read_trace};

/// CLI arguments for ducover execution.
#[derive(Parser, Debug)]
#[command(
    name = "ducover",
    about = "Def-use coverage of instance fields in JVM class files and JAR files.",
    version
)]
struct Cli {
    #[arg(long, value_name = "PATH")]
    input: PathBuf,
    #[arg(long, value_name = "PATH")]
    classpath: Vec<PathBuf>,
    /// Runtime field-access trace, one JSON event per line.
    #[arg(long, value_name = "PATH")]
    trace: Option<PathBuf>,
    /// JSON file overriding the analysis heuristics.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
    #[arg(long, value_enum, default_value_t = OutputFormat::Json)]
    format: OutputFormat,
    #[arg(long, value_name = "PATH")]
    output: Option<PathBuf>,
    #[arg(long)]
    quiet: bool,
    #[arg(long)]
    timing: bool,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
enum OutputFormat {
    /// Coverage counters per class and field.
    Json,
    /// Uncovered def-use pairs as SARIF results.
    Sarif,
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    run(cli)
}

fn run(cli: Cli) -> Result<()> {
    if !cli.input.exists() {
        anyhow::bail!("input not found: {}", cli.input.display());
    }
    for entry in &cli.classpath {
        if !entry.exists() {
            anyhow::bail!("classpath entry not found: {}", entry.display());
        }
    }
    let config = match &cli.config {
        Some(path) => HeuristicsConfig::load(path)?,
        None => HeuristicsConfig::default(),
    };

    let started_at = Instant::now();
    let scan = scan_inputs(&cli.input, &cli.classpath)?;
    let scanned_at = Instant::now();
    let artifact_count = scan.artifacts.len();
    let mut store = analyze(scan.targets, scan.classpath, config);
    let analyzed_at = Instant::now();
    let trace_stats = match &cli.trace {
        Some(path) => Some(apply_trace(&mut store, path)?),
        None => None,
    };

    let mut writer = output_writer(cli.output.as_deref())?;
    match cli.format {
        OutputFormat::Json => {
            let report = build_report(&store, trace_stats);
            serde_json::to_writer_pretty(&mut writer, &report)
                .context("failed to serialize coverage report")?;
        }
        OutputFormat::Sarif => {
            let sarif = build_sarif(
                scan.artifacts,
                build_invocation(),
                uncovered_pair_results(&store),
            );
            serde_json::to_writer_pretty(&mut writer, &sarif)
                .context("failed to serialize SARIF output")?;
        }
    }
    writer.write_all(b"\n").context("failed to write output")?;

    if cli.timing && !cli.quiet {
        eprintln!(
            "timing: total_ms={} scan_ms={} analysis_ms={} classes={} artifacts={}",
            started_at.elapsed().as_millis(),
            scanned_at.duration_since(started_at).as_millis(),
            analyzed_at.duration_since(scanned_at).as_millis(),
            scan.class_count,
            artifact_count
        );
    }

    Ok(())
}

fn apply_trace(store: &mut DefUseStore, path: &Path) -> Result<TrackerStats> {
    let events = read_trace(path)?;
    let mut tracker = ExecutionTracker::new(store);
    for event in events {
        tracker.observe(event);
    }
    let stats = tracker.finish();
    log::info!(
        "trace {}: {} events, {} covered, {} unresolved uses",
        path.display(),
        stats.events,
        stats.covered,
        stats.unresolved_uses
    );
    Ok(stats)
}

fn output_writer(output: Option<&Path>) -> Result<Box<dyn Write>> {
    match output {
        Some(path) if path == Path::new("-") => Ok(Box::new(io::stdout())),
        Some(path) => Ok(Box::new(
            File::create(path).with_context(|| format!("failed to open {}", path.display()))?,
        )),
        None => Ok(Box::new(io::stdout())),
    }
}

fn build_invocation() -> Invocation {
    let arguments: Vec<String> = std::env::args().collect();
    let command_line = arguments.join(" ");

    Invocation::builder()
        .execution_successful(true)
        .arguments(arguments)
        .command_line(command_line)
        .build()
}

fn build_sarif(
    artifacts: Vec<Artifact>,
    invocation: Invocation,
    results: Vec<SarifResult>,
) -> Sarif {
    let driver = ToolComponent::builder()
        .name("ducover")
        .version(env!("CARGO_PKG_VERSION"))
        .build();
    let tool = Tool {
        driver,
        extensions: None,
        properties: None,
    };
    let run = if artifacts.is_empty() {
        Run::builder()
            .tool(tool)
            .invocations(vec![invocation])
            .results(results)
            .build()
    } else {
        Run::builder()
            .tool(tool)
            .invocations(vec![invocation])
            .results(results)
            .artifacts(artifacts)
            .build()
    };

    Sarif::builder()
        .schema(SCHEMA_URL)
        .runs(vec![run])
        .version(json!("2.1.0"))
        .build()
}
