//! RETL CLI
//!
//! Runs and checks pipeline definitions from the command line.

#![warn(missing_docs)]
#![warn(clippy::all)]

use clap::{Parser, Subcommand};
use color_eyre::eyre::{bail, WrapErr};
use color_eyre::Result;
use retl_core::{Record, Scalar, Variables};
use retl_operator::{CollectionFactory, JsonLinesStore, OperatorRegistry};
use retl_plan::{Compiler, CompilerOutput, Definition, START_STREAM, Validator};
use retl_runtime::{EngineConfig, ExecutionEngine, FailurePolicy, RunInput, RunReport};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "retl")]
#[command(about = "RETL - stream-routed ETL pipelines", long_about = None)]
struct Cli {
    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args)]
struct DefinitionArgs {
    /// Path to the definition (JSON)
    #[arg(short, long)]
    definition: PathBuf,
    /// JSON file of variable bindings
    #[arg(long)]
    vars: Option<PathBuf>,
    /// Variable binding, `name=value`; repeatable
    #[arg(long = "var", value_parser = parse_var)]
    var: Vec<(String, String)>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a pipeline
    Run {
        #[command(flatten)]
        definition: DefinitionArgs,
        /// Text fed to `start`; standard input if omitted
        #[arg(short, long)]
        input: Option<PathBuf>,
        /// Directory for collection output
        #[arg(short, long, default_value = "out")]
        out: PathBuf,
        /// Engine configuration file (JSON)
        #[arg(long)]
        config: Option<PathBuf>,
        /// Queue capacity per stream
        #[arg(long)]
        queue_capacity: Option<usize>,
        /// Maximum branch hops per record
        #[arg(long)]
        max_depth: Option<u32>,
        /// Failure policy: skip, cancel-stream or abort
        #[arg(long)]
        on_error: Option<FailurePolicy>,
    },
    /// Compile a definition and report problems
    Check {
        #[command(flatten)]
        definition: DefinitionArgs,
        /// Reject cycles, unreachable streams and sinkless graphs
        #[arg(long)]
        strict: bool,
        /// Reject definitions with more streams than this
        #[arg(long)]
        max_streams: Option<usize>,
    },
    /// List registered operators and resource kinds
    Operators,
}

fn parse_var(s: &str) -> Result<(String, String), String> {
    let (name, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected name=value, got `{}`", s))?;
    if name.is_empty() {
        return Err(format!("empty variable name in `{}`", s));
    }
    Ok((name.to_string(), value.to_string()))
}

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_env("RETL_LOG").unwrap_or_else(|_| EnvFilter::new("retl=info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn registry(out: &Path) -> Result<OperatorRegistry> {
    let mut registry = OperatorRegistry::with_builtins();
    registry
        .register_resource(
            "Collection",
            CollectionFactory::new(Arc::new(JsonLinesStore::new(out))),
        )?;
    Ok(registry)
}

fn load_variables(args: &DefinitionArgs) -> Result<Variables> {
    let mut variables = match &args.vars {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .wrap_err_with(|| format!("reading {}", path.display()))?;
            serde_json::from_str(&text).wrap_err_with(|| format!("parsing {}", path.display()))?
        }
        None => Variables::new(),
    };
    for (name, value) in &args.var {
        variables.insert(name.clone(), value.clone());
    }
    Ok(variables)
}

fn compile(args: &DefinitionArgs, registry: &OperatorRegistry) -> Result<CompilerOutput> {
    let text = std::fs::read_to_string(&args.definition)
        .wrap_err_with(|| format!("reading {}", args.definition.display()))?;
    let definition = Definition::from_json(&text)?;
    let variables = load_variables(args)?;
    Ok(Compiler::new(registry, &variables).compile(&definition)?)
}

fn engine_config(
    path: Option<&Path>,
    queue_capacity: Option<usize>,
    max_depth: Option<u32>,
    on_error: Option<FailurePolicy>,
) -> Result<EngineConfig> {
    let mut config = match path {
        Some(path) => EngineConfig::from_json(
            &std::fs::read_to_string(path).wrap_err_with(|| format!("reading {}", path.display()))?,
        )?,
        None => EngineConfig::new(),
    };
    if let Some(capacity) = queue_capacity {
        config = config.with_queue_capacity(capacity);
    }
    if let Some(depth) = max_depth {
        config = config.with_max_routing_depth(depth);
    }
    if let Some(policy) = on_error {
        config = config.with_failure_policy(policy);
    }
    config.validate()?;
    Ok(config)
}

fn validator(strict: bool, max_streams: Option<usize>) -> Validator {
    let validator = if strict { Validator::strict() } else { Validator::new() };
    match max_streams {
        Some(max) => validator.with_max_streams(max),
        None => validator,
    }
}

fn print_report(report: &RunReport) {
    println!("Run {} finished in {:?}", report.run_id, report.elapsed);
    for stream in report.streams.values() {
        let m = &stream.metrics;
        println!(
            "  {:<24} {:<12} in={} out={} routed={} skipped={}",
            stream.name,
            stream.status.to_string(),
            m.records_in,
            m.records_out,
            m.records_routed,
            m.records_skipped
        );
    }
    for failure in report.failures() {
        eprintln!("  failure: {}", failure);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    init_logging(cli.log_json);

    match cli.command {
        Commands::Run {
            definition,
            input,
            out,
            config,
            queue_capacity,
            max_depth,
            on_error,
        } => {
            let config = engine_config(config.as_deref(), queue_capacity, max_depth, on_error)?;
            let registry = registry(&out)?;
            let output = compile(&definition, &registry)?;
            let graph = output.graph;

            let mut run_input = RunInput::new();
            if graph.stream(START_STREAM).is_some_and(|s| !s.is_source()) {
                let text = match input {
                    Some(path) => tokio::fs::read_to_string(&path)
                        .await
                        .wrap_err_with(|| format!("reading {}", path.display()))?,
                    None => {
                        let mut text = String::new();
                        tokio::io::stdin().read_to_string(&mut text).await?;
                        text
                    }
                };
                run_input.push(START_STREAM, Record::new(vec![Scalar::Text(text)]));
            }

            let report = ExecutionEngine::new(config).run(&graph, run_input).await?;
            print_report(&report);
            if !report.is_success() {
                bail!("run {} finished with failures", report.run_id);
            }
            Ok(())
        }
        Commands::Check {
            definition,
            strict,
            max_streams,
        } => {
            let registry = registry(Path::new("out"))?;
            let output = compile(&definition, &registry)?;
            let graph = &output.graph;

            println!(
                "{} streams, {} routes, entry points: {}",
                graph.stream_count(),
                graph.edge_count(),
                graph.entry_points().iter().cloned().collect::<Vec<_>>().join(", ")
            );
            for warning in &output.warnings {
                println!("  warning: {}", warning);
            }

            if let Err(errors) = validator(strict, max_streams).validate(graph) {
                for error in &errors {
                    eprintln!("  error: {}", error);
                }
                bail!("{} validation errors", errors.len());
            }
            Ok(())
        }
        Commands::Operators => {
            let registry = registry(Path::new("out"))?;
            println!("Operators:");
            for name in registry.list() {
                println!("  {}", name);
            }
            println!("Resources:");
            for kind in registry.list_resources() {
                println!("  {}", kind);
            }
            Ok(())
        }
    }
}
