use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use simflow::compiler::{core::Compiler, loader};
use simflow::runtime::listener::{ChannelListener, TracingListener};
use simflow::runtime::simulation::Simulation;
use tracing::{Level, info, warn};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Simulate a model file
    Run {
        /// Path to the model YAML file
        file: PathBuf,
        /// Stop after this simulated time
        #[arg(long)]
        end_time: Option<u64>,
        /// Seed of the probability-selection stream
        #[arg(long)]
        seed: Option<u64>,
        /// Seed of the work-group tie-break stream
        #[arg(long)]
        tie_break_seed: Option<u64>,
        /// Print every event as a JSON line
        #[arg(long)]
        events: bool,
        #[arg(short, long)]
        verbose: bool,
    },
    /// Compile a model and report configuration problems
    Validate {
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let verbose = matches!(cli.command, Commands::Run { verbose: true, .. });
    tracing_subscriber::fmt()
        .with_max_level(if verbose { Level::DEBUG } else { Level::INFO })
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Run {
            file,
            end_time,
            seed,
            tie_break_seed,
            events,
            ..
        } => {
            info!("Loading model from: {:?}", file);
            let def = loader::load_model_from_yaml(&file)?;
            let mut blueprint = Compiler::new()
                .compile(def)
                .with_context(|| format!("Failed to compile {}", file.display()))?;
            info!(
                "Compiled model '{}' with {} nodes.",
                blueprint.id,
                blueprint.model.graph().len()
            );

            if let Some(end) = end_time {
                blueprint.config.end_time = Some(end);
            }
            if let Some(seed) = seed {
                blueprint.config.choice_seed = seed;
            }
            if let Some(seed) = tie_break_seed {
                blueprint.config.tie_break_seed = seed;
            }

            let mut sim = Simulation::from_blueprint(blueprint);
            sim.add_listener(Box::new(TracingListener));
            let (listener, mut rx) = ChannelListener::new();
            sim.add_listener(Box::new(listener));

            let drain = tokio::spawn(async move {
                let mut counts: BTreeMap<&'static str, u64> = BTreeMap::new();
                while let Some(recorded) = rx.recv().await {
                    *counts.entry(recorded.event.kind()).or_default() += 1;
                    if events {
                        match serde_json::to_string(&recorded) {
                            Ok(line) => println!("{}", line),
                            Err(e) => warn!("Failed to serialize event: {}", e),
                        }
                    }
                }
                counts
            });

            // The simulation drops its listeners, and with them the sender, when it returns.
            let report = tokio::task::spawn_blocking(move || sim.run()).await?;
            let counts = drain.await?;

            let summary = serde_json::json!({
                "report": report,
                "events": counts,
            });
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Commands::Validate { file } => {
            let def = loader::load_model_from_yaml(&file)?;
            let blueprint = Compiler::new().compile(def)?;
            let sim = Simulation::from_blueprint(blueprint);
            let errors = sim.validation_errors();
            if errors.is_empty() {
                println!("{}: ok", file.display());
            } else {
                for error in errors {
                    println!("{}: {}", file.display(), error);
                }
                anyhow::bail!("{} configuration problem(s)", errors.len());
            }
        }
    }

    Ok(())
}
