mod bridge;
mod ritual;

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context};
use clap::{CommandFactory, Parser, Subcommand};
use serde_json::Value;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use midio_codec::{DiscMetadata, LoadMode, Library};
use midio_core::config::dirs_home;
use midio_core::AppConfig;
use midio_loom::{Loom, WeaveOutcome};
use midio_molt::{MoltEvaluator, MoltRecord};

#[derive(Parser)]
#[command(name = "midio", version, about = "Node-graph workflow engine")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "midio.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one pass over a loom and print the outcome
    Weave {
        #[command(flatten)]
        source: DiscArgs,
        /// Initial input for a node, as NAME=JSON (repeatable)
        #[arg(short, long = "input", value_name = "NAME=JSON")]
        inputs: Vec<String>,
    },
    /// Show the execution order and wiring of a loom
    Topology {
        #[command(flatten)]
        source: DiscArgs,
    },
    /// Weave once, then evaluate drift against the molt threshold
    Molt {
        #[command(flatten)]
        source: DiscArgs,
        /// Override the configured drift threshold
        #[arg(long)]
        threshold: Option<f64>,
        /// Initial input for a node, as NAME=JSON (repeatable)
        #[arg(short, long = "input", value_name = "NAME=JSON")]
        inputs: Vec<String>,
    },
    /// Burn the built-in morning ritual to a disc
    Burn {
        /// Write the disc to this path
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Also save the disc into the library
        #[arg(long)]
        save: bool,
        /// Replace an existing library entry
        #[arg(long)]
        overwrite: bool,
        #[arg(long, default_value = "")]
        author: String,
    },
    /// Manage the local disc library
    Library {
        #[command(subcommand)]
        action: LibraryAction,
    },
    /// Serve JSON requests line by line on stdin/stdout
    Bridge,
    /// Show current configuration
    Config,
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[derive(clap::Args)]
struct DiscArgs {
    /// Disc file or library entry. Defaults to the built-in morning ritual.
    #[arg(short, long)]
    disc: Option<String>,
    /// Drop dangling references and unknown handlers instead of failing
    #[arg(long)]
    lenient: bool,
}

#[derive(Subcommand)]
enum LibraryAction {
    /// List discs in the library
    List,
    /// Print a disc's summary
    Show {
        name: String,
    },
    /// Remove a disc from the library
    Remove {
        name: String,
    },
    /// Copy a disc file into the library
    Import {
        path: PathBuf,
        #[arg(long)]
        overwrite: bool,
    },
    /// Write a library disc out to a file
    Export {
        name: String,
        dest: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("midio=info,warn")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // Handle completions before config loading
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(*shell, &mut cmd, "midio", &mut std::io::stdout());
        return Ok(());
    }

    let config = load_config(&cli.config)?;

    match cli.command {
        Commands::Weave { source, inputs } => {
            let mut loom = open_loom(&source, &config)?;
            let inputs = parse_inputs(&loom, &inputs)?;
            let outcome = loom.weave(inputs)?;
            let name = loom.name().to_string();
            let report = bridge::weave_report(&name, &loom, &outcome, config.loom.log_tail)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            for id in outcome.failed() {
                if let Some(node) = loom.node(id) {
                    eprintln!("Node '{}' failed", node.name);
                }
            }
        }
        Commands::Topology { source } => {
            let loom = open_loom(&source, &config)?;
            print_topology(&loom)?;
        }
        Commands::Molt {
            source,
            threshold,
            inputs,
        } => {
            let mut loom = open_loom(&source, &config)?;
            let inputs = parse_inputs(&loom, &inputs)?;
            let outcome = loom.weave(inputs)?;

            let mut evaluator = MoltEvaluator::from_config(&config.molt);
            if let Some(t) = threshold {
                evaluator.set_threshold(t);
            }
            let drift = evaluator.assess_drift(loom.nodes());
            for node in loom.nodes() {
                println!(
                    "  {:<20} drift {:.3}",
                    node.name,
                    drift.get(&node.id).copied().unwrap_or_default()
                );
            }

            match recommend_molt(&loom, &outcome, &mut evaluator) {
                Some(record) => {
                    let names: Vec<&str> = record
                        .degraded_nodes
                        .iter()
                        .filter_map(|id| loom.node(id).map(|n| n.name.as_str()))
                        .collect();
                    println!("Molt recommended: {} ({})", record.reason, names.join(", "));
                    // The ledger lives in this process only; print it so the
                    // decision is not lost.
                    println!("{}", serde_json::to_string_pretty(evaluator.history())?);
                }
                None => println!("No molt needed (threshold {})", evaluator.threshold()),
            }
        }
        Commands::Burn {
            output,
            save,
            overwrite,
            author,
        } => {
            let loom = ritual::build(&config.loom, config.molt.drift_threshold)?;
            let metadata = DiscMetadata::new(ritual::LOOM_NAME)
                .with_author(author)
                .with_description("Fetch mail, summarize, plan, log and verify drift");
            let disc = midio_codec::burn(&loom, metadata);

            if output.is_none() && !save {
                println!("{}", disc.to_json()?);
            }
            if let Some(path) = output {
                std::fs::write(&path, disc.to_json()?)
                    .with_context(|| format!("writing {}", path.display()))?;
                println!("Burned {} to {}", disc.metadata.name, path.display());
            }
            if save {
                let path = open_library(&config)?.save(&disc, overwrite)?;
                println!("Saved {} to {}", disc.metadata.name, path.display());
            }
        }
        Commands::Library { action } => {
            let library = open_library(&config)?;
            match action {
                LibraryAction::List => {
                    let discs = library.list_detailed()?;
                    if discs.is_empty() {
                        println!("No discs in {}", library.path().display());
                    }
                    for d in discs {
                        let auth = if d.auth_required.is_empty() {
                            String::new()
                        } else {
                            format!(" [auth: {}]", d.auth_required.join(", "))
                        };
                        println!("  - {} v{} ({} tracks){}", d.name, d.version, d.tracks, auth);
                    }
                }
                LibraryAction::Show { name } => {
                    println!("{}", library.load(&name)?.preview());
                }
                LibraryAction::Remove { name } => {
                    if library.remove(&name)? {
                        println!("Removed disc '{}'", name);
                    } else {
                        eprintln!("Disc '{}' not found", name);
                    }
                }
                LibraryAction::Import { path, overwrite } => {
                    let disc = library.import(&path, overwrite)?;
                    println!("Imported disc '{}'", disc.metadata.name);
                }
                LibraryAction::Export { name, dest } => {
                    let path = library.export(&name, &dest)?;
                    println!("Exported disc '{}' to {}", name, path.display());
                }
            }
        }
        Commands::Bridge => {
            let library = match Library::new(config.library_dir()) {
                Ok(lib) => Some(lib),
                Err(e) => {
                    warn!(error = %e, "Disc library unavailable; serving built-in looms only");
                    None
                }
            };
            bridge::run(config, library).await?;
        }
        Commands::Config => {
            println!("{}", toml::to_string_pretty(&config)?);
        }
        Commands::Completions { .. } => unreachable!("handled before config load"),
    }

    Ok(())
}

/// Record a molt when drift crosses the threshold or a guard stopped the
/// pass. Returns the new ledger entry.
fn recommend_molt<'e>(
    loom: &Loom,
    outcome: &WeaveOutcome,
    evaluator: &'e mut MoltEvaluator,
) -> Option<&'e MoltRecord> {
    let (should_molt, degraded) = evaluator.should_molt(loom.nodes());
    if !should_molt && !outcome.is_interrupted() {
        return None;
    }
    let reason = if outcome.is_interrupted() {
        "guard interrupted the weave".to_string()
    } else {
        format!("drift at or above {}", evaluator.threshold())
    };
    evaluator.record_molt(reason, degraded, "recommend_molt");
    evaluator.history().last()
}

fn load_config(path: &Path) -> anyhow::Result<AppConfig> {
    if path.exists() {
        return Ok(AppConfig::load(path)?);
    }
    if let Some(home_config) = dirs_home().map(|h| h.join(".midio").join("config.toml")) {
        if home_config.exists() {
            info!(path = %home_config.display(), "Loading config from home directory");
            return Ok(AppConfig::load(&home_config)?);
        }
    }
    Ok(AppConfig::default())
}

fn open_library(config: &AppConfig) -> anyhow::Result<Library> {
    let dir = config.library_dir();
    Library::new(&dir).with_context(|| format!("opening library at {}", dir.display()))
}

/// Build the loom named by `--disc`: a file path, then a library entry,
/// then the built-in ritual when nothing is given.
fn open_loom(args: &DiscArgs, config: &AppConfig) -> anyhow::Result<Loom> {
    let Some(source) = &args.disc else {
        return Ok(ritual::build(&config.loom, config.molt.drift_threshold)?);
    };

    let path = Path::new(source);
    let disc = if path.exists() {
        midio_codec::load_file(path)?
    } else {
        let library = open_library(config)?;
        if !library.exists(source) {
            return Err(anyhow!("No disc file or library entry named '{}'", source));
        }
        library.load(source)?
    };

    let mode = if args.lenient {
        LoadMode::Lenient
    } else {
        LoadMode::from_strict(config.codec.strict)
    };
    Ok(midio_codec::load_with(
        &disc,
        &ritual::registry(),
        mode,
        &config.loom,
    )?)
}

/// Parse `NAME=JSON` pairs. A value that is not valid JSON is taken as a
/// plain string.
fn parse_inputs(loom: &Loom, raw: &[String]) -> anyhow::Result<HashMap<midio_canvas::NodeId, Value>> {
    let mut inputs = HashMap::new();
    for pair in raw {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| anyhow!("Input '{}' is not NAME=JSON", pair))?;
        let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
        inputs.insert(bridge::resolve_node(loom, key)?, value);
    }
    Ok(inputs)
}

fn print_topology(loom: &Loom) -> anyhow::Result<()> {
    let order = loom.execution_order()?;
    let topology = loom.topology();
    println!("Loom '{}' ({} nodes)", loom.name(), loom.len());
    for (i, id) in order.iter().enumerate() {
        let Some(node) = loom.node(id) else {
            continue;
        };
        let downstream: Vec<&str> = topology
            .get(id)
            .into_iter()
            .flatten()
            .filter_map(|t| loom.node(t).map(|n| n.name.as_str()))
            .collect();
        let arrow = if downstream.is_empty() {
            String::new()
        } else {
            format!(" -> {}", downstream.join(", "))
        };
        println!(
            "  {:2}. {} ({}) [{}]{}",
            i + 1,
            node.name,
            node.kind,
            node.behavior().handler(),
            arrow
        );
    }

    println!("Layers:");
    for (depth, layer) in loom.layers()?.iter().enumerate() {
        let names: Vec<&str> = layer
            .iter()
            .filter_map(|id| loom.node(id).map(|n| n.name.as_str()))
            .collect();
        println!("  {}: {}", depth, names.join(", "));
    }
    Ok(())
}
