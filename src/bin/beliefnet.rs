//! Beliefnet CLI binary.
//!
//! # Commands
//!
//! - `run` - Run a simulation and write its logs
//! - `replay` - Replay one interaction from a JSONL log
//! - `topology` - Show a network's connectivity or export it as DOT
//! - `config` - Print the effective configuration

use std::fs::File;
use std::io::{BufWriter, IsTerminal};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use anyhow::Context;
use beliefnet::{
    backend::{self, Provider},
    config::{parse_seed, SimulationConfig},
    events::{JsonlSink, Replay, TextLogSink},
    present::{self, Console},
    GridDims, Simulation, Topology, TopologyKind, VERSION,
};
use clap::{Args, Parser, Subcommand};

/// Conventional exit status for SIGINT (128 + 2)
const INTERRUPTED_EXIT_CODE: i32 = 130;

#[derive(Parser)]
#[command(name = "beliefnet")]
#[command(version = VERSION)]
#[command(about = "Belief propagation through LLM-mediated debates on agent networks", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a simulation
    Run(RunArgs),

    /// Replay one interaction from a JSONL log
    Replay {
        /// JSONL log written by `run`
        log: PathBuf,

        /// Iteration to replay (1-based)
        index: u32,

        /// Fixed delay between utterances in milliseconds
        #[arg(long, default_value = "800")]
        delay_ms: u64,

        /// Reproduce the original pacing instead of a fixed delay
        #[arg(long)]
        realtime: bool,
    },

    /// Show network connectivity
    Topology {
        /// Variant (grid4, grid8, ring, mesh, star)
        kind: String,

        /// Number of agents
        #[arg(short, long, default_value = "9")]
        agents: usize,

        /// Grid rows
        #[arg(long, requires = "cols")]
        rows: Option<usize>,

        /// Grid columns
        #[arg(long, requires = "rows")]
        cols: Option<usize>,

        /// Emit Graphviz DOT
        #[arg(long)]
        dot: bool,
    },

    /// Print the effective configuration as TOML
    Config {
        /// Config file (default: user config dir, if present)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Config file (default: user config dir, if present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Iterations to run
    #[arg(short, long)]
    iterations: Option<u32>,

    /// Rounds per conversation
    #[arg(short, long)]
    rounds: Option<u32>,

    /// Seed, or "none" for an unseeded run
    #[arg(short, long)]
    seed: Option<String>,

    /// Topology (grid4, grid8, ring, mesh, star)
    #[arg(short, long)]
    topology: Option<String>,

    /// Number of agents
    #[arg(short, long)]
    agents: Option<usize>,

    /// Grid rows
    #[arg(long, requires = "cols")]
    rows: Option<usize>,

    /// Grid columns
    #[arg(long, requires = "rows")]
    cols: Option<usize>,

    /// JSON belief file ({"beliefs": [...]})
    #[arg(short, long)]
    beliefs: Option<PathBuf>,

    /// Collaborator provider (ollama, openai, scripted)
    #[arg(long)]
    provider: Option<String>,

    /// Model identifier
    #[arg(short, long)]
    model: Option<String>,

    /// Backend base URL
    #[arg(long)]
    endpoint: Option<String>,

    /// Directory for run logs
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Skip the human-readable text log
    #[arg(long)]
    no_text_log: bool,

    /// Use the offline scripted collaborator
    #[arg(long)]
    dry_run: bool,

    /// No console presentation
    #[arg(short, long)]
    quiet: bool,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,

    /// JSON diagnostics on stderr
    #[arg(long)]
    log_json: bool,

    /// Write the final report as JSON
    #[arg(short, long)]
    output: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => cmd_run(args),
        Commands::Replay {
            log,
            index,
            delay_ms,
            realtime,
        } => cmd_replay(&log, index, delay_ms, realtime),
        Commands::Topology {
            kind,
            agents,
            rows,
            cols,
            dot,
        } => cmd_topology(&kind, agents, rows.zip(cols), dot),
        Commands::Config { config } => cmd_config(config.as_deref()),
    }
}

fn init_tracing(verbose: bool, json: bool) {
    let log_level = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<SimulationConfig> {
    let config = match path {
        Some(path) => SimulationConfig::from_file(path)?,
        None => match SimulationConfig::default_path().filter(|p| p.exists()) {
            Some(path) => {
                tracing::debug!("Using config {}", path.display());
                SimulationConfig::from_file(path)?
            },
            None => SimulationConfig::default(),
        },
    };
    Ok(config.with_env_overrides()?)
}

fn apply_args(config: &mut SimulationConfig, args: &RunArgs) -> anyhow::Result<()> {
    if let Some(iterations) = args.iterations {
        config.simulation.iterations = iterations;
    }
    if let Some(rounds) = args.rounds {
        config.simulation.rounds = rounds;
    }
    if let Some(seed) = &args.seed {
        config.simulation.seed = parse_seed(seed)?;
    }
    if let Some(kind) = &args.topology {
        config.topology.kind = kind.parse()?;
    }
    if let Some(agents) = args.agents {
        config.topology.agents = agents;
    }
    if args.rows.is_some() {
        config.topology.rows = args.rows;
        config.topology.cols = args.cols;
    }
    if let Some(beliefs) = &args.beliefs {
        config.beliefs.file = Some(beliefs.clone());
    }
    if let Some(provider) = &args.provider {
        config.backend.provider = provider.parse()?;
    }
    if let Some(model) = &args.model {
        config.backend.model = model.clone();
    }
    if let Some(endpoint) = &args.endpoint {
        config.backend.endpoint = Some(endpoint.clone());
    }
    if let Some(dir) = &args.log_dir {
        config.log.dir = dir.clone();
    }
    if args.no_text_log {
        config.log.text_log = false;
    }
    if args.dry_run {
        config.backend.provider = Provider::Scripted;
    }
    Ok(())
}

fn cmd_run(args: RunArgs) -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing(args.verbose, args.log_json);

    let mut config = load_config(args.config.as_deref())?;
    apply_args(&mut config, &args)?;

    let collaborator = backend::from_config(&config.backend)?;
    let mut sim = Simulation::new(config.clone(), collaborator)?;

    std::fs::create_dir_all(&config.log.dir)
        .with_context(|| format!("creating log dir {}", config.log.dir.display()))?;
    let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
    let jsonl_path = config.log.dir.join(format!("simulation_{stamp}.jsonl"));
    sim.add_sink(Box::new(JsonlSink::create(&jsonl_path)?));
    let text_path = config.log.dir.join(format!("simulation_{stamp}.log"));
    if config.log.text_log {
        sim.add_sink(Box::new(TextLogSink::create(&text_path)?));
    }

    tracing::info!("Run {} logging to {}", sim.run_id(), jsonl_path.display());

    let console = Console::new(std::io::stdout().is_terminal());
    let quiet = args.quiet;

    let runtime = tokio::runtime::Runtime::new()?;
    let report = runtime.block_on(async move {
        let presenter = (!quiet).then(|| tokio::spawn(present::follow(sim.subscribe(), console)));

        let stop = sim.stop_handle();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_err() {
                return;
            }
            tracing::warn!("Interrupted; stopping after the current iteration (Ctrl-C again to abort)");
            stop.request_stop();

            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Aborted; logs end at the last completed record");
                std::process::exit(INTERRUPTED_EXIT_CODE);
            }
        });

        let report = sim.run().await;
        if let Some(presenter) = presenter {
            presenter.await.ok();
        }
        report
    })?;

    if let Some(path) = &args.output {
        let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
        serde_json::to_writer_pretty(BufWriter::new(file), &report)?;
        tracing::info!("Report written to {}", path.display());
    }

    println!("Event log: {}", jsonl_path.display());
    if config.log.text_log {
        println!("Text log:  {}", text_path.display());
    }
    Ok(())
}

fn cmd_replay(log: &Path, index: u32, delay_ms: u64, realtime: bool) -> anyhow::Result<()> {
    let replay = Replay::from_path(log)?;
    let total = replay.info()?.iterations;
    let interaction = replay.interaction(index)?;
    let console = Console::new(std::io::stdout().is_terminal());

    print!(
        "{}",
        console.interaction_header(interaction.iteration, total, &interaction.context)
    );

    let pacing = interaction.pacing();
    for (utterance, gap) in interaction.utterances.iter().zip(pacing) {
        thread::sleep(if realtime {
            gap
        } else {
            Duration::from_millis(delay_ms)
        });
        print!("{}", console.utterance(utterance));
    }

    match (&interaction.outcome, &interaction.failure) {
        (Some(outcome), _) => print!("{}", console.decision(outcome)),
        (None, Some(error)) => println!("  SKIPPED: {error}"),
        (None, None) => println!("  (log ends before a decision)"),
    }
    Ok(())
}

fn cmd_topology(
    kind: &str,
    agents: usize,
    dims: Option<(usize, usize)>,
    dot: bool,
) -> anyhow::Result<()> {
    let kind: TopologyKind = kind.parse()?;
    let dims = dims.map(|(rows, cols)| GridDims { rows, cols });
    let topology = Topology::build(kind, agents, dims)?;

    if dot {
        println!("{}", topology.to_dot());
        return Ok(());
    }

    print!("{}", topology.describe());
    Ok(())
}

fn cmd_config(path: Option<&Path>) -> anyhow::Result<()> {
    let config = load_config(path)?;
    config.validate()?;
    print!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}
