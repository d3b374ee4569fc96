mod cmd;
mod output;
mod root;

use clap::{Parser, Subcommand};
use cmd::{
    action::ActionSubcommand, config::ConfigSubcommand, doc::DocSubcommand,
    opportunity::OpportunitySubcommand, risk::RiskSubcommand, stage::StageSubcommand,
    template::TypeSubcommand,
};
use std::path::PathBuf;
use uuid::Uuid;

#[derive(Parser)]
#[command(
    name = "oppflow",
    about = "Stage-progression engine for business-development opportunities",
    version,
    propagate_version = true
)]
struct Cli {
    /// Project root (default: auto-detect from .oppflow/)
    #[arg(long, global = true, env = "OPPFLOW_ROOT")]
    root: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize an oppflow project in the current directory
    Init,

    /// Manage opportunity types and their stage templates
    Type {
        #[command(subcommand)]
        subcommand: TypeSubcommand,
    },

    /// Inspect and tune risk parameters
    Risk {
        #[command(subcommand)]
        subcommand: RiskSubcommand,
    },

    /// Create, list, and close opportunities
    Opportunity {
        #[command(subcommand)]
        subcommand: OpportunitySubcommand,
    },

    /// Move stages through their lifecycle
    Stage {
        #[command(subcommand)]
        subcommand: StageSubcommand,
    },

    /// Log and list stage actions
    Action {
        #[command(subcommand)]
        subcommand: ActionSubcommand,
    },

    /// Track stage documents
    Doc {
        #[command(subcommand)]
        subcommand: DocSubcommand,
    },

    /// Pipeline view: every stage with risk, priority, and deliverables
    Pipeline { opportunity_id: Uuid },

    /// Aggregate counts for one opportunity's pipeline
    Stats { opportunity_id: Uuid },

    /// Chronological timeline of actions and document events
    History { opportunity_id: Uuid },

    /// Re-evaluate risk on every open opportunity
    Sweep {
        /// Keep sweeping on an interval until Ctrl-C
        #[arg(long)]
        watch: bool,
        /// Seconds between sweeps (default: workflow.sweep_interval_secs)
        #[arg(long, requires = "watch")]
        interval: Option<u64>,
    },

    /// Validate the project configuration
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },

    /// Serve the HTTP API
    Serve {
        #[arg(long, default_value = "3141")]
        port: u16,
    },
}

fn main() {
    let cli = Cli::parse();
    let default_level = match &cli.command {
        Commands::Serve { .. } | Commands::Sweep { watch: true, .. } => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .init();

    let root = root::resolve_root(cli.root.as_deref());
    let json = cli.json;
    let result = match cli.command {
        Commands::Init => cmd::init::run(&root),
        Commands::Type { subcommand } => cmd::template::run(&root, subcommand, json),
        Commands::Risk { subcommand } => cmd::risk::run(&root, subcommand, json),
        Commands::Opportunity { subcommand } => cmd::opportunity::run(&root, subcommand, json),
        Commands::Stage { subcommand } => cmd::stage::run(&root, subcommand, json),
        Commands::Action { subcommand } => cmd::action::run(&root, subcommand, json),
        Commands::Doc { subcommand } => cmd::doc::run(&root, subcommand, json),
        Commands::Pipeline { opportunity_id } => cmd::report::pipeline(&root, opportunity_id, json),
        Commands::Stats { opportunity_id } => cmd::report::stats(&root, opportunity_id, json),
        Commands::History { opportunity_id } => cmd::report::history(&root, opportunity_id, json),
        Commands::Sweep { watch, interval } => cmd::sweep::run(&root, watch, interval, json),
        Commands::Config { subcommand } => cmd::config::run(&root, subcommand, json),
        Commands::Serve { port } => cmd::serve::run(&root, port),
    };
    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
