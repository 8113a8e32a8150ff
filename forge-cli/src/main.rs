use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "forge")]
#[command(about = "Standalone build assembler", long_about = None, version)]
struct Cli {
    /// Be more verbose
    #[arg(long, global = true)]
    debug: bool,

    /// Config file with worker infos
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build from a definition file
    Bake {
        /// Targets or groups to build (defaults to "default")
        targets: Vec<String>,

        /// Build definition file
        #[arg(short, long)]
        file: Vec<PathBuf>,

        /// Override target value (eg: targetpattern.key=value)
        #[arg(long = "set")]
        set: Vec<String>,

        /// Print options without building
        #[arg(long)]
        print: bool,

        /// Only use the named build nodes
        #[arg(long)]
        nodes: Vec<String>,
    },

    /// Interact with build nodes
    #[command(subcommand)]
    Nodes(NodesCommands),

    /// Generate node group configs
    #[command(subcommand)]
    Generate(GenerateCommands),
}

#[derive(Subcommand)]
enum NodesCommands {
    /// List build nodes
    #[command(alias = "ls")]
    List,
}

#[derive(Subcommand)]
enum GenerateCommands {
    /// Generate a single-node docker node group config
    Docker {
        /// Worker daemon address
        #[arg(short = 'H', long)]
        host: String,

        /// Platforms supported by this worker
        #[arg(long)]
        platform: Vec<String>,
    },
}

fn init_logging(debug: bool) {
    let filter = if debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into())
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.debug);
    if cli.debug {
        tracing::debug!("debug output enabled");
    }

    match cli.command {
        Commands::Bake { targets, file, set, print, nodes } => {
            commands::bake::run(cli.config.as_deref(), targets, file, set, print, nodes).await
        }
        Commands::Nodes(NodesCommands::List) => commands::nodes::list(cli.config.as_deref()),
        Commands::Generate(GenerateCommands::Docker { host, platform }) => {
            commands::generate::docker(host, platform)
        }
    }
}
