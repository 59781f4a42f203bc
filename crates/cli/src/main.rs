use anyhow::Result;
use clap::{Parser, Subcommand};
use deckmate_core::config;
use deckmate_core::{configurer, manifest, patcher, saves, symlinks};

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let cfg = config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Manifest => manifest::run(&cfg),
        Commands::Patch => patcher::run(&cfg),
        Commands::Configure => configurer::run(&cfg),
        Commands::Saves { strategy } => saves::run(&cfg, strategy.as_deref()),
        Commands::Symlinks => symlinks::run(&cfg),
        Commands::Run => {
            manifest::run(&cfg)?;
            patcher::run(&cfg)?;
            configurer::run(&cfg)
        }
    }
}

#[derive(Parser)]
#[command(name = "deckmate")]
#[command(about = "Companion toolkit for a Linux gaming handheld", long_about = None)]
struct Cli {
    /// Path to config INI
    #[arg(short, long)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Detect game executables and (re)build launch manifests
    Manifest,
    /// Apply file patches to installed games
    Patch,
    /// Rewrite emulator and app config files
    Configure,
    /// Back up, restore, or synchronize game saves
    Saves {
        /// Override the configured strategy (backup|sync|restore)
        #[arg(long)]
        strategy: Option<String>,
    },
    /// Maintain configured symlinks
    Symlinks,
    /// Run manifest, patch, and configure in order
    Run,
}
