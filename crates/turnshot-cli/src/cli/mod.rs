//! CLI entry and dispatch.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use turnshot_core::config;

mod commands;

#[derive(Parser)]
#[command(name = "turnshot")]
#[command(version)]
#[command(about = "Export conversation turns as standalone PNG cards")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Override the turnshot home directory ($TURNSHOT_HOME or ~/.turnshot)
    #[arg(long, value_name = "DIR", global = true)]
    home: Option<PathBuf>,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Render selected turns of a transcript and deliver them to a viewer
    Export {
        /// Conversation transcript (JSONL)
        transcript: PathBuf,

        /// Output root for viewer session directories
        #[arg(short, long, default_value = "turnshot-out")]
        out: PathBuf,

        /// Turns to export: "all" or a 1-based list like "1,3-5"
        #[arg(long, default_value = "all")]
        turns: String,

        /// Render with this profile id instead of the active one
        #[arg(long, value_name = "ID")]
        profile: Option<String>,

        /// TrueType font for card text (default: first system font found)
        #[arg(long, value_name = "PATH")]
        font: Option<PathBuf>,
    },
    /// Inspect or switch style profiles
    Profiles {
        #[command(subcommand)]
        action: ProfilesAction,
    },
}

#[derive(clap::Subcommand)]
pub(crate) enum ProfilesAction {
    /// List profiles, marking the active one
    List,
    /// Record a new active profile id
    Use { id: String },
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let home = cli.home.unwrap_or_else(config::turnshot_home);
    match cli.command {
        Commands::Export {
            transcript,
            out,
            turns,
            profile,
            font,
        } => {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .context("starting async runtime")?;
            runtime.block_on(commands::export::run(
                &home,
                commands::export::ExportArgs {
                    transcript,
                    out,
                    turns,
                    profile,
                    font,
                },
            ))
        }
        Commands::Profiles { action } => commands::profiles::run(&home, &action),
    }
}

fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter =
        EnvFilter::try_from_env("TURNSHOT_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
