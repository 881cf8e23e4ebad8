//! # botrt CLI
//!
//! Loads a bot state file into a runtime, runs one entry against it and
//! prints what the runtime emitted as JSON.

mod commands;
mod state;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "botrt")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to runtime configuration file
    #[arg(long, default_value = "botrt.yml", env = "BOTRT_CONFIG")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load a state file and report computed values and errors
    Check {
        /// State file (YAML or JSON)
        state: PathBuf,
    },

    /// Run a listener on every bot
    Shout {
        /// State file (YAML or JSON)
        state: PathBuf,

        /// Listener name
        name: String,

        /// Argument as JSON
        #[arg(long)]
        arg: Option<String>,

        /// Advance the virtual clock by this many milliseconds afterwards
        #[arg(long, default_value_t = 0)]
        advance: u64,
    },

    /// Run a listener on the given bots, in order
    Whisper {
        /// State file (YAML or JSON)
        state: PathBuf,

        /// Listener name
        name: String,

        /// Target bot ids (comma separated)
        #[arg(long, value_delimiter = ',', required = true)]
        bots: Vec<String>,

        /// Argument as JSON
        #[arg(long)]
        arg: Option<String>,

        /// Advance the virtual clock by this many milliseconds afterwards
        #[arg(long, default_value_t = 0)]
        advance: u64,
    },

    /// Run a script against the loaded bots
    Execute {
        /// State file (YAML or JSON)
        state: PathBuf,

        /// Script source
        script: String,

        /// Advance the virtual clock by this many milliseconds afterwards
        #[arg(long, default_value_t = 0)]
        advance: u64,
    },

    /// Feed a JSON array of actions through onStoryAction and execute them
    Process {
        /// State file (YAML or JSON)
        state: PathBuf,

        /// File holding the actions
        actions: PathBuf,

        /// Advance the virtual clock by this many milliseconds afterwards
        #[arg(long, default_value_t = 0)]
        advance: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let subscriber = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(if cli.verbose {
                tracing::Level::DEBUG.into()
            } else {
                tracing::Level::INFO.into()
            }),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Check { state } => commands::check(&cli.config, &state),
        Commands::Shout {
            state,
            name,
            arg,
            advance,
        } => {
            let entry = commands::Entry::Shout {
                name,
                targets: None,
                arg,
            };
            commands::run(&cli.config, &state, entry, advance)
        }
        Commands::Whisper {
            state,
            name,
            bots,
            arg,
            advance,
        } => {
            let entry = commands::Entry::Shout {
                name,
                targets: Some(bots),
                arg,
            };
            commands::run(&cli.config, &state, entry, advance)
        }
        Commands::Execute {
            state,
            script,
            advance,
        } => commands::run(&cli.config, &state, commands::Entry::Execute(script), advance),
        Commands::Process {
            state,
            actions,
            advance,
        } => commands::run(&cli.config, &state, commands::Entry::Process(actions), advance),
    }
}
