#![forbid(unsafe_code)]

mod cmd;
mod output;

use clap::{Parser, Subcommand};
use output::{OutputMode, resolve_output_mode};
use std::env;
use std::path::PathBuf;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "trellis: project boards stored as mergeable operation logs",
    long_about = None
)]
struct Cli {
    /// Repository root holding the `.trellis/` store.
    #[arg(long, global = true, default_value = ".")]
    repo: PathBuf,

    /// Emit JSON output instead of human-readable text.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

impl Cli {
    fn output_mode(&self) -> OutputMode {
        resolve_output_mode(self.json)
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create the `.trellis/` store and a default config.
    Init(cmd::init::InitArgs),

    /// Manage identities.
    User {
        #[command(subcommand)]
        command: cmd::user::UserCommand,
    },

    /// Create, edit and inspect boards.
    Board {
        #[command(subcommand)]
        command: cmd::board::BoardCommand,
    },

    /// Merge every board from another repository and commit the result.
    Sync(cmd::sync::SyncArgs),
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("TRELLIS_LOG").unwrap_or_else(|_| {
        EnvFilter::new(if env::var("DEBUG").is_ok() {
            "trellis=debug,info"
        } else {
            "trellis=info,warn"
        })
    });

    let format = env::var("TRELLIS_LOG_FORMAT").unwrap_or_else(|_| "compact".to_string());

    let registry = tracing_subscriber::registry().with(filter);

    match format.as_str() {
        "json" => {
            registry
                .with(fmt::layer().json().with_ansi(false).with_writer(std::io::stderr))
                .init();
        }
        _ => {
            registry
                .with(fmt::layer().compact().with_writer(std::io::stderr))
                .init();
        }
    }
}

fn main() -> anyhow::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let output = cli.output_mode();
    let root = cli.repo.as_path();

    match &cli.command {
        Commands::Init(args) => cmd::init::run_init(args, output, root),
        Commands::User { command } => cmd::user::run_user(command, output, root),
        Commands::Board { command } => cmd::board::run_board(command, output, root),
        Commands::Sync(args) => cmd::sync::run_sync(args, output, root),
    }
}
