use std::path::PathBuf;

use clap::{ArgAction, CommandFactory, Parser, Subcommand};
use cli::handlers::{LoadRequest, handle_load, handle_loaders};
use sae_loaders::Device;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "sae_cli", version, about = "Load pretrained sparse autoencoders")]
struct Cli {
    /// Raise log verbosity (-v info, -vv debug)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// List registered loader names
    Loaders,
    /// Load an SAE and print its config and tensors
    Load {
        /// Registered loader name
        loader: String,
        /// Hub repository id
        repo_id: String,
        /// Folder or file inside the repository
        source_path: String,
        /// cpu, cuda, cuda:<ordinal> or mps
        #[arg(long)]
        device: Option<Device>,
        /// Download again even if the files are cached
        #[arg(long)]
        force_download: bool,
        /// Read `<dir>/<repo_id>/...` instead of the hub
        #[arg(long)]
        local_dir: Option<PathBuf>,
        /// Print only the config as JSON
        #[arg(long)]
        json: bool,
    },
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| level.into());
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Some(Commands::Loaders) => {
            handle_loaders();
        },
        Some(Commands::Load {
            loader,
            repo_id,
            source_path,
            device,
            force_download,
            local_dir,
            json,
        }) => {
            handle_load(LoadRequest {
                loader,
                repo_id,
                source_path,
                device,
                force_download,
                local_dir,
                json,
            })?;
        },
        None => {
            let mut cmd = Cli::command();
            cmd.print_help()?;
        },
    }
    Ok(())
}
