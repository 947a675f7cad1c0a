#[cfg(not(any(target_os = "macos", unix)))]
compile_error!("Only macos and unix are currently supported");

use std::path::PathBuf;

use clap::Parser;
use postern_common::envelope::QueueLevel;
use postern_delivery::Binding;

/// Deliver queued mail to its destinations.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Configuration file, instead of the usual search
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Queue tier to consume (high, medium, low)
    #[arg(long, short)]
    queue: Option<QueueLevel>,

    /// Source address and its reverse DNS name, as ip=rdns
    #[arg(long = "bind", short)]
    bindings: Vec<Binding>,

    /// Name to present in EHLO
    #[arg(long)]
    helo: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config_path = match args.config {
        Some(path) => path,
        None => postern::find_config_file()?,
    };
    let mut postern = postern::Postern::load(&config_path)?;

    if let Some(queue) = args.queue {
        postern.delivery.queue = queue;
    }
    if !args.bindings.is_empty() {
        postern.delivery.bindings = args.bindings;
    }
    if args.helo.is_some() {
        postern.delivery.helo = args.helo;
    }

    postern.send().await
}
