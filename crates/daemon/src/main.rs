use std::path::PathBuf;

use clap::{Parser, Subcommand};
use owo_colors::OwoColorize;
use tracing_subscriber::EnvFilter;

use cirrus_daemon::cli::op::{Op, OpContext};
use cirrus_daemon::cli::ops;

#[derive(Parser, Debug)]
#[command(name = "cirrus", version, about = "Write-back caching overlay of a remote content repository")]
struct Cli {
    /// Cirrus directory (defaults to $CIRRUS_HOME or ~/.cirrus)
    #[arg(long, global = true)]
    dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Initialize the cirrus directory and write the config file
    Init(ops::Init),
    /// Run the daemon in the foreground
    Run(ops::Run),
    /// Show queue and cache statistics of a running daemon
    Status(ops::Status),
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let ctx = OpContext {
        cirrus_dir: cli.dir,
    };

    let code = match cli.command {
        Command::Init(op) => dispatch(&op, &ctx).await,
        Command::Run(op) => dispatch(&op, &ctx).await,
        Command::Status(op) => dispatch(&op, &ctx).await,
    };
    std::process::exit(code);
}

async fn dispatch<O: Op>(op: &O, ctx: &OpContext) -> i32 {
    match op.execute(ctx).await {
        Ok(output) => {
            println!("{}", output);
            0
        }
        Err(err) => {
            eprintln!("{} {}", "error:".red().bold(), err);
            1
        }
    }
}
