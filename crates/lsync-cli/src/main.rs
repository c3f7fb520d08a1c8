mod commands;
mod opts;
mod output;
mod util;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::diff::DiffArgs;
use commands::ping::PingArgs;
use commands::serve::ServeArgs;
use commands::sign::SignArgs;
use opts::GlobalOpts;

#[derive(Parser, Debug)]
#[command(name = "lsync", version, about = "Table-to-ledger sync service")]
struct Cli {
    #[command(flatten)]
    opts: GlobalOpts,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the webhook server and reconciliation scheduler
    Serve(ServeArgs),

    /// Print the content MAC for a webhook body
    Sign(SignArgs),

    /// Send a signed webhook to a running server
    Ping(PingArgs),

    /// Reconcile one collection without committing
    Diff(DiffArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let opts = &cli.opts;
    util::load_env(&opts.env_file)?;

    match cli.command {
        Command::Serve(args) => commands::serve::cmd_serve(opts, &args).await,
        Command::Sign(args) => commands::sign::cmd_sign(opts, &args),
        Command::Ping(args) => commands::ping::cmd_ping(opts, &args).await,
        Command::Diff(args) => commands::diff::cmd_diff(opts, &args).await,
    }
}
