//! Global CLI options.

use std::path::PathBuf;

use clap::Args;

/// Options shared by every command; each can also be set via env vars.
#[derive(Args, Debug, Clone)]
pub struct GlobalOpts {
    /// Environment file loaded before reading configuration (env: LSYNC_ENV_FILE)
    #[arg(long, global = true, env = "LSYNC_ENV_FILE", default_value = ".env")]
    pub env_file: PathBuf,

    /// JSON output
    #[arg(long, global = true)]
    pub json: bool,

    /// Pretty-print JSON output (implies --json)
    #[arg(long, global = true)]
    pub pretty: bool,
}
