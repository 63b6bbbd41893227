pub use clap::Parser;

use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "vaultfs")]
#[command(about = "Encrypted, content-addressed file vault")]
pub struct Args {
    /// Path to the vault config directory (defaults to ~/.vaultfs)
    #[arg(long, global = true)]
    pub config_path: Option<PathBuf>,

    /// Access token; the session gets the permissions configured for it
    #[arg(long, global = true)]
    pub token: Option<String>,

    #[command(subcommand)]
    pub command: crate::Command,
}
