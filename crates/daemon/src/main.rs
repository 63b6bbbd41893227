// CLI modules
mod cli;

use clap::{Parser, Subcommand};
use cli::{
    args::Args, op::Op, Cat, Init, Ls, Mkdir, Mv, Put, Rm, Rmdir, Stat, Truncate, Version,
};
use vaultfs_daemon::process::init_logging;
use vaultfs_daemon::state::AppState;

#[cfg(feature = "fuse")]
use cli::Mount;

#[cfg(feature = "fuse")]
command_enum! {
    (Init, Init),
    (Put, Put),
    (Cat, Cat),
    (Ls, Ls),
    (Stat, Stat),
    (Mkdir, Mkdir),
    (Rm, Rm),
    (Rmdir, Rmdir),
    (Mv, Mv),
    (Truncate, Truncate),
    (Mount, Mount),
    (Version, Version),
}

#[cfg(not(feature = "fuse"))]
command_enum! {
    (Init, Init),
    (Put, Put),
    (Cat, Cat),
    (Ls, Ls),
    (Stat, Stat),
    (Mkdir, Mkdir),
    (Rm, Rm),
    (Rmdir, Rmdir),
    (Mv, Mv),
    (Truncate, Truncate),
    (Version, Version),
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Log with the vault's settings when there is a vault, defaults otherwise
    let config = AppState::load(args.config_path.clone())
        .map(|state| state.config)
        .unwrap_or_default();
    let guards = match init_logging(&config) {
        Ok(guards) => guards,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let ctx = cli::op::OpContext::new(args.config_path, args.token);

    match args.command.execute(&ctx).await {
        Ok(output) => {
            println!("{}", output);
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            // flush buffered log lines before exiting
            drop(guards);
            std::process::exit(1);
        }
    }
}
