//! Eartho One CLI binary entry point.

use clap::Parser;
use eartho_one::cli::commands::{
    handle_login, handle_logout, handle_status, handle_token, load_options,
};
use eartho_one::cli::{Cli, Commands};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let options = match load_options(cli.profile.as_deref()) {
        Ok(options) => options,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Login(args) => handle_login(options, args).await,
        Commands::Token(args) => handle_token(options, args).await,
        Commands::Status => handle_status(options).await,
        Commands::Logout(args) => handle_logout(options, args).await,
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
