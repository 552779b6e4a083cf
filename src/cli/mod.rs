//! CLI entry point for Eartho One.

pub mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Eartho One CLI
#[derive(Parser, Debug)]
#[command(name = "eartho-one", version, about = "Eartho One login and token CLI")]
pub struct Cli {
    /// Client profile (TOML). Defaults to ~/.eartho/config.toml, then EARTHO_* variables.
    #[arg(long, global = true)]
    pub profile: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Log in through the browser and store the tokens
    Login(LoginArgs),
    /// Print a token, renewing it silently when needed
    Token(TokenArgs),
    /// Show whether a user is logged in
    Status,
    /// Clear stored tokens and end the provider session
    Logout(LogoutArgs),
}

/// Arguments for `eartho-one login`.
#[derive(Parser, Debug)]
pub struct LoginArgs {
    /// Extra scope to request
    #[arg(short, long)]
    pub scope: Option<String>,

    /// API audience
    #[arg(short, long)]
    pub audience: Option<String>,

    /// Access id to log in to
    #[arg(long)]
    pub access_id: Option<String>,
}

/// Arguments for `eartho-one token`.
#[derive(Parser, Debug)]
pub struct TokenArgs {
    /// Scope of the token
    #[arg(short, long)]
    pub scope: Option<String>,

    /// API audience
    #[arg(short, long)]
    pub audience: Option<String>,

    /// Print the access token instead of the ID token
    #[arg(long)]
    pub access: bool,

    /// Only read the cache; never renew
    #[arg(long, conflicts_with = "no_cache")]
    pub cache_only: bool,

    /// Ignore the cache and always renew
    #[arg(long)]
    pub no_cache: bool,
}

/// Arguments for `eartho-one logout`.
#[derive(Parser, Debug)]
pub struct LogoutArgs {
    /// Also end the upstream identity provider session
    #[arg(long)]
    pub federated: bool,

    /// Only clear local state
    #[arg(long)]
    pub local_only: bool,

    /// Clear every client stored in the cache
    #[arg(long)]
    pub all: bool,

    /// Where the provider sends the browser afterwards
    #[arg(long)]
    pub return_to: Option<String>,
}
