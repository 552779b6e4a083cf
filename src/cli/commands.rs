//! CLI command handlers for login, token, status, and logout.

use std::path::Path;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};

use super::{LoginArgs, LogoutArgs, TokenArgs};
use crate::auth::AuthorizationParams;
use crate::client::{CacheMode, EarthoOne, GetTokenSilentlyOptions, RedirectLoginOptions};
use crate::config::{CacheLocation, ClientOptions};
use crate::flow::Navigator;
use crate::session::{LogoutOptions, LogoutTarget};

type CliResult = Result<(), Box<dyn std::error::Error>>;

/// Prints the URL for the user to open; a terminal has no page to navigate.
struct PrintNavigator;

impl Navigator for PrintNavigator {
    fn assign(&self, url: &str) {
        println!("🔗 Open in your browser:\n{url}");
    }
}

/// Explicit profile, then `~/.eartho/config.toml`, then `EARTHO_*` variables.
/// The CLI always keeps tokens in the persistent cache.
pub fn load_options(profile: Option<&Path>) -> Result<ClientOptions, crate::error::AuthError> {
    let mut options = match profile {
        Some(path) => ClientOptions::load_from_path(path)?,
        None => {
            let default_profile = ClientOptions::default_cache_dir().join("config.toml");
            if default_profile.exists() {
                ClientOptions::load_from_path(default_profile)?
            } else {
                ClientOptions::from_env()?
            }
        }
    };
    options.cache_location = CacheLocation::LocalStorage;
    Ok(options)
}

fn client(options: ClientOptions) -> Result<EarthoOne, crate::error::AuthError> {
    EarthoOne::builder()
        .options(options)
        .navigator(Arc::new(PrintNavigator))
        .build()
}

fn params(scope: Option<String>, audience: Option<String>) -> AuthorizationParams {
    AuthorizationParams {
        scope,
        audience,
        ..AuthorizationParams::default()
    }
}

/// Handle `eartho-one login`.
pub async fn handle_login(options: ClientOptions, args: LoginArgs) -> CliResult {
    let client = client(options)?;
    let mut authorization_params = params(args.scope, args.audience);
    if let Some(access_id) = args.access_id {
        authorization_params = authorization_params.with_access_id(access_id);
    }
    client.connect_with_redirect(RedirectLoginOptions {
        authorization_params,
        app_state: None,
    })?;

    println!("📋 Paste the URL you were redirected to:");
    let mut line = String::new();
    BufReader::new(tokio::io::stdin())
        .read_line(&mut line)
        .await?;
    client.handle_redirect_callback(line.trim()).await?;

    match client.get_user().await? {
        Some(user) => println!(
            "✅ Logged in as {}",
            user.email().or(user.name()).unwrap_or(&user.sub)
        ),
        None => println!("✅ Logged in"),
    }
    Ok(())
}

/// Handle `eartho-one token`.
pub async fn handle_token(options: ClientOptions, args: TokenArgs) -> CliResult {
    let client = client(options)?;
    let cache_mode = if args.cache_only {
        CacheMode::CacheOnly
    } else if args.no_cache {
        CacheMode::Off
    } else {
        CacheMode::On
    };
    let response = client
        .get_token_silently_verbose(GetTokenSilentlyOptions {
            cache_mode,
            authorization_params: params(args.scope, args.audience),
            timeout: None,
        })
        .await?;
    if args.access {
        println!("{}", response.access_token);
    } else {
        println!("{}", response.id_token);
    }
    Ok(())
}

/// Handle `eartho-one status`.
pub async fn handle_status(options: ClientOptions) -> CliResult {
    let client_id = options.client_id.clone();
    let client = client(options)?;
    println!("Client: {client_id}");
    match client.get_user().await? {
        Some(user) => {
            println!("  ✅ Logged in as {}", user.sub);
            if let Some(email) = user.email() {
                println!("     {email}");
            }
        }
        None => println!("  ❌ Not logged in"),
    }
    Ok(())
}

/// Handle `eartho-one logout`.
pub async fn handle_logout(options: ClientOptions, args: LogoutArgs) -> CliResult {
    let client = client(options)?;
    client
        .logout(LogoutOptions {
            target: if args.all {
                LogoutTarget::All
            } else {
                LogoutTarget::Current
            },
            federated: args.federated,
            local_only: args.local_only,
            return_to: args.return_to,
            open_url: None,
        })
        .await?;
    println!("✅ Logged out");
    Ok(())
}
