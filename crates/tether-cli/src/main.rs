//! CLI entry point for tether.
//!
//! This binary provides the `tether` command for signing in to the identity
//! service, inspecting the current session and signing out.

mod callback;
mod config;
mod storage;

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use tether_auth::{AuthError, AuthOptions, AuthResult, AuthenticationManager, HttpIdentityClient};

use crate::callback::LoopbackHost;
use crate::config::{Config, DEFAULT_CONFIG_PATH, StorageBackend};

// ---------------------------------------------------------------------------
// CLI definition
// ---------------------------------------------------------------------------

/// tether: sign in to the identity service from the terminal.
#[derive(Parser)]
#[command(
    name = "tether",
    version,
    about = "Sign in to the identity service and manage the local session"
)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Override the configured storage backend.
    #[arg(long, global = true, value_enum)]
    storage: Option<StorageBackend>,

    /// Override the identity service base URL.
    #[arg(long, global = true)]
    identity_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Establish a session. Without options, resumes the stored one.
    Login(LoginArgs),

    /// Show the user behind the stored session.
    Whoami,

    /// Print the stored session token.
    Token,

    /// End the session and forget the stored token.
    Logout,
}

#[derive(Args)]
struct LoginArgs {
    /// Use an existing session token.
    #[arg(long)]
    token: Option<String>,

    /// Sign in with a handle; the password is read from stdin if not given.
    #[arg(long)]
    handle: Option<String>,

    #[arg(long, requires = "handle")]
    password: Option<String>,

    /// Sign in through a third-party provider in the browser.
    #[arg(long)]
    browser: bool,

    /// OAuth provider (github, linkedin).
    #[arg(long, requires = "browser")]
    provider: Option<String>,

    /// Callback URI registered with the identity service.
    #[arg(long, requires = "browser")]
    callback_uri: Option<String>,

    /// Correlation nonce for the authorization request.
    #[arg(long, requires = "browser")]
    nonce: Option<String>,

    /// Keep the session for this invocation only.
    #[arg(long)]
    no_store: bool,
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load(&cli.config)?;
    if let Some(backend) = cli.storage {
        config.storage.backend = backend;
    }
    if let Some(url) = cli.identity_url {
        config.identity.base_url = url;
    }

    init_tracing(&config.log_level);
    debug!(config = %cli.config.display(), backend = ?config.storage.backend, "configuration loaded");

    match cli.command {
        Commands::Login(args) => cmd_login(&config, args).await,
        Commands::Whoami => cmd_whoami(&config).await,
        Commands::Token => cmd_token(&config).await,
        Commands::Logout => cmd_logout(&config).await,
    }
}

// ---------------------------------------------------------------------------
// Subcommands
// ---------------------------------------------------------------------------

async fn build_manager(config: &Config) -> Result<AuthenticationManager> {
    let identity = HttpIdentityClient::new(&config.identity)
        .context("invalid identity service configuration")?;
    let store = storage::open_store(&config.storage).await?;
    Ok(AuthenticationManager::new(Arc::new(identity), store))
}

async fn cmd_login(config: &Config, args: LoginArgs) -> Result<()> {
    let mut manager = build_manager(config).await?;

    if args.browser {
        let host = LoopbackHost::bind(config.browser.callback_port, &config.handshake.callback_path)
            .await
            .with_context(|| {
                format!(
                    "failed to listen for the OAuth callback on port {}",
                    config.browser.callback_port
                )
            })?;
        manager = manager.with_browser(Arc::new(host), config.handshake.clone());
    }

    let password = match (&args.handle, args.password) {
        (Some(_), None) => Some(prompt_password()?),
        (_, password) => password,
    };

    let options = AuthOptions {
        token: args.token,
        handle: args.handle,
        password,
        use_browser: args.browser,
        oauth_provider: args.provider,
        callback_uri: args.callback_uri,
        nonce: args.nonce,
        no_store: args.no_store,
        ..AuthOptions::default()
    };

    if let Some(strategy) = manager.select_strategy(&options) {
        info!(strategy = strategy.name(), "signing in");
    }

    let result = manager.authenticate(&options).await.map_err(report)?;
    print_session(&result);
    Ok(())
}

async fn cmd_whoami(config: &Config) -> Result<()> {
    let manager = build_manager(config).await?;
    let result = manager
        .authenticate(&AuthOptions::default().no_store())
        .await
        .map_err(report)?;
    println!("{}", serde_json::to_string_pretty(&result.user)?);
    Ok(())
}

async fn cmd_token(config: &Config) -> Result<()> {
    let manager = build_manager(config).await?;
    match manager.stored_token().await? {
        Some(token) => {
            println!("{token}");
            Ok(())
        }
        None => bail!("no stored token"),
    }
}

async fn cmd_logout(config: &Config) -> Result<()> {
    let manager = build_manager(config).await?;
    manager.clear_stored_token().await?;
    println!("Signed out.");
    Ok(())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Prefix the error with its kind so scripts can match on it.
fn report(err: AuthError) -> anyhow::Error {
    anyhow::anyhow!("{:?}: {err}", err.kind())
}

fn print_session(result: &AuthResult) {
    let user = &result.user;
    if user.email.is_empty() {
        println!("Signed in as {}.", user.display_name());
    } else {
        println!("Signed in as {} <{}>.", user.display_name(), user.email);
    }
}

fn prompt_password() -> Result<String> {
    eprint!("Password: ");
    io::stderr().flush()?;

    let mut line = String::new();
    io::stdin()
        .lock()
        .read_line(&mut line)
        .context("failed to read password")?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

/// Initialize the global tracing subscriber.
fn init_tracing(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .compact()
        .init();
}
