//! Command-line interface parsing and handling
//!
//! This module handles parsing command-line arguments and executing the appropriate commands.

pub mod auth;
pub mod say;
pub mod settings;

use std::error::Error;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::debug;

use crate::core::config::{Config, ConfigError};
use crate::core::keyring::resolve_api_key;
use crate::relay::{self, RelayState};
use crate::transport::http::DirectExchange;
use crate::transport::relay::RelayExchange;
use crate::transport::{Exchange, TransportClient};
use crate::utils::logging::init_tracing;

#[derive(Parser)]
#[command(name = "talkhead")]
#[command(about = "Drive a real-time talking avatar from the terminal")]
#[command(
    long_about = "talkhead opens a WebRTC session with a streaming avatar service, \
keeps it alive across network drops and speaks queued text in order.\n\n\
Authentication:\n\
  Use 'talkhead auth' to store the API key in your system keyring.\n\n\
Environment Variables (checked before the keyring):\n\
  TALKHEAD_API_KEY  API key for the avatar service\n\
  DID_API_KEY       Alternative name for the same key\n\
  RUST_LOG          Log filter (overrides -v)"
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to the config file (defaults to the platform config directory)
    #[arg(short = 'c', long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Log debug output to stderr
    #[arg(short = 'v', long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Connect, speak each text in order, then close
    Say {
        /// Texts to speak; each argument is one message
        #[arg(required = true)]
        texts: Vec<String>,
    },
    /// Run the forwarding endpoint that holds the API key
    Relay {
        /// Address to listen on (overrides relay.listen)
        #[arg(short = 'l', long, value_name = "ADDR")]
        listen: Option<String>,
    },
    /// Store the API key in the system keyring
    Auth,
    /// Remove the API key from the system keyring
    Deauth,
    /// Show or initialize configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Print build information
    Version,
}

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Print the effective configuration
    Show,
    /// Write a config file with default values
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

pub fn main() -> Result<(), Box<dyn Error>> {
    tokio::runtime::Runtime::new()?.block_on(async_main())
}

async fn async_main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    init_tracing(args.verbose);

    match args.command {
        Commands::Say { texts } => {
            let config = load_config(args.config.as_deref())?;
            say::run_say(&config, texts).await
        }
        Commands::Relay { listen } => {
            let config = load_config(args.config.as_deref())?;
            run_relay(&config, listen).await
        }
        Commands::Auth => {
            if let Err(e) = auth::store_interactively() {
                eprintln!("❌ Authentication failed: {e}");
                std::process::exit(1);
            }
            Ok(())
        }
        Commands::Deauth => {
            if let Err(e) = auth::remove() {
                eprintln!("❌ Deauthentication failed: {e}");
                std::process::exit(1);
            }
            Ok(())
        }
        Commands::Config { action } => {
            let path = Config::resolve_path(args.config.as_deref())?;
            match action {
                ConfigAction::Show => settings::show(&path),
                ConfigAction::Init { force } => settings::init(&path, force),
            }
        }
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

fn load_config(explicit: Option<&Path>) -> Result<Config, ConfigError> {
    let path = Config::resolve_path(explicit)?;
    debug!(path = %path.display(), "loading config");
    Config::load_from_path(&path)
}

/// Direct calls need the key locally; relayed calls leave it to the relay.
pub fn build_transport(config: &Config) -> Result<TransportClient, Box<dyn Error>> {
    let client = reqwest::Client::new();
    let exchange: Arc<dyn Exchange> = match config.api.relay_url.as_deref() {
        Some(relay_url) => {
            debug!(relay_url, "routing vendor calls through relay");
            Arc::new(RelayExchange::new(client, relay_url))
        }
        None => {
            let resolved = resolve_api_key()?.ok_or(
                "No API key found. Run 'talkhead auth' or set TALKHEAD_API_KEY.",
            )?;
            debug!(source = ?resolved.source, "using API key");
            Arc::new(DirectExchange::new(client, &config.api.base_url, resolved.key))
        }
    };
    Ok(TransportClient::new(exchange, config.retry_policy()))
}

async fn run_relay(config: &Config, listen: Option<String>) -> Result<(), Box<dyn Error>> {
    let listen = listen.unwrap_or_else(|| config.relay.listen.clone());
    let addr: SocketAddr = listen
        .parse()
        .map_err(|err| format!("Invalid listen address '{listen}': {err}"))?;
    let api_key = resolve_api_key()?.map(|resolved| resolved.key);
    if api_key.is_none() {
        eprintln!("⚠️  No API key configured; relayed calls will fail with 500 until one is set.");
    }
    eprintln!("🚀 Relay forwarding to {} on http://{addr}", config.api.base_url);
    relay::serve(RelayState::new(&config.api.base_url, api_key), addr).await
}

fn print_version() {
    println!("talkhead {}", env!("CARGO_PKG_VERSION"));
    println!(
        "  git:     {} ({})",
        option_env!("VERGEN_GIT_DESCRIBE").unwrap_or("unknown"),
        option_env!("VERGEN_GIT_SHA").unwrap_or("unknown")
    );
    println!(
        "  built:   {}",
        option_env!("VERGEN_BUILD_TIMESTAMP").unwrap_or("unknown")
    );
    println!(
        "  rustc:   {}",
        option_env!("VERGEN_RUSTC_SEMVER").unwrap_or("unknown")
    );
    println!(
        "  target:  {}",
        option_env!("VERGEN_CARGO_TARGET_TRIPLE").unwrap_or("unknown")
    );
    println!(
        "  webrtc:  {}",
        if cfg!(feature = "webrtc") { "enabled" } else { "disabled" }
    );
}
