//! # OneSource CLI (`onesource`)
//!
//! ## Usage
//!
//! ```bash
//! onesource --config ./config/onesource.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `onesource ask "<question>"` | Ask the backend and print the answer |
//! | `onesource trace <id>` | Show the retrieval trace for an answer |
//! | `onesource connections` | Show which providers are linked |
//! | `onesource connect <provider>` | Link a provider through the browser |
//! | `onesource disconnect <provider>` | Unlink a provider |
//! | `onesource install <provider>` | Open the provider's install page |
//! | `onesource health` | Check that the backend is up |
//! | `onesource shell` | Interactive session |
//!
//! ## Examples
//!
//! ```bash
//! onesource --base-url http://localhost:8000 ask "how do I roll back a deploy?"
//! onesource trace 7f3c2a
//! onesource connect github
//! ONESOURCE_BASE_URL=https://onesource.internal onesource shell
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use onesource_client::contract::Provider;
use onesource_client::{app, ask, config, connections, health, logging, trace};

/// OneSource: ask questions across your workspace tools.
///
/// Every command talks to one backend. Its base URL comes from
/// `--base-url`, then `ONESOURCE_BASE_URL`, then the config file.
#[derive(Parser)]
#[command(
    name = "onesource",
    about = "OneSource client: ask, inspect traces, and link workspace tools",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/onesource.toml`. May be absent when the base
    /// URL is given another way.
    #[arg(long, global = true, default_value = "./config/onesource.toml")]
    config: PathBuf,

    /// Backend base URL, overriding the environment and the config file.
    #[arg(long, global = true)]
    base_url: Option<String>,

    /// Log at debug level unless RUST_LOG / ONESOURCE_LOG say otherwise.
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ask a question.
    ///
    /// Prints the answer with its citations, confidence, freshness and the
    /// link to its trace. A policy banner, if any, is printed first.
    Ask {
        /// The question. Multiple words are joined with spaces.
        #[arg(required = true)]
        query: Vec<String>,

        /// Print the decoded answer as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Show the retrieval trace for an answer.
    Trace {
        /// Trace id, as printed after an answer.
        id: String,

        /// Print the reconciled trace as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Show connection status for every provider.
    Connections {
        #[arg(long)]
        json: bool,
    },

    /// Link a provider.
    ///
    /// Opens the provider's consent page in the browser and waits until the
    /// backend reports the provider as connected.
    Connect {
        /// `slack`, `drive` or `github`.
        provider: Provider,

        /// Do not poll; wait for Enter and refresh instead.
        #[arg(long)]
        manual: bool,
    },

    /// Unlink a provider (opens the backend's disconnect page).
    Disconnect { provider: Provider },

    /// Open a provider's app installation page.
    Install { provider: Provider },

    /// Check that the backend answers `/healthz`.
    Health,

    /// Interactive session with ask, trace and connection commands.
    Shell,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init_tracing(cli.verbose);

    let cfg = config::resolve_config(&cli.config, cli.base_url.as_deref())?;
    tracing::debug!(base_url = %cfg.backend.base_url, "config resolved");

    match cli.command {
        Commands::Ask { query, json } => {
            ask::run_ask(&cfg, &query.join(" "), json).await?;
        }
        Commands::Trace { id, json } => {
            trace::run_trace(&cfg, &id, json).await?;
        }
        Commands::Connections { json } => {
            connections::run_connections(&cfg, json).await?;
        }
        Commands::Connect { provider, manual } => {
            connections::run_connect(&cfg, provider, manual).await?;
        }
        Commands::Disconnect { provider } => {
            connections::run_disconnect(&cfg, provider).await?;
        }
        Commands::Install { provider } => {
            connections::run_install(&cfg, provider).await?;
        }
        Commands::Health => {
            health::run_health(&cfg).await?;
        }
        Commands::Shell => {
            app::run_shell(&cfg).await?;
        }
    }

    Ok(())
}
