//! Command-line interface

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Fabric credential tool - log in, refresh, and inspect tokens
#[derive(Parser, Debug)]
#[command(name = "fabric-auth")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "FABRIC_AUTH_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn", env = "FABRIC_AUTH_LOG_LEVEL", global = true)]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "FABRIC_AUTH_LOG_FORMAT", global = true)]
    pub log_format: Option<String>,

    /// Subcommand
    #[command(subcommand)]
    pub command: Command,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Log in through the browser and cache the tokens
    Login {
        /// Callback port (0 = ephemeral)
        #[arg(long)]
        port: Option<u16>,

        /// Upstream provider hint (e.g. github)
        #[arg(long)]
        provider: Option<String>,

        /// Print the URL but do not open a browser
        #[arg(long)]
        no_browser: bool,

        /// Do not read ENTER/q from stdin
        #[arg(long)]
        non_interactive: bool,

        /// Poll the provider for the code instead of running a local listener
        #[arg(long, conflicts_with = "port")]
        poll: bool,
    },

    /// Refresh the cached tokens (no-op while the access token is fresh)
    Refresh {
        /// Print the access token
        #[arg(long)]
        print: bool,
    },

    /// Remove the cached tokens
    Logout,

    /// Exchange a federated identity token for Fabric tokens
    ExchangeJwt {
        /// The assertion (reads `FABRIC_AUTH_ASSERTION` if omitted)
        #[arg(env = "FABRIC_AUTH_ASSERTION", hide_env_values = true)]
        assertion: String,

        /// Cache the resulting tokens
        #[arg(long)]
        save: bool,
    },

    /// List tenants available to the cached login
    Tenants {
        /// Print only the ID of the tenant with this name
        #[arg(long)]
        select: Option<String>,

        /// Print only the ID of the tenant matching the token's subject
        #[arg(long, conflicts_with = "select")]
        auto: bool,

        /// Output JSON
        #[arg(long)]
        json: bool,
    },

    /// Verify a federated assertion and print the identity claim
    VerifyAssertion {
        /// The assertion to verify
        assertion: String,
    },
}
