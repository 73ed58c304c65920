//! Fabric Auth - credential tool for the Fabric control plane
//!
//! Browser login, token refresh and federated-assertion checks.

use std::io::IsTerminal;
use std::process::ExitCode;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use fabric_auth::{
    Error, Result,
    cli::{Cli, Command},
    config::Config,
    oauth::{AuthClient, CredentialCache, LoginFlow, LoginMode, Tokens, select_tenant, select_tenant_by_sub},
    setup_tracing,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("❌ {e}");
            return ExitCode::FAILURE;
        }
    };

    let result = match cli.command {
        Command::Login {
            port,
            provider,
            no_browser,
            non_interactive,
            poll,
        } => run_login(&config, port, provider, no_browser, non_interactive, poll).await,
        Command::Refresh { print } => run_refresh(&config, print).await,
        Command::Logout => run_logout(&config),
        Command::ExchangeJwt { assertion, save } => run_exchange_jwt(&config, &assertion, save).await,
        Command::Tenants { select, auto, json } => run_tenants(&config, select.as_deref(), auto, json).await,
        Command::VerifyAssertion { assertion } => run_verify_assertion(&config, &assertion).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("❌ {e}");
            if e.is_auth_failure() {
                eprintln!("💡 Run `fabric-auth login` to sign in again");
            } else if e.is_retryable() {
                eprintln!("💡 This looks transient; try again");
            }
            ExitCode::FAILURE
        }
    }
}

/// Run the browser login and cache the result
async fn run_login(
    config: &Config,
    port: Option<u16>,
    provider: Option<String>,
    no_browser: bool,
    non_interactive: bool,
    poll: bool,
) -> Result<()> {
    let client = config.login.client()?;
    let cache = config.login.credential_cache()?;

    let mut options = config.login.options();
    if let Some(port) = port {
        options.port = port;
    }
    if provider.is_some() {
        options.provider = provider;
    }
    if poll {
        options.mode = LoginMode::Poll;
    }
    options.open_browser &= !no_browser;
    options.interactive = !non_interactive && std::io::stdin().is_terminal();

    let cancel = CancellationToken::new();
    let ctrl_c = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupted, canceling login");
                cancel.cancel();
            }
        })
    };

    let flow = LoginFlow::new(client.clone(), options);
    let result = flow.run(&cancel).await;
    ctrl_c.abort();

    let tokens = result?;
    cache.save(client.issuer(), &tokens)?;
    println!("✅ Logged in to {}", client.issuer());
    Ok(())
}

/// Refresh cached tokens
async fn run_refresh(config: &Config, print: bool) -> Result<()> {
    let client = config.login.client()?;
    let cache = config.login.credential_cache()?;
    let cached = load_tokens(&cache, &client)?;

    let access = Some(cached.access_token.as_str()).filter(|a| !a.is_empty());
    let tokens = client.refresh(&cached.refresh_token, access).await?;

    if tokens == cached {
        debug!("Cached access token still fresh");
    } else {
        cache.save(client.issuer(), &tokens)?;
        info!("Tokens refreshed");
    }

    if print {
        println!("{}", tokens.access_token);
    }
    Ok(())
}

/// Delete cached tokens
fn run_logout(config: &Config) -> Result<()> {
    let cache = config.login.credential_cache()?;
    if cache.delete(&config.login.issuer)? {
        println!("✅ Logged out of {}", config.login.issuer);
    } else {
        println!("Not logged in to {}", config.login.issuer);
    }
    Ok(())
}

/// Exchange a federated assertion for tokens
async fn run_exchange_jwt(config: &Config, assertion: &str, save: bool) -> Result<()> {
    let client = config.login.client()?;
    let tokens = client.exchange_jwt(assertion.trim()).await?;

    if save {
        config.login.credential_cache()?.save(client.issuer(), &tokens)?;
        println!("✅ Tokens saved for {}", client.issuer());
    } else {
        println!("{}", tokens.access_token);
    }
    Ok(())
}

/// List (or select) tenants for the cached login
async fn run_tenants(config: &Config, select: Option<&str>, auto: bool, json: bool) -> Result<()> {
    let client = config.login.client()?;
    let cache = config.login.credential_cache()?;
    let cached = load_tokens(&cache, &client)?;

    let tenants = client.list_tenants(&cached.access_token).await?;

    let selected = match select {
        Some(name) => Some(select_tenant(&tenants, name)?),
        None if auto => Some(select_tenant_by_sub(&tenants, &cached.access_token)?),
        None => None,
    };
    if let Some(tenant) = selected {
        println!("{}", tenant.id);
        return Ok(());
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&tenants)?);
    } else if tenants.is_empty() {
        println!("No tenants found.");
    } else {
        for tenant in &tenants {
            println!("{}\t{}", tenant.id, tenant.name);
        }
    }
    Ok(())
}

/// Verify a federated assertion and print its identity claim
async fn run_verify_assertion(config: &Config, assertion: &str) -> Result<()> {
    let verifier = config.federation.verifier()?;
    let identity = verifier.verify_assertion(assertion.trim()).await?;
    println!("{identity}");
    Ok(())
}

fn load_tokens(cache: &CredentialCache, client: &AuthClient) -> Result<Tokens> {
    cache.load(client.issuer()).ok_or_else(|| {
        Error::Config(format!(
            "no cached tokens for {}; run `fabric-auth login` first",
            client.issuer()
        ))
    })
}
