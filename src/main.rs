//! tokenbridge - internal token service, gateway guard and client token cache

use std::io::Write;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use tokenbridge::{
    Error, Result,
    auth::{AuthService, handler::auth_router},
    cli::{Cli, Command},
    client::{
        ChainedIdentityProvider, ClientError, ClientTokenCache, HttpAuthClient, PlatformDeviceId,
        TokenStore,
    },
    clock::{Clock, SystemClock},
    config::Config,
    gateway::{GatewayAuthGuard, UpstreamProxy, gateway_router},
    server::{Configured, listen_addr, serve, shutdown_signal},
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
            error!("Failed to load config: {e}");
            return ExitCode::from(e.exit_code());
        }
    };

    let result = match cli.command {
        Command::ServeAuth { host, port } => run_auth_server(config, host, port).await,
        Command::ServeGateway { host, port } => run_gateway(config, host, port).await,
        Command::GetToken => run_get_token(&config).await,
        Command::RefreshLoop => run_refresh_loop(&config).await,
        Command::Status => run_status(&config),
        Command::Logout => run_logout(&config),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::from(e.exit_code())
        }
    }
}

fn clock() -> Arc<dyn Clock> {
    Arc::new(SystemClock)
}

async fn run_auth_server(config: Config, host: Option<String>, port: Option<u16>) -> Result<()> {
    let addr = listen_addr(
        host.as_deref().unwrap_or(&config.server.host),
        port.unwrap_or(config.server.port),
    )?;
    let service = Configured::from_result(AuthService::from_config(&config, clock()));
    serve("auth", addr, auth_router(service)).await
}

async fn run_gateway(config: Config, host: Option<String>, port: Option<u16>) -> Result<()> {
    let addr = listen_addr(
        host.as_deref().unwrap_or(&config.gateway.host),
        port.unwrap_or(config.gateway.port),
    )?;
    let guard = Configured::from_result(GatewayAuthGuard::from_config(&config, clock()));
    let proxy = UpstreamProxy::new(
        config.gateway.upstream_url.as_deref(),
        config.gateway.upstream_timeout(),
    )?;
    serve("gateway", addr, gateway_router(guard, proxy)).await
}

/// Cache wired to the configured auth service and identity providers.
fn token_cache(config: &Config) -> Result<ClientTokenCache> {
    let clock = clock();
    let store = TokenStore::new(config.client.token_file()?);
    let api = Arc::new(HttpAuthClient::new(
        &config.client.auth_server_url,
        clock.clone(),
    ));
    let identity = Arc::new(ChainedIdentityProvider::from_config(
        &config.issuer,
        &config.client,
    ));
    Ok(ClientTokenCache::new(store, api, identity, clock)
        .with_refresh_margin(config.client.refresh_margin_secs)
        .with_min_refresh_interval(Duration::from_secs(
            config.client.min_refresh_interval_secs,
        )))
}

/// Cancelled on Ctrl+C or SIGTERM.
fn cancel_on_shutdown() -> CancellationToken {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        trigger.cancel();
    });
    cancel
}

fn client_error(e: ClientError) -> Error {
    Error::Internal(e.to_string())
}

async fn run_get_token(config: &Config) -> Result<()> {
    let cache =
        token_cache(config)?.with_device_id_source(Arc::new(PlatformDeviceId::new()));
    let cancel = cancel_on_shutdown();

    let token = cache.ensure_token(&cancel).await.map_err(client_error)?;

    // Bare token, no newline, for helper scripts
    let mut stdout = std::io::stdout().lock();
    stdout.write_all(token.as_bytes())?;
    stdout.flush()?;
    Ok(())
}

async fn run_refresh_loop(config: &Config) -> Result<()> {
    let cache =
        token_cache(config)?.with_device_id_source(Arc::new(PlatformDeviceId::new()));
    cache
        .run_refresh_loop(cancel_on_shutdown())
        .await
        .map_err(client_error)
}

fn run_status(config: &Config) -> Result<()> {
    let cache = token_cache(config)?;
    println!("{}", cache.status());
    Ok(())
}

fn run_logout(config: &Config) -> Result<()> {
    let cache = token_cache(config)?;
    if cache.logout() {
        info!("Logged out");
    } else {
        info!("No stored token to remove");
    }
    Ok(())
}
