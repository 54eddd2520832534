/**
 * PONG REGISTRY - Point d'entrée du serveur
 *
 * RÔLE : Charge .env + config, puis selon la commande :
 * - `init-db` : crée le schéma de stockage et quitte
 * - `serve`   : lance le sweeper et l'API HTTP jusqu'à Ctrl+C / SIGTERM
 */

use anyhow::{Context, Result};
use clap::Parser;
use pong_registry::cli::{Cli, Command};
use pong_registry::config::load_config;
use pong_registry::service::{init_storage, RegistryService};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // .env optionnel, avant clap pour que les `env = ...` le voient
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let cfg = load_config(&cli.config)
        .await
        .with_context(|| format!("failed to load config {}", cli.config.display()))?;

    match cli.command() {
        Command::InitDb => {
            init_storage(&cfg).await.context("failed to initialize storage")?;
            println!("Database initialized");
        }
        Command::Serve => serve(cfg).await?,
    }
    Ok(())
}

async fn serve(cfg: pong_registry::config::RegistryConfig) -> Result<()> {
    let addr = cfg.socket_addr()?;
    let service = RegistryService::start(cfg)
        .await
        .context("failed to open storage")?;

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {addr}"))?;
    info!("[registry] listening on http://{addr}");

    let app = service.router();
    let served = axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await;

    service.shutdown().await;
    served.context("server error")
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("pong_registry=info")),
        )
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!("[registry] unable to install Ctrl+C handler: {}", err);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!("[registry] unable to install SIGTERM handler: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("[registry] shutdown requested");
}
