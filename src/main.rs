use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use clap::Parser;
use tokio::signal;
use tracing::{error, info, warn};

use plantshop_orders as api;

#[derive(Debug, Parser)]
#[command(name = "plantshop-orders", version, about = "Plant shop order service")]
struct Cli {
    /// Run database migrations and exit
    #[arg(long)]
    migrate: bool,

    /// Override the configured listen port
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut cfg = api::config::load_config().context("failed to load configuration")?;
    if let Some(port) = cli.port {
        cfg.port = port;
    }
    api::config::init_tracing(cfg.log_level(), cfg.log_json);

    let db_pool = api::db::establish_connection_from_app_config(&cfg)
        .await
        .context("failed to connect to the database")?;

    if cli.migrate {
        api::db::run_migrations(&db_pool).await?;
        info!("migrations applied");
        return Ok(());
    }
    if cfg.auto_migrate {
        api::db::run_migrations(&db_pool).await.map_err(|e| {
            error!("Failed running migrations: {}", e);
            e
        })?;
    }

    let (event_sender, event_rx) = api::events::channel(cfg.event_channel_capacity);
    tokio::spawn(api::events::process_events(event_rx));

    if cfg.gateway.mock_mode {
        warn!("payment gateway mock mode is enabled; no real payments will be taken");
    }
    let mock_return_base = format!("http://{}:{}/api/v1/payments/gateway/return", cfg.host, cfg.port);
    let gateway = api::gateway::build_gateway(&cfg.gateway, &mock_return_base)?;

    let addr: SocketAddr = format!("{}:{}", cfg.host, cfg.port)
        .parse()
        .context("invalid listen address")?;

    let state = api::AppState::build(Arc::new(db_pool), cfg, gateway, Arc::new(event_sender));
    let app = api::app_router(state);

    info!("plantshop-orders listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
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
}
