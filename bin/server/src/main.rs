use flowloom_server::api;
use flowloom_server::app::Services;
use flowloom_server::config::ServerConfig;
use flowloom_server::error::StartupError;
use rootcause::Report;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Report<StartupError>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServerConfig::from_env().map_err(|e| StartupError::Config {
        details: e.to_string(),
    })?;
    tracing::info!("Loaded configuration");

    let services = Services::start(&config).await?;
    let app = api::router(services.state.clone());

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .map_err(|e| StartupError::Bind {
            addr: config.bind_addr.clone(),
            details: e.to_string(),
        })?;
    tracing::info!("listening on http://{}", config.bind_addr);

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(services.state.shutdown.clone()))
        .await;

    services.shutdown().await;
    served.map_err(|e| StartupError::Serve {
        details: e.to_string(),
    })?;
    Ok(())
}

/// Resolves on Ctrl-C, cancelling `shutdown` so open event streams close.
async fn shutdown_signal(shutdown: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for Ctrl-C");
        shutdown.cancelled().await;
        return;
    }
    tracing::info!("shutdown requested");
    shutdown.cancel();
}
