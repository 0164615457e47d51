//! Process bootstrap for the fleet-update agent.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use fleet_update_agent::{http, ipc};
use fleet_update_core::{AgentSettings, RefreshService};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let log_level = std::env::var("FLEET_UPDATE_LOG_LEVEL")
        .map(|val| val.to_lowercase())
        .unwrap_or_else(|_| "info".to_string());
    let env_filter = format!("h2=off,hyper=off,rustls=off,{log_level}");

    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_new(env_filter).context("could not parse log level in configuration")?,
        )
        .with_level(true)
        .with_target(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("setting default subscriber failed")?;
    debug!("logging subsystem enabled");

    let settings = AgentSettings::from_os_env();
    if settings.config_url.is_none() {
        anyhow::bail!("FLEET_UPDATE_CONFIG_URL is not set");
    }
    let socket_path = settings.socket_path.clone();
    let http_port = settings.http_port;
    let service = Arc::new(RefreshService::new(settings).context("building refresh service")?);

    let addr = SocketAddr::from(([127, 0, 0, 1], http_port));
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding http control api to {addr}"))?;
    info!(%addr, "http control api listening");

    let (ipc_listener, _socket_guard) = ipc::bind(&socket_path)
        .with_context(|| format!("binding ipc socket at {socket_path}"))?;
    info!(socket = %socket_path, "ipc control api listening");

    let shutdown = CancellationToken::new();
    let http_task = tokio::spawn(http::serve(service.clone(), listener, shutdown.clone()));
    let ipc_task = tokio::spawn(ipc::serve(service.clone(), ipc_listener, shutdown.clone()));

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    info!("shutdown signal received");
    shutdown.cancel();

    match http_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("http control api failed: {e}"),
        Err(e) => error!("http control api task failed: {e}"),
    }
    match ipc_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("ipc control api failed: {e}"),
        Err(e) => error!("ipc control api task failed: {e}"),
    }
    Ok(())
}
