use anyhow::Result;
use reitti::config::ControllerConfig;
use reitti::controller::Controller;
use reitti::render::JsonRender;
use reitti::serve::{self, ServeContext};
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// REITTI - Kubernetes ingress controller
///
/// Watches Ingress, Endpoints and Secret resources and serves the derived
/// routing table to a reverse proxy.
#[tokio::main]
async fn main() -> Result<()> {
    // Initialize rustls crypto provider (needed for the Kubernetes TLS client)
    rustls::crypto::ring::default_provider()
        .install_default()
        .ok(); // Ignore error if already installed

    tracing_subscriber::fmt::init();

    let config = ControllerConfig::from_env()
        .map_err(|e| anyhow::anyhow!("invalid configuration: {}", e))?;
    info!(
        class = %config.class,
        namespace = config.namespace.as_deref().unwrap_or("<all>"),
        bind = %config.bind_addr,
        "starting controller"
    );

    let client = kube::Client::try_default().await?;
    let controller = Arc::new(Controller::new(client, &config));
    let shutdown = CancellationToken::new();

    let server = {
        let ctx = ServeContext {
            state: controller.state(),
            gate: controller.ready_gate(),
            renderer: Arc::new(JsonRender),
        };
        let bind_addr = config.bind_addr.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = serve::serve(&bind_addr, ctx, shutdown).await {
                error!("config endpoint error: {}", e);
            }
        })
    };

    let run = {
        let controller = Arc::clone(&controller);
        let shutdown = shutdown.clone();
        tokio::spawn(async move { controller.run(shutdown).await })
    };

    signal::ctrl_c().await?;
    info!("shutdown signal received");
    shutdown.cancel();

    run.await?;
    server.await?;

    Ok(())
}
