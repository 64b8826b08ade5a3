use anyhow::Result;
use axum::serve;
use balancer_core::{config::AppConfig, runtime::BalancerRuntime};
use rustls::crypto::{ring::default_provider, CryptoProvider};
use server::router;
use std::net::SocketAddr;
use tokio::signal;
use tracing::{debug, error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initializes logging. `RUST_LOG` wins when set; `debug` and `trace` are
/// shorthands that raise only this workspace's crates.
fn init_logging(config: &AppConfig) {
    let filter = match std::env::var("RUST_LOG").as_deref() {
        Ok("debug") => EnvFilter::new("warn,balancer_core=debug,server=debug"),
        Ok("trace") => EnvFilter::new("warn,balancer_core=trace,server=trace"),
        Ok(_) => EnvFilter::try_from_env("RUST_LOG")
            .unwrap_or_else(|_| EnvFilter::new("warn,balancer_core=debug,server=debug")),
        Err(_) => EnvFilter::new(format!(
            "warn,balancer_core={level},server={level}",
            level = config.logging.level
        )),
    };

    let registry = tracing_subscriber::registry().with(filter);

    if config.logging.format.as_str() == "json" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .pretty()
            .with_file(true)
            .with_line_number(true)
            .with_target(false);
        registry.with(fmt_layer).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    CryptoProvider::install_default(default_provider())
        .map_err(|e| anyhow::anyhow!("Failed to install crypto provider: {e:?}"))?;

    let config = AppConfig::load().map_err(|e| anyhow::anyhow!("Failed to load configuration: {e}"))?;

    init_logging(&config);
    info!("Starting node balancer");
    debug!(
        nodes = config.nodes.len(),
        bind_port = config.server.bind_port,
        template_refresh_ms = config.template_cache.refresh_interval_ms,
        "Configuration loaded"
    );

    let runtime = BalancerRuntime::builder().with_config(config.clone()).build().await?;

    let app = router::create_app(runtime.components(), &config.server);
    let addr: SocketAddr = config.socket_addr().map_err(|e| anyhow::anyhow!("Invalid bind address: {e}"))?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(address = %addr, "RPC server listening");

    if let Err(e) = serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!(error = %e, "Server error occurred");
    }

    runtime.shutdown().await;
    info!("Server shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install signal handler");
                () = std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown");
}
