use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;

use resilient_gateway::admin::{setup_admin_router, AdminState};
use resilient_gateway::config::{load_config, watcher, GatewayConfig};
use resilient_gateway::lifecycle::{signalled, signals, Shutdown};
use resilient_gateway::observability::{logging, metrics};
use resilient_gateway::resilience::run_eviction;
use resilient_gateway::GatewayServer;

#[derive(Parser)]
#[command(name = "resilient-gateway")]
#[command(about = "Filtering gateway in front of load-balanced, circuit-broken services", long_about = None)]
struct Args {
    /// Path to the TOML configuration file. Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Watch the config file and reload the endpoint table on change.
    #[arg(long)]
    watch: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => GatewayConfig::default(),
    };

    logging::init_logging(&config.observability)?;
    tracing::info!("resilient-gateway v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        bind_address = %config.listener.bind_address,
        services = config.services.len(),
        routes = config.routes.len(),
        request_timeout_secs = config.timeouts.request_secs,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let shutdown = Shutdown::new();
    tokio::spawn(signals::shutdown_on_signal(shutdown.clone()));

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    let server = GatewayServer::new(config.clone());

    // Keeps the file watcher alive for the lifetime of main.
    let _watcher = match (&args.config, args.watch) {
        (Some(path), true) => {
            let (config_watcher, updates) = watcher::ConfigWatcher::new(path);
            let handle = config_watcher.run()?;
            tokio::spawn(watcher::apply_updates(
                server.resolver().clone(),
                updates,
                shutdown.subscribe(),
            ));
            Some(handle)
        }
        _ => None,
    };

    if config.breaker.idle_eviction_secs > 0 {
        tokio::spawn(run_eviction(
            server.client().breakers().clone(),
            Duration::from_secs(config.breaker.idle_eviction_secs),
            shutdown.subscribe(),
        ));
    }

    if config.admin.enabled {
        let admin_listener = TcpListener::bind(&config.admin.bind_address).await?;
        let admin = setup_admin_router(AdminState {
            client: server.client().clone(),
            resolver: server.resolver().clone(),
            api_key: Arc::from(config.admin.api_key.as_str()),
        });
        let admin_shutdown = shutdown.subscribe();
        tracing::info!(address = %config.admin.bind_address, "Admin API listening");
        tokio::spawn(async move {
            if let Err(e) = axum::serve(admin_listener, admin)
                .with_graceful_shutdown(signalled(admin_shutdown))
                .await
            {
                tracing::error!(error = %e, "Admin API failed");
            }
        });
    }

    server.run(listener, shutdown.subscribe()).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
