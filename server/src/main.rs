use std::env;
use std::sync::Arc;

use broker_server::create_app;
use tool_broker::{Broker, BrokerConfig, WorkerCatalog};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_ADDR: &str = "127.0.0.1:3100";

fn load_catalog() -> tool_broker::Result<WorkerCatalog> {
    match env::var("BROKER_CATALOG") {
        Ok(path) if !path.trim().is_empty() => {
            info!("Loading worker catalog from {}", path);
            WorkerCatalog::load(path.trim())
        }
        _ => Ok(WorkerCatalog::builtin()),
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 初始化日志
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tool_broker=info,broker_server=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = BrokerConfig::from_env()?;
    let catalog = load_catalog()?;
    let broker = Arc::new(Broker::new(catalog, config)?);
    broker.start().await;

    let addr = env::var("BROKER_ADDR").unwrap_or_else(|_| DEFAULT_ADDR.to_string());
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Tool broker listening on {}", addr);

    let app = create_app(Arc::clone(&broker));
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    broker.shutdown().await;
    info!("Tool broker stopped");
    Ok(())
}
