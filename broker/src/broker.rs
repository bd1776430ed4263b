//! Broker façade: the single entry point used by the tool dispatcher.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info};

use crate::catalog::WorkerCatalog;
use crate::internal::WorkerPool;
use crate::types::{BrokerConfig, BrokerStats, EnvironmentReport, Result, VirtualTool};

/// Routes tool calls to on-demand worker processes.
///
/// # Example
///
/// ```rust,no_run
/// use std::time::Duration;
/// use tool_broker::{Broker, BrokerConfig, WorkerCatalog, WorkerDescriptor};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let catalog = WorkerCatalog::new(vec![
///         WorkerDescriptor::new("files-mcp", "files-worker").with_args(["--stdio"]),
///     ])?;
///     let config = BrokerConfig::new()
///         .with_max_active(2)
///         .with_call_timeout(Duration::from_secs(10));
///
///     let broker = Broker::new(catalog, config)?;
///     let listing = broker
///         .call("files-mcp", "list", serde_json::json!({"path": "."}))
///         .await?;
///     println!("{}", listing);
///
///     broker.shutdown().await;
///     Ok(())
/// }
/// ```
pub struct Broker {
    catalog: Arc<WorkerCatalog>,
    pool: WorkerPool,
    config: BrokerConfig,
}

impl Broker {
    /// Create a broker. Nothing is spawned until `start` or the first `call`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(catalog: WorkerCatalog, config: BrokerConfig) -> Result<Self> {
        config.validate()?;

        let catalog = Arc::new(catalog);
        let pool = WorkerPool::new(Arc::clone(&catalog), config.clone());
        info!(
            servers = catalog.len(),
            max_active = config.max_active,
            idle_timeout = ?config.idle_timeout,
            call_timeout = ?config.call_timeout,
            "Broker created"
        );

        Ok(Self {
            catalog,
            pool,
            config,
        })
    }

    /// Spawn the configured pre-warm list.
    pub async fn start(&self) {
        if !self.config.prewarm.is_empty() {
            self.pool.prewarm(&self.config.prewarm).await;
        }
    }

    /// Ensure `server` is running and invoke `tool` on it.
    pub async fn call(&self, server: &str, tool: &str, args: Value) -> Result<Value> {
        debug!(server, tool, "Broker call");
        let worker = self.pool.ensure(server).await?;
        worker.call_tool(tool, args).await
    }

    /// Pool occupancy and limits. Never spawns.
    pub async fn stats(&self) -> BrokerStats {
        let per_worker = self.pool.worker_stats().await;

        BrokerStats {
            max_active: self.config.max_active,
            active_count: per_worker.len(),
            idle_timeout_seconds: self.config.idle_timeout.as_secs(),
            per_call_timeout_ms: u64::try_from(self.config.call_timeout.as_millis())
                .unwrap_or(u64::MAX),
            total_servers: self.catalog.len(),
            per_worker,
        }
    }

    /// Credential readiness of every catalog entry. Never touches the pool.
    pub fn diagnose_environment(&self) -> EnvironmentReport {
        self.catalog.diagnose()
    }

    /// Like [`diagnose_environment`](Self::diagnose_environment) against an
    /// explicit variable lookup.
    pub fn diagnose_environment_with<F>(&self, lookup: F) -> EnvironmentReport
    where
        F: Fn(&str) -> Option<String>,
    {
        self.catalog.diagnose_with(lookup)
    }

    /// Every advertised tool, from catalog metadata alone.
    pub fn virtual_catalog(&self) -> Vec<VirtualTool> {
        self.catalog.virtual_catalog()
    }

    /// Kill every worker and stop the reaper.
    pub async fn shutdown(&self) {
        self.pool.shutdown().await;
        info!("Broker shut down");
    }

    pub fn catalog(&self) -> &WorkerCatalog {
        &self.catalog
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }
}
