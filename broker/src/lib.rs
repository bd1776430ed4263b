//! Tool broker: runs integration workers on demand and routes tool calls to
//! them.
//!
//! Each integration is served by a child process speaking line-delimited
//! JSON-RPC over its stdin/stdout. The broker spawns a worker the first time
//! one of its tools is called, keeps a bounded number of workers alive, evicts
//! the least recently used one when the pool is full, and reaps workers that
//! sit idle.
//!
//! # Example
//!
//! ```rust,no_run
//! use tool_broker::{Broker, BrokerConfig, WorkerCatalog};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let broker = Broker::new(WorkerCatalog::builtin(), BrokerConfig::from_env()?)?;
//!     broker.start().await;
//!
//!     let result = broker
//!         .call("github-mcp", "list_repos", serde_json::json!({"owner": "octocat"}))
//!         .await?;
//!     println!("{}", result);
//!
//!     broker.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! - [`types`] - Configuration, errors, wire protocol and report types
//! - [`catalog`] - Static table of spawnable workers
//! - [`internal`] - Transport, multiplexer, supervisor and pool
//! - [`broker`] - The public façade

pub mod broker;
pub mod catalog;
pub mod internal;
pub mod types;

// Re-export the public surface at the crate root for convenience
pub use broker::Broker;
pub use catalog::{WorkerCatalog, WorkerDescriptor};
pub use internal::{ActiveWorker, WorkerPool, WorkerState};
pub use types::*;
