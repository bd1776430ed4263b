//! Read-only reports produced by the broker for diagnostics.

use serde::{Deserialize, Serialize};

/// Snapshot of the pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrokerStats {
    pub max_active: usize,
    pub active_count: usize,
    pub idle_timeout_seconds: u64,
    pub per_call_timeout_ms: u64,
    pub total_servers: usize,
    pub per_worker: Vec<WorkerStats>,
}

/// One live worker in a [`BrokerStats`] snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerStats {
    pub name: String,
    pub idle_seconds: u64,
    pub tool_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
}

/// An integration whose credentials are all present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailableServer {
    pub name: String,
    pub tool_count: usize,
    pub categories: Vec<String>,
}

/// An integration that cannot work until some variables are set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MissingServer {
    pub name: String,
    pub tool_count: usize,
    pub missing_credentials: Vec<String>,
}

/// Credential readiness of the whole catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentReport {
    pub available: Vec<AvailableServer>,
    pub missing: Vec<MissingServer>,
    pub available_tools: usize,
    pub total_tools: usize,
}

/// Catalog-derived placeholder for a tool, listed without spawning its worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualTool {
    pub server: String,
    pub name: String,
    pub description: String,
    pub categories: Vec<String>,
}
