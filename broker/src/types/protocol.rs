//! JSON-RPC wire types spoken with worker processes.
//!
//! Every message is a single JSON object on its own line. Requests go to the
//! worker's stdin, responses come back on its stdout interleaved with whatever
//! else the worker decides to print.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{BrokerError, Result};

pub const JSONRPC_VERSION: &str = "2.0";

/// MCP protocol revision sent during `initialize`.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

pub const METHOD_INITIALIZE: &str = "initialize";
pub const METHOD_TOOLS_LIST: &str = "tools/list";
pub const METHOD_TOOLS_CALL: &str = "tools/call";

/// Outgoing request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    pub jsonrpc: String,
    pub id: u64,
    pub method: String,
    pub params: Value,
}

impl RpcRequest {
    pub fn new(id: u64, method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            method: method.into(),
            params,
        }
    }

    /// Serialize as a single newline-terminated line.
    pub fn to_line(&self) -> Result<String> {
        Ok(serde_json::to_string(self)? + "\n")
    }
}

/// Error object carried by a failed response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Decoded outcome of a response.
#[derive(Debug, Clone, PartialEq)]
pub enum RpcReply {
    Success(Value),
    Failure(RpcErrorObject),
}

impl RpcReply {
    pub fn into_result(self) -> Result<Value> {
        match self {
            RpcReply::Success(value) => Ok(value),
            RpcReply::Failure(err) => Err(BrokerError::Rpc {
                code: err.code,
                message: err.message,
            }),
        }
    }
}

/// Raw shape of a response line before it is narrowed into an [`RpcReply`].
#[derive(Debug, Deserialize)]
struct RawResponse {
    id: Option<u64>,
    // `Option<Value>` would fold an explicit `"result": null` into `None`.
    #[serde(default, deserialize_with = "present")]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorObject>,
}

fn present<'de, D>(deserializer: D) -> std::result::Result<Option<Value>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

/// Parse one stdout line as a response.
///
/// Returns `None` for anything that is not a response: log text, notifications,
/// requests from the worker, objects without an integer id.
pub fn parse_response_line(line: &str) -> Option<(u64, RpcReply)> {
    let trimmed = line.trim();
    if !trimmed.starts_with('{') {
        return None;
    }

    let raw: RawResponse = serde_json::from_str(trimmed).ok()?;
    let id = raw.id?;

    match (raw.error, raw.result) {
        (Some(error), _) => Some((id, RpcReply::Failure(error))),
        (None, Some(result)) => Some((id, RpcReply::Success(result))),
        (None, None) => None,
    }
}

/// Identity the broker presents to workers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientInfo {
    pub name: String,
    pub version: String,
}

/// Parameters of the `initialize` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    pub protocol_version: String,
    pub capabilities: Value,
    pub client_info: ClientInfo,
}

impl Default for InitializeParams {
    fn default() -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: Value::Object(Default::default()),
            client_info: ClientInfo {
                name: env!("CARGO_PKG_NAME").to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        }
    }
}

/// A tool advertised by a worker in its `tools/list` response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct ToolsListResult {
    #[serde(default)]
    tools: Vec<ToolDescriptor>,
}

/// Extract the tool list from a `tools/list` result. A missing `tools` field is
/// an empty list.
pub fn parse_tools_list(result: Value) -> Result<Vec<ToolDescriptor>> {
    let parsed: ToolsListResult = serde_json::from_value(result)?;
    Ok(parsed.tools)
}

/// Parameters of a `tools/call` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallParams {
    pub name: String,
    pub arguments: Value,
}
