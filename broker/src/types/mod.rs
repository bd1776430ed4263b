//! Type definitions for the tool broker.

pub mod config;
pub mod error;
pub mod protocol;
pub mod report;

// Re-export commonly used types
pub use config::BrokerConfig;
pub use error::{BrokerError, Result};
pub use protocol::{
    ClientInfo, InitializeParams, RpcErrorObject, RpcReply, RpcRequest, ToolCallParams,
    ToolDescriptor,
};
pub use report::{
    AvailableServer, BrokerStats, EnvironmentReport, MissingServer, VirtualTool, WorkerStats,
};
