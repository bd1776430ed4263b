//! Internal implementation: transport, multiplexing, supervision, pooling.

pub mod pool;
pub mod rpc;
pub mod supervisor;
pub mod transport;

pub use pool::WorkerPool;
pub use rpc::Multiplexer;
pub use supervisor::{ActiveWorker, Supervisor, WorkerExit, WorkerState};
