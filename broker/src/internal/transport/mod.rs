//! Subprocess transport for worker processes.

mod process_handle;
mod read_half;
mod stderr_half;
pub mod subprocess;
mod write_half;

pub use process_handle::ProcessHandle;
pub use read_half::ReadHalf;
pub use stderr_half::StderrHalf;
pub use subprocess::SubprocessTransport;
pub use write_half::WriteHalf;
