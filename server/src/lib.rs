pub mod error;
pub mod server;

pub use error::{ApiError, Result};
pub use server::{AppState, CallRequest, CallResponse, create_app};
