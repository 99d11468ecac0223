pub mod adapters;
pub mod config;
pub mod crypto;
pub mod error;
pub mod response;
pub mod telemetry;
pub mod utils;

pub use config::Config;
pub use error::{AppError, Result};
pub use response::ApiResponse;
