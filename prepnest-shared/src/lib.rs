pub mod types;
pub mod errors;
pub mod middleware;
pub mod clients;

pub use types::*;
pub use errors::{AppError, AppResult, ErrorCode, ErrorResponse};
