pub mod runtime;
pub mod settings;
pub mod shutdown;

pub use protocol::models;
pub use protocol::{AppError, AppErrorPayload, AppResult, ErrorCategory, ErrorContextItem, ResultExt};
