pub mod service;
pub mod transfer;

pub use protocol::models;
pub use protocol::{AppError, AppResult, ErrorCategory, ResultExt};

#[cfg(test)]
#[path = "../tests/transfer/support.rs"]
pub(crate) mod test_support;
