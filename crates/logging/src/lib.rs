pub mod logging;

pub use logging::*;

pub use protocol::{AppError, AppResult, ResultExt};
