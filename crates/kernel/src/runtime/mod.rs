mod blocking;
mod locks;

pub use blocking::run_blocking;
pub use locks::{lock_mutex, read_lock, write_lock};
