//! Shared helpers

mod logger;
mod timer;

#[cfg(all(test, unix))]
pub(crate) mod script;

pub use logger::{init_logger, log_filter};
pub use timer::{as_millis, PhaseClock};
