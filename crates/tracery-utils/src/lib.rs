//! # tracery utilities
//!
//! Shared helpers for tracery binaries, currently the logging setup built on
//! `tracing`.

pub mod logging;

pub use logging::{init_logging, init_logging_with_level, LogFormat, LogLevel, LoggingError, LoggingGuard};
pub use tracing::{debug, error, info, trace, warn};
