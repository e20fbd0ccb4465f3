//! # osprey-observability
//!
//! Structured logging bootstrap for the Osprey workspace.

pub mod logging;

pub use logging::{init_logging, init_logging_with_config, LoggingConfig};
