//! # qmconverge Common
//!
//! Shared utilities for the qmconverge crates.
//!
//! ## Logging
//!
//! ```rust,ignore
//! use qmconverge_common::{init_logging, LogFormat};
//!
//! init_logging("info", LogFormat::Pretty).unwrap();
//! tracing::info!(vm_name = "web-1", "Converging VM");
//! ```

pub mod logging;

pub use logging::{init_logging, init_logging_json, init_logging_pretty, LogFormat};
