//! Shared plumbing for the folio crates: errors, configuration, caches and
//! logging setup.

#[cfg(feature = "cache")]
pub mod cache;
pub mod config;
pub mod error;
#[cfg(feature = "telemetry")]
pub mod telemetry;

pub use crate::config::RenderConfig;
pub use crate::error::{ConfigError, FolioError, SerDeError};
