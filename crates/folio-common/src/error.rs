//! Error types shared across folio crates.

use http::StatusCode;
use miette::Diagnostic;

/// Main error type for folio operations outside a single render.
///
/// A render itself never fails; these surface from construction, config
/// loading and the collaborator interfaces.
#[derive(thiserror::Error, Debug, Diagnostic)]
pub enum FolioError {
    /// Missing or malformed configuration
    #[error(transparent)]
    #[diagnostic_source]
    Config(#[from] ConfigError),

    /// IO error
    #[error(transparent)]
    #[diagnostic(code(folio::io))]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error(transparent)]
    #[diagnostic_source]
    Serde(#[from] SerDeError),

    /// Outbound request failed
    #[error("fetch failed for {url}: {message}")]
    #[diagnostic(code(folio::fetch))]
    Fetch { url: String, message: String },
}

/// Configuration error.
///
/// Carries an HTTP-like status so a calling service can map it straight onto
/// a response. These are never retried.
#[derive(thiserror::Error, Debug, Diagnostic, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("required setting `{key}` is not set")]
    #[diagnostic(
        code(folio::config::missing),
        help("set `{key}` in the config file or the matching FOLIO_* environment variable")
    )]
    Missing { key: &'static str },

    #[error("setting `{key}` has an invalid value: {reason}")]
    #[diagnostic(code(folio::config::invalid))]
    Invalid { key: &'static str, reason: String },

    #[error("unsupported config file format: {0}")]
    #[diagnostic(code(folio::config::format))]
    UnsupportedFormat(String),
}

impl ConfigError {
    pub fn status(&self) -> StatusCode {
        match self {
            ConfigError::Missing { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            ConfigError::Invalid { .. } | ConfigError::UnsupportedFormat(_) => {
                StatusCode::BAD_REQUEST
            }
        }
    }
}

/// Serialization/deserialization errors
#[derive(thiserror::Error, Debug, Diagnostic)]
#[non_exhaustive]
pub enum SerDeError {
    #[error(transparent)]
    #[diagnostic(code(folio::serde::json))]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    #[diagnostic(code(folio::serde::toml))]
    Toml(#[from] toml::de::Error),
}

impl From<serde_json::Error> for FolioError {
    fn from(err: serde_json::Error) -> Self {
        FolioError::Serde(SerDeError::Json(err))
    }
}

impl From<toml::de::Error> for FolioError {
    fn from(err: toml::de::Error) -> Self {
        FolioError::Serde(SerDeError::Toml(err))
    }
}
