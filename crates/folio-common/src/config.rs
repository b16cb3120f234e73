use serde::{Deserialize, Serialize};
use url::Url;

use std::future::Future;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{ConfigError, FolioError};

/// Settings for the rendering pipeline and its collaborators.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RenderConfig {
    /// Base URL of the deferred image placeholder resolver. Required.
    pub image_placeholder_endpoint: Option<String>,
    /// Base URL of the optimized image variant. When unset, images load from their source.
    pub image_optimize_endpoint: Option<String>,
    /// Asset path prefix for emoji tokens.
    pub emoji_asset_base: String,
    /// Optional bearer token for the GitHub API.
    pub github_token: Option<String>,
    /// GitHub API base URL.
    pub github_api_base: String,
    /// Optional bearer token for the GitLab API.
    pub gitlab_token: Option<String>,
    /// GitLab API base URL, including the version segment.
    pub gitlab_api_base: String,
    /// Hard timeout for any single outbound request, in milliseconds.
    pub fetch_timeout_ms: u64,
    /// Maximum number of response bytes read for a link preview.
    pub max_preview_bytes: usize,
    pub preview_cache_capacity: u64,
    pub preview_cache_ttl_secs: u64,
    pub stats_cache_capacity: u64,
    pub stats_cache_ttl_secs: u64,
    /// User agent for outbound requests.
    pub user_agent: String,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            image_placeholder_endpoint: None,
            image_optimize_endpoint: None,
            emoji_asset_base: "/emoji".to_owned(),
            github_token: None,
            github_api_base: "https://api.github.com".to_owned(),
            gitlab_token: None,
            gitlab_api_base: "https://gitlab.com/api/v4".to_owned(),
            fetch_timeout_ms: 5_000,
            max_preview_bytes: 512 * 1024,
            preview_cache_capacity: 1024,
            preview_cache_ttl_secs: 60 * 60,
            stats_cache_capacity: 512,
            stats_cache_ttl_secs: 6 * 60 * 60,
            user_agent: concat!("folio-renderer/", env!("CARGO_PKG_VERSION")).to_owned(),
        }
    }
}

impl RenderConfig {
    /// Loads the configuration from the provided loader.
    pub async fn load(loader: &impl Loader) -> Result<Self, FolioError> {
        loader.load().await
    }

    /// Reads settings from `FOLIO_*` environment variables on top of the defaults.
    ///
    /// - `FOLIO_IMAGE_PLACEHOLDER_ENDPOINT`
    /// - `FOLIO_IMAGE_OPTIMIZE_ENDPOINT`
    /// - `FOLIO_EMOJI_ASSET_BASE`
    /// - `FOLIO_GITHUB_API_BASE`
    /// - `FOLIO_GITLAB_API_BASE`
    /// - `FOLIO_FETCH_TIMEOUT_MS`
    /// - `GITHUB_TOKEN`
    /// - `GITLAB_TOKEN`
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().merge_env(|key| std::env::var(key).ok())
    }

    /// Overlays values from `lookup` (an environment-like source) onto `self`.
    pub fn merge_env(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        if let Some(v) = lookup("FOLIO_IMAGE_PLACEHOLDER_ENDPOINT") {
            self.image_placeholder_endpoint = Some(v);
        }
        if let Some(v) = lookup("FOLIO_IMAGE_OPTIMIZE_ENDPOINT") {
            self.image_optimize_endpoint = Some(v);
        }
        if let Some(v) = lookup("FOLIO_EMOJI_ASSET_BASE") {
            self.emoji_asset_base = v;
        }
        if let Some(v) = lookup("FOLIO_GITHUB_API_BASE") {
            self.github_api_base = v;
        }
        if let Some(v) = lookup("GITHUB_TOKEN").filter(|v| !v.is_empty()) {
            self.github_token = Some(v);
        }
        if let Some(v) = lookup("FOLIO_GITLAB_API_BASE") {
            self.gitlab_api_base = v;
        }
        if let Some(v) = lookup("GITLAB_TOKEN").filter(|v| !v.is_empty()) {
            self.gitlab_token = Some(v);
        }
        if let Some(v) = lookup("FOLIO_FETCH_TIMEOUT_MS") {
            self.fetch_timeout_ms = v.parse().map_err(|_| ConfigError::Invalid {
                key: "fetch_timeout_ms",
                reason: format!("`{v}` is not a number of milliseconds"),
            })?;
        }
        Ok(self)
    }

    /// Checks required settings and URL shapes.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let endpoint = self
            .image_placeholder_endpoint
            .as_deref()
            .filter(|e| !e.trim().is_empty())
            .ok_or(ConfigError::Missing {
                key: "image_placeholder_endpoint",
            })?;
        check_base_location("image_placeholder_endpoint", endpoint)?;
        if let Some(optimize) = &self.image_optimize_endpoint {
            check_base_location("image_optimize_endpoint", optimize)?;
        }
        Url::parse(&self.github_api_base).map_err(|e| ConfigError::Invalid {
            key: "github_api_base",
            reason: e.to_string(),
        })?;
        Url::parse(&self.gitlab_api_base).map_err(|e| ConfigError::Invalid {
            key: "gitlab_api_base",
            reason: e.to_string(),
        })?;
        if self.fetch_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                key: "fetch_timeout_ms",
                reason: "must be greater than zero".into(),
            });
        }
        Ok(())
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    pub fn preview_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.preview_cache_ttl_secs)
    }

    pub fn stats_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.stats_cache_ttl_secs)
    }
}

/// A base location is either root-relative (`/api/img`) or an absolute http(s) URL.
fn check_base_location(key: &'static str, value: &str) -> Result<(), ConfigError> {
    if value.starts_with('/') && !value.starts_with("//") {
        return Ok(());
    }
    match Url::parse(value) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => Ok(()),
        Ok(url) => Err(ConfigError::Invalid {
            key,
            reason: format!("unsupported scheme `{}`", url.scheme()),
        }),
        Err(e) => Err(ConfigError::Invalid {
            key,
            reason: e.to_string(),
        }),
    }
}

/// The trait for loading configuration data.
pub trait Loader {
    /// Loads the configuration data.
    fn load(&self) -> impl Future<Output = Result<RenderConfig, FolioError>> + Send;
}

/// An implementation of [`Loader`] that reads a configuration file.
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    /// Create a new [`FileStore`] with the given path.
    ///
    /// [`RenderConfig`] data will be deserialized based on the file extension.
    /// `.json` and `.toml` are supported.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl Loader for FileStore {
    async fn load(&self) -> Result<RenderConfig, FolioError> {
        match self.path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Ok(serde_json::from_str(&std::fs::read_to_string(
                &self.path,
            )?)?),
            Some("toml") => Ok(toml::from_str(&std::fs::read_to_string(&self.path)?)?),
            other => Err(ConfigError::UnsupportedFormat(other.unwrap_or("none").to_owned()).into()),
        }
    }
}
