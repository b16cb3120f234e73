//! Outbound HTTP for enrichment.
//!
//! Everything network-facing goes through [`Fetcher`] so tests and offline
//! renders can swap in their own implementation.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use folio_common::{ConfigError, RenderConfig};
use http::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use miette::Diagnostic;
use reqwest::dns::{Addrs, Name, Resolve, Resolving};
use thiserror::Error;
use url::Url;

use crate::utils::{is_private_host, is_private_ip};

#[derive(Debug, Clone)]
pub struct FetchedPage {
    /// Location after redirects.
    pub final_url: Url,
    pub status: u16,
    pub content_type: Option<String>,
    /// At most the configured number of bytes, lossily decoded.
    pub body: String,
}

impl FetchedPage {
    pub fn is_html(&self) -> bool {
        self.content_type
            .as_deref()
            .map(|ct| ct.to_ascii_lowercase())
            .is_some_and(|ct| ct.contains("text/html") || ct.contains("application/xhtml+xml"))
    }
}

#[derive(Debug, Error, Diagnostic)]
pub enum FetchError {
    #[error("request timed out")]
    #[diagnostic(code(folio::fetch::timeout))]
    Timeout,

    #[error("unexpected status {0}")]
    #[diagnostic(code(folio::fetch::status))]
    Status(u16),

    #[error("response is not HTML ({0})")]
    #[diagnostic(code(folio::fetch::not_html))]
    NotHtml(String),

    #[error("refusing to fetch {0}")]
    #[diagnostic(
        code(folio::fetch::blocked),
        help("only public http(s) hosts are fetched")
    )]
    Blocked(String),

    #[error("invalid url `{0}`")]
    #[diagnostic(code(folio::fetch::invalid_url))]
    InvalidUrl(String),

    #[error("invalid response body: {0}")]
    #[diagnostic(code(folio::fetch::decode))]
    Decode(String),

    #[error("transport error: {0}")]
    #[diagnostic(code(folio::fetch::transport))]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Timeout
        } else if let Some(status) = err.status() {
            FetchError::Status(status.as_u16())
        } else {
            FetchError::Transport(Box::new(err))
        }
    }
}

#[async_trait]
pub trait Fetcher: Send + Sync {
    /// GET an HTML page, reading at most `max_bytes` of the body.
    async fn fetch_page(&self, url: &Url, max_bytes: usize) -> Result<FetchedPage, FetchError>;

    /// GET a JSON document, optionally with a bearer token.
    async fn fetch_json(
        &self,
        url: &Url,
        bearer: Option<&str>,
    ) -> Result<serde_json::Value, FetchError>;
}

const MAX_REDIRECTS: usize = 5;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// System resolver with private addresses filtered out, so a public name
/// that points inward never gets a connection.
#[derive(Debug, Default)]
struct PublicResolver;

impl Resolve for PublicResolver {
    fn resolve(&self, name: Name) -> Resolving {
        Box::pin(resolve_public(name.as_str().to_owned()))
    }
}

async fn resolve_public(host: String) -> Result<Addrs, BoxError> {
    let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host.as_str(), 0))
        .await?
        .filter(|addr| !is_private_ip(addr.ip()))
        .collect();
    if addrs.is_empty() {
        tracing::debug!(host, "refusing host with only private addresses");
        return Err(format!("{host} resolves only to private addresses").into());
    }
    Ok(Box::new(addrs.into_iter()))
}

/// [`Fetcher`] backed by a shared reqwest client.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(config: &RenderConfig) -> Result<Self, ConfigError> {
        let redirects = reqwest::redirect::Policy::custom(|attempt| {
            if attempt.previous().len() >= MAX_REDIRECTS {
                attempt.error("too many redirects")
            } else if is_private_host(attempt.url()) {
                attempt.stop()
            } else {
                attempt.follow()
            }
        });
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(config.fetch_timeout())
            .redirect(redirects)
            .dns_resolver(Arc::new(PublicResolver))
            .build()
            .map_err(|e| ConfigError::Invalid {
                key: "user_agent",
                reason: e.to_string(),
            })?;
        Ok(Self { client })
    }

    fn check(url: &Url) -> Result<(), FetchError> {
        if !matches!(url.scheme(), "http" | "https") || is_private_host(url) {
            return Err(FetchError::Blocked(url.to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    #[tracing::instrument(level = "debug", skip(self), fields(url = %url))]
    async fn fetch_page(&self, url: &Url, max_bytes: usize) -> Result<FetchedPage, FetchError> {
        Self::check(url)?;
        let mut resp = self
            .client
            .get(url.clone())
            .header(ACCEPT, "text/html,application/xhtml+xml;q=0.9,*/*;q=0.1")
            .send()
            .await?;

        let final_url = resp.url().clone();
        let status = resp.status().as_u16();
        let content_type = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        let mut page = FetchedPage {
            final_url,
            status,
            content_type,
            body: String::new(),
        };
        if !resp.status().is_success() || !page.is_html() {
            return Ok(page);
        }

        let mut buf: Vec<u8> = Vec::with_capacity(max_bytes.min(64 * 1024));
        while let Some(chunk) = resp.chunk().await? {
            let room = max_bytes.saturating_sub(buf.len());
            buf.extend_from_slice(&chunk[..chunk.len().min(room)]);
            if buf.len() >= max_bytes {
                break;
            }
        }
        page.body = String::from_utf8_lossy(&buf).into_owned();
        tracing::debug!(status, bytes = buf.len(), "fetched page");
        Ok(page)
    }

    #[tracing::instrument(level = "debug", skip(self, bearer), fields(url = %url))]
    async fn fetch_json(
        &self,
        url: &Url,
        bearer: Option<&str>,
    ) -> Result<serde_json::Value, FetchError> {
        Self::check(url)?;
        let mut req = self
            .client
            .get(url.clone())
            .header(ACCEPT, "application/vnd.github+json, application/json");
        if let Some(token) = bearer {
            req = req.header(AUTHORIZATION, format!("Bearer {token}"));
        }
        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }
        resp.json()
            .await
            .map_err(|e| FetchError::Decode(e.to_string()))
    }
}
