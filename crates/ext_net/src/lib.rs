//! ext_net - Redirect-bounded HTTP fetcher for Ren3D
//!
//! Downloads text documents (UI update payloads) over http or https.
//! Redirects are followed by hand so that every hop is counted and checked
//! against the capability checker; more than [`MAX_REDIRECTS`] hops fail.

use reqwest::header::LOCATION;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

// ============================================================================
// Error Types with Structured Codes
// ============================================================================

/// Error codes for network operations (for machine-readable errors)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum NetErrorCode {
    /// Generic IO error
    Io = 1000,
    /// Permission denied by capability system
    PermissionDenied = 1001,
    /// Invalid URL format
    InvalidUrl = 1002,
    /// Request timeout
    Timeout = 1003,
    /// Connection failed
    ConnectionFailed = 1004,
    /// HTTP error response
    HttpError = 1005,
    /// Request building failed
    RequestBuildError = 1006,
    /// Redirect chain longer than allowed
    TooManyRedirects = 1013,
}

/// Custom error type for Net operations
#[derive(Debug, thiserror::Error)]
pub enum NetError {
    #[error("[{code}] IO error: {message}")]
    Io { code: u32, message: String },

    #[error("[{code}] Permission denied: {message}")]
    PermissionDenied { code: u32, message: String },

    #[error("[{code}] Invalid URL: {message}")]
    InvalidUrl { code: u32, message: String },

    #[error("[{code}] Request timeout: {message}")]
    Timeout { code: u32, message: String },

    #[error("[{code}] Connection failed: {message}")]
    ConnectionFailed { code: u32, message: String },

    #[error("[{code}] HTTP error: {message}")]
    HttpError {
        code: u32,
        status: u16,
        message: String,
    },

    #[error("[{code}] Request build error: {message}")]
    RequestBuildError { code: u32, message: String },

    #[error("[{code}] {message}")]
    TooManyRedirects { code: u32, message: String },
}

impl NetError {
    pub fn io(message: impl Into<String>) -> Self {
        Self::Io {
            code: NetErrorCode::Io as u32,
            message: message.into(),
        }
    }

    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::PermissionDenied {
            code: NetErrorCode::PermissionDenied as u32,
            message: message.into(),
        }
    }

    pub fn invalid_url(message: impl Into<String>) -> Self {
        Self::InvalidUrl {
            code: NetErrorCode::InvalidUrl as u32,
            message: message.into(),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Timeout {
            code: NetErrorCode::Timeout as u32,
            message: message.into(),
        }
    }

    pub fn connection_failed(message: impl Into<String>) -> Self {
        Self::ConnectionFailed {
            code: NetErrorCode::ConnectionFailed as u32,
            message: message.into(),
        }
    }

    pub fn http_error(status: u16, message: impl Into<String>) -> Self {
        Self::HttpError {
            code: NetErrorCode::HttpError as u32,
            status,
            message: message.into(),
        }
    }

    pub fn request_build_error(message: impl Into<String>) -> Self {
        Self::RequestBuildError {
            code: NetErrorCode::RequestBuildError as u32,
            message: message.into(),
        }
    }

    pub fn too_many_redirects() -> Self {
        Self::TooManyRedirects {
            code: NetErrorCode::TooManyRedirects as u32,
            message: "Too many redirects".to_string(),
        }
    }

    /// Message without the code prefix, as shown to the rendering context.
    pub fn message(&self) -> &str {
        match self {
            Self::Io { message, .. }
            | Self::PermissionDenied { message, .. }
            | Self::InvalidUrl { message, .. }
            | Self::Timeout { message, .. }
            | Self::ConnectionFailed { message, .. }
            | Self::HttpError { message, .. }
            | Self::RequestBuildError { message, .. }
            | Self::TooManyRedirects { message, .. } => message,
        }
    }

    /// HTTP status of a protocol failure, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::HttpError { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for NetError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::timeout(e.to_string())
        } else if e.is_connect() {
            Self::connection_failed(e.to_string())
        } else if e.is_builder() || e.is_request() {
            Self::request_build_error(e.to_string())
        } else if let Some(status) = e.status() {
            Self::http_error(status.as_u16(), e.to_string())
        } else {
            Self::io(e.to_string())
        }
    }
}

impl From<url::ParseError> for NetError {
    fn from(e: url::ParseError) -> Self {
        Self::invalid_url(e.to_string())
    }
}

// ============================================================================
// Capability Checker
// ============================================================================

/// Capability checker trait - allows the host to restrict reachable hosts
pub trait NetCapabilityChecker: Send + Sync {
    fn check_connect(&self, host: &str) -> Result<(), String>;
}

/// Default permissive checker (for dev mode)
pub struct PermissiveNetChecker;

impl NetCapabilityChecker for PermissiveNetChecker {
    fn check_connect(&self, _host: &str) -> Result<(), String> {
        Ok(())
    }
}

/// `host[:port]` of a parsed URL, port only when not the scheme default.
fn host_key(url: &Url) -> Result<String, NetError> {
    let host = url
        .host_str()
        .ok_or_else(|| NetError::invalid_url("URL has no host"))?;

    match url.port() {
        Some(port) => Ok(format!("{}:{}", host, port)),
        None => Ok(host.to_string()),
    }
}

// ============================================================================
// Fetcher
// ============================================================================

/// Redirect hops allowed per fetch.
pub const MAX_REDIRECTS: u32 = 5;

#[derive(Debug, Clone)]
pub struct FetcherConfig {
    pub timeout: Duration,
    pub user_agent: String,
    /// Honor `HTTP_PROXY`-style environment variables.
    pub system_proxy: bool,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            user_agent: concat!("Ren3D/", env!("CARGO_PKG_VERSION")).to_string(),
            system_proxy: true,
        }
    }
}

/// A successfully fetched text document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedDocument {
    /// URL the body was finally served from.
    pub url: String,
    pub status: u16,
    pub body: String,
    /// Redirects followed to get here.
    pub hops: u32,
}

pub struct Fetcher {
    client: reqwest::Client,
    checker: Arc<dyn NetCapabilityChecker>,
}

impl Fetcher {
    pub fn new(config: FetcherConfig) -> Result<Self, NetError> {
        let mut builder = reqwest::Client::builder()
            .user_agent(config.user_agent)
            .timeout(config.timeout)
            .redirect(reqwest::redirect::Policy::none());
        if !config.system_proxy {
            builder = builder.no_proxy();
        }
        let client = builder.build()?;

        Ok(Self {
            client,
            checker: Arc::new(PermissiveNetChecker),
        })
    }

    pub fn with_checker(mut self, checker: Arc<dyn NetCapabilityChecker>) -> Self {
        self.checker = checker;
        self
    }

    /// GET `url` and return its body as text, following up to
    /// [`MAX_REDIRECTS`] redirects.
    pub async fn fetch_text(&self, url: &str) -> Result<FetchedDocument, NetError> {
        let mut current = parse_http_url(url)?;
        let mut hops: u32 = 0;

        loop {
            let host = host_key(&current)?;
            self.checker
                .check_connect(&host)
                .map_err(NetError::permission_denied)?;

            debug!(url = %current, hops = hops, "net.fetch");

            let response = self.client.get(current.clone()).send().await?;
            let status = response.status();

            if status.is_redirection() {
                let location = response
                    .headers()
                    .get(LOCATION)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_owned);

                let Some(location) = location else {
                    return Err(NetError::http_error(
                        status.as_u16(),
                        format!("HTTP {} redirect without Location", status.as_u16()),
                    ));
                };

                hops += 1;
                if hops > MAX_REDIRECTS {
                    warn!(url = %url, "redirect limit exceeded");
                    return Err(NetError::too_many_redirects());
                }

                let next = current.join(&location)?;
                current = ensure_http(next)?;
                continue;
            }

            if !status.is_success() {
                return Err(NetError::http_error(
                    status.as_u16(),
                    format!(
                        "HTTP {} {}",
                        status.as_u16(),
                        status.canonical_reason().unwrap_or("")
                    )
                    .trim_end()
                    .to_string(),
                ));
            }

            let body = response.text().await?;
            debug!(status = status.as_u16(), body_len = body.len(), hops = hops, "net.fetch complete");

            return Ok(FetchedDocument {
                url: current.to_string(),
                status: status.as_u16(),
                body,
                hops,
            });
        }
    }
}

fn parse_http_url(url: &str) -> Result<Url, NetError> {
    ensure_http(Url::parse(url)?)
}

fn ensure_http(url: Url) -> Result<Url, NetError> {
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(NetError::invalid_url(format!(
            "unsupported scheme: {}",
            other
        ))),
    }
}
