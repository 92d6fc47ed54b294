use std::error::Error as StdError;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{HeaderName, HeaderValue};
use reqwest::redirect::Policy;
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::DEFAULT_USER_AGENT;
use crate::error::ValidationError;
use crate::site::{Header, Site};

/// Redirect hops followed before giving up
pub const DEFAULT_MAX_REDIRECTS: usize = 5;

/// Everything the prober needs to reach a site
#[derive(Debug, Clone)]
pub struct ProbeRequest {
    pub url: String,
    pub timeout: Duration,
    pub headers: Vec<Header>,
    pub client_certificate: Option<PathBuf>,
}

impl ProbeRequest {
    pub fn for_site(site: &Site) -> Self {
        Self {
            url: site.url.clone(),
            timeout: site.network_timeout(),
            headers: site.headers.clone(),
            client_certificate: site.client_certificate.clone(),
        }
    }
}

/// Raw response; the body is left undecoded for the validators
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl ProbeResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self { status, body: body.into() }
    }

    /// Body as UTF-8 text; binary bodies fail text validators
    pub fn body_text(&self) -> Result<&str, ValidationError> {
        std::str::from_utf8(&self.body)
            .map_err(|_| ValidationError::Validator("response body is not valid UTF-8".to_string()))
    }
}

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("invalid url {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("invalid header {name:?}: {reason}")]
    InvalidHeader { name: String, reason: String },

    #[error("client certificate {}: {reason}", path.display())]
    Certificate { path: PathBuf, reason: String },

    #[error("request timed out after {0} ms")]
    Timeout(u128),

    #[error("{0}")]
    Redirect(String),

    #[error("{0}")]
    Transport(String),
}

impl ProbeError {
    /// Misconfiguration rather than a network condition
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            ProbeError::InvalidUrl { .. }
                | ProbeError::InvalidHeader { .. }
                | ProbeError::Certificate { .. }
        )
    }
}

impl From<ProbeError> for ValidationError {
    fn from(error: ProbeError) -> Self {
        if error.is_configuration() {
            ValidationError::Configuration(error.to_string())
        } else {
            ValidationError::Transport(error.to_string())
        }
    }
}

/// Performs the network side of a validation
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, request: &ProbeRequest) -> Result<ProbeResponse, ProbeError>;
}

/// Client-wide prober settings
#[derive(Debug, Clone)]
pub struct ProberOptions {
    pub user_agent: String,
    pub max_redirects: usize,
}

impl Default for ProberOptions {
    fn default() -> Self {
        Self { user_agent: DEFAULT_USER_AGENT.to_string(), max_redirects: DEFAULT_MAX_REDIRECTS }
    }
}

/// HTTP/HTTPS prober backed by reqwest
pub struct HttpProber {
    client: reqwest::Client,
    options: ProberOptions,
}

impl HttpProber {
    pub fn new(options: ProberOptions) -> Result<Self, ProbeError> {
        let client = client_builder(&options)
            .build()
            .map_err(|e| ProbeError::Transport(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client, options })
    }

    /// Client carrying a TLS identity; built per probe so rotated
    /// certificates are picked up without a restart.
    async fn client_with_identity(&self, path: &Path) -> Result<reqwest::Client, ProbeError> {
        let certificate_error =
            |reason: String| ProbeError::Certificate { path: path.to_path_buf(), reason };

        let pem = tokio::fs::read(path).await.map_err(|e| certificate_error(e.to_string()))?;
        let identity =
            reqwest::Identity::from_pem(&pem).map_err(|e| certificate_error(describe(&e)))?;

        client_builder(&self.options)
            .identity(identity)
            .build()
            .map_err(|e| certificate_error(describe(&e)))
    }
}

#[async_trait]
impl Prober for HttpProber {
    async fn probe(&self, request: &ProbeRequest) -> Result<ProbeResponse, ProbeError> {
        let url = parse_url(&request.url)?;

        let client = match &request.client_certificate {
            Some(path) => self.client_with_identity(path).await?,
            None => self.client.clone(),
        };

        let mut builder = client.get(url).timeout(request.timeout);
        for header in &request.headers {
            let (name, value) = header_pair(header)?;
            builder = builder.header(name, value);
        }

        let start = Instant::now();
        let response = builder.send().await.map_err(|e| classify(e, request.timeout))?;
        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(|e| classify(e, request.timeout))?;

        debug!(
            url = %request.url,
            status,
            bytes = body.len(),
            latency_ms = start.elapsed().as_millis() as u64,
            "probe finished"
        );

        Ok(ProbeResponse { status, body: body.to_vec() })
    }
}

fn client_builder(options: &ProberOptions) -> reqwest::ClientBuilder {
    reqwest::Client::builder()
        .user_agent(options.user_agent.clone())
        .redirect(redirect_policy(options.max_redirects))
}

/// Follow at most `max_redirects` hops and refuse to revisit a URL.
fn redirect_policy(max_redirects: usize) -> Policy {
    Policy::custom(move |attempt| {
        if attempt.previous().iter().any(|seen| seen == attempt.url()) {
            let looped = format!("redirect loop detected at {}", attempt.url());
            attempt.error(looped)
        } else if attempt.previous().len() > max_redirects {
            attempt.error(format!("too many redirects (max {max_redirects})"))
        } else {
            attempt.follow()
        }
    })
}

fn parse_url(raw: &str) -> Result<Url, ProbeError> {
    let invalid = |reason: String| ProbeError::InvalidUrl { url: raw.to_string(), reason };

    let url = Url::parse(raw).map_err(|e| invalid(e.to_string()))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(invalid(format!("unsupported scheme {other}"))),
    }
}

fn header_pair(header: &Header) -> Result<(HeaderName, HeaderValue), ProbeError> {
    let invalid = |reason: String| ProbeError::InvalidHeader { name: header.key.clone(), reason };

    let name = HeaderName::from_bytes(header.key.as_bytes()).map_err(|e| invalid(e.to_string()))?;
    let value = HeaderValue::from_str(&header.value).map_err(|e| invalid(e.to_string()))?;
    Ok((name, value))
}

fn classify(error: reqwest::Error, timeout: Duration) -> ProbeError {
    if error.is_timeout() {
        ProbeError::Timeout(timeout.as_millis())
    } else if error.is_redirect() {
        ProbeError::Redirect(describe(&error))
    } else {
        ProbeError::Transport(describe(&error))
    }
}

/// Error message including its source chain
fn describe(error: &dyn StdError) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        let cause_message = cause.to_string();
        if !message.contains(&cause_message) {
            message.push_str(": ");
            message.push_str(&cause_message);
        }
        source = cause.source();
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::site::SiteId;

    #[test]
    fn test_probe_request_for_site() {
        let site = Site::new(SiteId(7), "Test", "https://test.com")
            .with_timeout_ms(2500)
            .with_header("Content-Type", "text/html")
            .with_header("X-Twice", "a")
            .with_header("X-Twice", "b");

        let request = ProbeRequest::for_site(&site);
        assert_eq!(request.url, "https://test.com");
        assert_eq!(request.timeout, Duration::from_millis(2500));
        assert_eq!(request.headers.len(), 3);
        assert_eq!(request.headers[2], Header::new("X-Twice", "b"));
    }

    #[test]
    fn test_parse_url_rejects_non_http() {
        assert!(parse_url("https://example.com").is_ok());
        assert!(matches!(parse_url("ftp://example.com"), Err(ProbeError::InvalidUrl { .. })));
        assert!(matches!(parse_url("helloworld"), Err(ProbeError::InvalidUrl { .. })));
    }

    #[test]
    fn test_header_pair_rejects_bad_names() {
        assert!(header_pair(&Header::new("User-Agent", "NockNock")).is_ok());
        assert!(header_pair(&Header::new("Bad Header", "x")).is_err());
        assert!(header_pair(&Header::new("X-Line", "a\nb")).is_err());
    }

    #[test]
    fn test_probe_error_classification() {
        let config: ValidationError =
            ProbeError::InvalidUrl { url: "x".into(), reason: "relative URL".into() }.into();
        assert!(!config.is_retryable());
        assert!(config.to_string().starts_with("configuration error:"));

        let transport: ValidationError = ProbeError::Timeout(10_000).into();
        assert!(transport.is_retryable());
        assert_eq!(transport.to_string(), "network error: request timed out after 10000 ms");
    }

    #[test]
    fn test_body_text() {
        assert_eq!(ProbeResponse::new(200, "hello").body_text(), Ok("hello"));
        assert!(ProbeResponse::new(200, vec![0xff, 0xfe]).body_text().is_err());
    }

    #[tokio::test]
    async fn test_missing_certificate_is_configuration_error() {
        let prober = HttpProber::new(ProberOptions::default()).unwrap();
        let request = ProbeRequest {
            url: "https://example.com".to_string(),
            timeout: Duration::from_secs(1),
            headers: Vec::new(),
            client_certificate: Some(PathBuf::from("/nonexistent/knocker/client.pem")),
        };

        let error = prober.probe(&request).await.unwrap_err();
        assert!(error.is_configuration(), "unexpected error: {error}");
    }
}
