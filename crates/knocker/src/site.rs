use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{SiteStatus, ValidationOutcome};

/// Default check interval for new sites (10 minutes)
pub const DEFAULT_CHECK_INTERVAL_MS: u64 = 600_000;

/// Default network timeout for new sites
pub const DEFAULT_NETWORK_TIMEOUT_MS: u64 = 10_000;

/// Opaque site identifier assigned by the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SiteId(pub i64);

impl fmt::Display for SiteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How a response is judged healthy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValidationMode {
    /// Healthy if the status code is 2xx
    #[serde(rename = "STATUS_CODE")]
    StatusCode,
    /// Healthy if the body contains the search term
    #[serde(rename = "TERM_SEARCH")]
    TermSearch,
    /// Healthy if the validation script evaluates truthy
    #[serde(rename = "JAVASCRIPT")]
    JavaScript,
}

impl ValidationMode {
    /// Numeric code used by stores
    pub fn value(self) -> i64 {
        match self {
            ValidationMode::StatusCode => 1,
            ValidationMode::TermSearch => 2,
            ValidationMode::JavaScript => 3,
        }
    }

    pub fn from_value(value: i64) -> Option<Self> {
        match value {
            1 => Some(ValidationMode::StatusCode),
            2 => Some(ValidationMode::TermSearch),
            3 => Some(ValidationMode::JavaScript),
            _ => None,
        }
    }
}

impl fmt::Display for ValidationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationMode::StatusCode => write!(f, "status_code"),
            ValidationMode::TermSearch => write!(f, "term_search"),
            ValidationMode::JavaScript => write!(f, "javascript"),
        }
    }
}

impl FromStr for ValidationMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "status" | "status_code" => Ok(ValidationMode::StatusCode),
            "term" | "term_search" => Ok(ValidationMode::TermSearch),
            "js" | "javascript" => Ok(ValidationMode::JavaScript),
            other => Err(format!("unknown validation mode: {other}")),
        }
    }
}

/// One request header; keys may repeat
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub key: String,
    pub value: String,
}

impl Header {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self { key: key.into(), value: value.into() }
    }
}

/// Consecutive retries allowed before a failure becomes terminal
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub count: u32,
    pub interval_minutes: u32,
}

impl RetryPolicy {
    pub fn new(count: u32, interval_minutes: u32) -> Self {
        Self { count, interval_minutes }
    }

    /// Delay between a failed attempt and its retry
    pub fn interval(&self) -> chrono::Duration {
        chrono::Duration::minutes(i64::from(self.interval_minutes))
    }
}

/// Retry a site was waiting for when its last outcome was recorded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingRetry {
    /// 1-based retry number
    pub attempt: u32,
    pub at: DateTime<Utc>,
}

/// Last persisted result of a site
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastResult {
    pub status: SiteStatus,
    pub reason: Option<String>,
    pub timestamp: DateTime<Utc>,
    /// Status left by the last `Success` or `Failed`. Retries and dispatch
    /// never overwrite it.
    #[serde(default)]
    pub terminal_status: Option<SiteStatus>,
    #[serde(default)]
    pub pending_retry: Option<PendingRetry>,
}

impl LastResult {
    /// Result with no retry pending
    pub fn new(status: SiteStatus, reason: Option<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            status,
            reason,
            timestamp,
            terminal_status: Some(status).filter(|status| status.is_terminal()),
            pending_retry: None,
        }
    }

    /// What a store should hold after recording `outcome` on top of
    /// `previous`
    pub fn after(
        previous: Option<&LastResult>,
        outcome: &ValidationOutcome,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let terminal_status = if outcome.is_terminal() {
            Some(outcome.status())
        } else {
            previous.and_then(|previous| previous.terminal_status)
        };
        let pending_retry = match outcome {
            ValidationOutcome::RetryScheduled { attempt, next_attempt_at, .. } => {
                Some(PendingRetry { attempt: *attempt, at: *next_attempt_at })
            }
            _ => None,
        };

        Self {
            status: outcome.status(),
            reason: outcome.reason().map(str::to_string),
            timestamp,
            terminal_status,
            pending_retry,
        }
    }

    /// The same result while a job for the site is running
    pub fn checking(&self) -> Self {
        Self { status: SiteStatus::Checking, ..self.clone() }
    }
}

/// Site configuration snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Site {
    pub id: SiteId,
    pub name: String,
    /// Comma separated, compared case-insensitively
    pub tags: String,
    pub url: String,
    pub check_interval_ms: u64,
    pub network_timeout_ms: u64,
    pub validation_mode: ValidationMode,
    /// Search term for `TermSearch`, script source for `JavaScript`
    pub validation_args: Option<String>,
    pub headers: Vec<Header>,
    /// PEM file holding the client certificate and its private key
    pub client_certificate: Option<PathBuf>,
    pub retry_policy: RetryPolicy,
    pub disabled: bool,
    pub last_result: Option<LastResult>,
}

impl Site {
    /// Create a status-code site with default interval and timeout
    pub fn new(id: SiteId, name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            tags: String::new(),
            url: url.into(),
            check_interval_ms: DEFAULT_CHECK_INTERVAL_MS,
            network_timeout_ms: DEFAULT_NETWORK_TIMEOUT_MS,
            validation_mode: ValidationMode::StatusCode,
            validation_args: None,
            headers: Vec::new(),
            client_certificate: None,
            retry_policy: RetryPolicy::default(),
            disabled: false,
            last_result: None,
        }
    }

    pub fn with_interval_ms(mut self, check_interval_ms: u64) -> Self {
        self.check_interval_ms = check_interval_ms;
        self
    }

    pub fn with_timeout_ms(mut self, network_timeout_ms: u64) -> Self {
        self.network_timeout_ms = network_timeout_ms;
        self
    }

    /// Set the validation mode; `args` is ignored for `StatusCode`
    pub fn with_validation(mut self, mode: ValidationMode, args: Option<String>) -> Self {
        self.validation_mode = mode;
        self.validation_args = match mode {
            ValidationMode::StatusCode => None,
            _ => args,
        };
        self
    }

    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push(Header::new(key, value));
        self
    }

    pub fn with_tags(mut self, tags: impl Into<String>) -> Self {
        self.tags = tags.into();
        self
    }

    pub fn with_client_certificate(mut self, path: impl Into<PathBuf>) -> Self {
        self.client_certificate = Some(path.into());
        self
    }

    pub fn disabled(mut self, disabled: bool) -> Self {
        self.disabled = disabled;
        self
    }

    pub fn check_interval(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(i64::try_from(self.check_interval_ms).unwrap_or(i64::MAX))
    }

    pub fn network_timeout(&self) -> Duration {
        Duration::from_millis(self.network_timeout_ms)
    }

    /// Lowercased, non-empty tags
    pub fn tag_list(&self) -> Vec<String> {
        self.tags
            .to_lowercase()
            .split(',')
            .map(str::trim)
            .filter(|tag| !tag.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn has_any_tag(&self, tags: &[String]) -> bool {
        let own = self.tag_list();
        tags.iter().any(|tag| own.contains(&tag.to_lowercase()))
    }
}
