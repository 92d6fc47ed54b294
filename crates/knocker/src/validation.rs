//! Site configuration checks, run before a site is stored and before each
//! validation job.

use anyhow::{Result, anyhow};
use url::Url;

use crate::site::{Site, ValidationMode};

/// Validation results with specific error messages
#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub error: Option<String>,
}

impl ValidationResult {
    pub fn ok() -> Self {
        Self { is_valid: true, error: None }
    }

    pub fn err(msg: impl Into<String>) -> Self {
        Self { is_valid: false, error: Some(msg.into()) }
    }

    pub fn to_result(&self) -> Result<()> {
        if self.is_valid {
            Ok(())
        } else {
            Err(anyhow!(self.error.clone().unwrap_or_else(|| "Validation failed".to_string())))
        }
    }

    fn and_then(self, next: impl FnOnce() -> ValidationResult) -> ValidationResult {
        if self.is_valid { next() } else { self }
    }
}

/// Validate HTTP/HTTPS URL endpoint
pub fn validate_http_endpoint(target: &str) -> ValidationResult {
    if target.trim().is_empty() {
        return ValidationResult::err("URL cannot be empty");
    }

    match Url::parse(target) {
        Ok(url) => {
            let scheme = url.scheme();
            if scheme != "http" && scheme != "https" {
                return ValidationResult::err(format!(
                    "Invalid scheme '{scheme}'. Must be http or https"
                ));
            }

            if url.host_str().is_none() {
                return ValidationResult::err("URL must have a valid host");
            }

            ValidationResult::ok()
        }
        Err(e) => {
            if !target.contains("://") {
                ValidationResult::err("URL must include scheme (http:// or https://)")
            } else {
                ValidationResult::err(format!("Invalid URL: {e}"))
            }
        }
    }
}

/// Validate check interval
pub fn validate_interval(interval_ms: u64) -> ValidationResult {
    if interval_ms == 0 {
        return ValidationResult::err("Check interval must be greater than zero");
    }

    ValidationResult::ok()
}

/// Validate network timeout
pub fn validate_timeout(timeout_ms: u64) -> ValidationResult {
    if timeout_ms == 0 {
        return ValidationResult::err("Network timeout must be greater than zero");
    }

    ValidationResult::ok()
}

/// Validate the mode-dependent arguments.
///
/// The messages double as the `configuration error: ...` reasons reported
/// by validation jobs.
pub fn validate_validation_args(mode: ValidationMode, args: Option<&str>) -> ValidationResult {
    let empty = args.is_none_or(|args| args.is_empty());
    match mode {
        ValidationMode::StatusCode => ValidationResult::ok(),
        ValidationMode::TermSearch if empty => ValidationResult::err("empty search term"),
        ValidationMode::JavaScript if args.is_none_or(|script| script.trim().is_empty()) => {
            ValidationResult::err("empty validation script")
        }
        _ => ValidationResult::ok(),
    }
}

/// Validate site name
pub fn validate_site_name(name: &str) -> ValidationResult {
    let trimmed = name.trim();

    if trimmed.is_empty() {
        return ValidationResult::err("Name cannot be empty");
    }

    if trimmed.len() > 100 {
        return ValidationResult::err("Name too long (max 100 characters)");
    }

    ValidationResult::ok()
}

/// Run every check on a site, returning the first failure
pub fn validate_site(site: &Site) -> ValidationResult {
    validate_site_name(&site.name)
        .and_then(|| validate_http_endpoint(&site.url))
        .and_then(|| validate_interval(site.check_interval_ms))
        .and_then(|| validate_timeout(site.network_timeout_ms))
        .and_then(|| {
            validate_validation_args(site.validation_mode, site.validation_args.as_deref())
        })
}
