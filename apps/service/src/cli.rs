use std::path::PathBuf;

use anyhow::{Result, anyhow};
use clap::{Parser, Subcommand};
use knocker::{Header, RetryPolicy, Site, SiteId, ValidationMode};

#[derive(Debug, Parser)]
#[command(
    name = "knocker",
    about = "Scheduled website validation",
    version,
    propagate_version = true
)]
pub struct Cli {
    /// Configuration file (default: $XDG_CONFIG_HOME/knocker/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the scheduler until interrupted
    Run {
        /// Do not emit success/failure notifications
        #[arg(long)]
        muted: bool,
    },
    /// Manage monitored sites
    Sites {
        #[command(subcommand)]
        action: SitesAction,
    },
    /// Validate one site now and print the outcome
    Check { id: i64 },
    /// Print the effective configuration
    Config,
}

#[derive(Debug, Subcommand)]
pub enum SitesAction {
    /// Add a site
    Add(AddSite),
    /// List sites
    List {
        /// Only sites carrying any of these tags
        #[arg(long)]
        tag: Vec<String>,
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Delete a site and its history
    Remove { id: i64 },
    /// Resume validating a site
    Enable { id: i64 },
    /// Stop validating a site without deleting it
    Disable { id: i64 },
    /// Show recent outcomes of a site
    History {
        id: i64,
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
        #[arg(long)]
        json: bool,
    },
}

#[derive(Debug, clap::Args)]
pub struct AddSite {
    pub name: String,
    pub url: String,
    /// Milliseconds between validations
    #[arg(long, default_value_t = 600_000)]
    pub interval_ms: u64,
    #[arg(long, default_value_t = 10_000)]
    pub timeout_ms: u64,
    /// status, term or js
    #[arg(long, default_value = "status")]
    pub mode: ValidationMode,
    /// Search term or script, depending on the mode
    #[arg(long)]
    pub args: Option<String>,
    /// Request header as "Name: value"; may be repeated
    #[arg(long = "header", value_parser = parse_header)]
    pub headers: Vec<Header>,
    /// Comma separated tags
    #[arg(long, default_value = "")]
    pub tags: String,
    /// PEM file with client certificate and key
    #[arg(long)]
    pub client_cert: Option<PathBuf>,
    /// Retries before a failure is reported
    #[arg(long, default_value_t = 0)]
    pub retries: u32,
    /// Minutes between retries
    #[arg(long, default_value_t = 1)]
    pub retry_interval: u32,
    /// Store the site without scheduling it
    #[arg(long)]
    pub disabled: bool,
}

impl AddSite {
    /// Site to insert; the id is assigned by the database
    pub fn into_site(self) -> Site {
        let mut site = Site::new(SiteId(0), self.name, self.url)
            .with_interval_ms(self.interval_ms)
            .with_timeout_ms(self.timeout_ms)
            .with_validation(self.mode, self.args)
            .with_retry_policy(RetryPolicy::new(self.retries, self.retry_interval))
            .with_tags(self.tags)
            .disabled(self.disabled);
        site.headers = self.headers;
        if let Some(path) = self.client_cert {
            site = site.with_client_certificate(path);
        }
        site
    }
}

fn parse_header(raw: &str) -> Result<Header> {
    let (key, value) =
        raw.split_once(':').ok_or_else(|| anyhow!("expected \"Name: value\", got {raw:?}"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(anyhow!("header name is empty in {raw:?}"));
    }
    Ok(Header::new(key, value.trim()))
}
