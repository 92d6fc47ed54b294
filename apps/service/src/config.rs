use std::time::Duration;
use std::{env, fmt, fs, io, path};

use knocker::checker::DEFAULT_MAX_REDIRECTS;
use knocker::{DEFAULT_USER_AGENT, ProberOptions, SandboxLimits, SchedulerOptions};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::retention::RetentionPolicy;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    ReadFailed { path: path::PathBuf, source: io::Error },

    #[error("failed to write {}: {source}", path.display())]
    WriteFailed { path: path::PathBuf, source: io::Error },

    #[error("invalid configuration: {0}")]
    ParseFailed(#[from] toml::de::Error),

    #[error("failed to serialize configuration: {0}")]
    SerializeFailed(#[from] toml::ser::Error),

    #[error("no configuration directory; set XDG_CONFIG_HOME or HOME")]
    ConfigPathUnavailable,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub scheduler: Scheduler,
    pub http: Http,
    pub script: Script,
    pub database: Database,
    pub retention: Retention,
    pub log: Log,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Scheduler {
    pub max_concurrent_checks: usize,
    pub reconcile_interval_seconds: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Http {
    pub user_agent: String,
    pub max_redirects: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Script {
    pub timeout_ms: u64,
    pub loop_iteration_limit: u64,
    pub recursion_limit: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Database {
    pub path: path::PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Retention {
    /// Days of validation history to keep; 0 keeps everything
    pub result_days: u32,
    pub cleanup_interval_seconds: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Log {
    pub level: String,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self {
            max_concurrent_checks: SchedulerOptions::default().max_concurrent_checks,
            reconcile_interval_seconds: 60,
        }
    }
}

impl Default for Http {
    fn default() -> Self {
        Self { user_agent: DEFAULT_USER_AGENT.into(), max_redirects: DEFAULT_MAX_REDIRECTS }
    }
}

impl Default for Script {
    fn default() -> Self {
        let limits = SandboxLimits::default();
        Self {
            timeout_ms: limits.timeout.as_millis() as u64,
            loop_iteration_limit: limits.loop_iteration_limit,
            recursion_limit: limits.recursion_limit,
        }
    }
}

impl Default for Database {
    fn default() -> Self {
        Self { path: default_database_path() }
    }
}

impl Default for Retention {
    fn default() -> Self {
        let policy = RetentionPolicy::default();
        Self {
            result_days: policy.result_days,
            cleanup_interval_seconds: policy.cleanup_interval.as_secs(),
        }
    }
}

impl Default for Log {
    fn default() -> Self {
        Self { level: "info".into() }
    }
}

/// Used to ensure we are actually reading a toml file
fn normalize_toml_path(path: &path::Path) -> path::PathBuf {
    let mut path = path.to_path_buf();
    if path.extension().map(|ext| ext != "toml").unwrap_or(true) {
        path.set_extension("toml");
    }
    path
}

/// Get default config path ($XDG_CONFIG_HOME/knocker/config.toml or
/// $HOME/.config/...)
fn default_config_path() -> Result<path::PathBuf, ConfigError> {
    let path = if let Ok(config_home) = env::var("XDG_CONFIG_HOME") {
        path::PathBuf::from(config_home)
    } else if let Some(home_dir) = env::home_dir() {
        home_dir.join(".config")
    } else {
        return Err(ConfigError::ConfigPathUnavailable);
    };

    Ok(path.join("knocker/config.toml"))
}

/// $XDG_DATA_HOME/knocker/knocker.db, $HOME/.local/share/... or the working
/// directory as a last resort
fn default_database_path() -> path::PathBuf {
    let data_home = if let Ok(data_home) = env::var("XDG_DATA_HOME") {
        path::PathBuf::from(data_home)
    } else if let Some(home_dir) = env::home_dir() {
        home_dir.join(".local/share")
    } else {
        return path::PathBuf::from("knocker.db");
    };

    data_home.join("knocker/knocker.db")
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let write_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str, value: &dyn fmt::Display| {
                writeln!(f, "  {:indent$}{}: {}", "", label, value, indent = level * 2)
            }
        };
        let write_title_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str| {
                writeln!(f, "{:indent$}{}", "", label, indent = level * 2)
            }
        };

        let write_title_1 = write_title_indented(1);
        let write_1 = write_indented(1);

        writeln!(f, "Current Internal Configuration State:")?;
        write_title_1(f, "Scheduler")?;
        write_1(f, "Max Concurrent Checks", &self.scheduler.max_concurrent_checks)?;
        write_1(f, "Reconcile Interval (s)", &self.scheduler.reconcile_interval_seconds)?;
        write_title_1(f, "HTTP")?;
        write_1(f, "User Agent", &self.http.user_agent)?;
        write_1(f, "Max Redirects", &self.http.max_redirects)?;
        write_title_1(f, "Script")?;
        write_1(f, "Timeout (ms)", &self.script.timeout_ms)?;
        write_1(f, "Loop Iteration Limit", &self.script.loop_iteration_limit)?;
        write_1(f, "Recursion Limit", &self.script.recursion_limit)?;
        write_title_1(f, "Database")?;
        write_1(f, "Path", &self.database.path.display())?;
        write_title_1(f, "Retention")?;
        write_1(f, "Result Days", &self.retention.result_days)?;
        write_1(f, "Cleanup Interval (s)", &self.retention.cleanup_interval_seconds)?;
        write_title_1(f, "Log")?;
        write_1(f, "Level", &self.log.level)?;

        Ok(())
    }
}

impl Config {
    /// Generate Config structure from file
    ///
    /// Creates a default config in ~/.config/knocker/config.toml
    ///  or the specified path, with the name config.toml if one does not exist
    ///
    /// ```rust,ignore
    /// let cfg = config::Config::from_config(None::<&path::Path>)?;
    /// println!("{}", cfg);
    /// ```
    pub fn from_config(optional_path: Option<impl AsRef<path::Path>>) -> Result<Self, ConfigError> {
        let config_path: path::PathBuf = if let Some(path) = optional_path {
            normalize_toml_path(path.as_ref())
        } else {
            default_config_path()?
        };

        if config_path.exists() {
            let raw_string = fs::read_to_string(&config_path)
                .map_err(|source| ConfigError::ReadFailed { path: config_path.clone(), source })?;
            Ok(toml::from_str(raw_string.as_str())?)
        } else {
            let config = Self::default();
            config.write_config(&config_path)?;
            Ok(config)
        }
    }

    /// Serialize and write a config to a file
    pub fn write_config(&self, path: &path::Path) -> Result<(), ConfigError> {
        let config_str: String = toml::to_string_pretty(self)?;
        let write_failed = |source| ConfigError::WriteFailed { path: path.to_path_buf(), source };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(write_failed)?;
        }

        fs::write(path, config_str).map_err(write_failed)
    }

    pub fn scheduler_options(&self) -> SchedulerOptions {
        SchedulerOptions { max_concurrent_checks: self.scheduler.max_concurrent_checks }
    }

    pub fn prober_options(&self) -> ProberOptions {
        ProberOptions {
            user_agent: self.http.user_agent.clone(),
            max_redirects: self.http.max_redirects,
        }
    }

    pub fn sandbox_limits(&self) -> SandboxLimits {
        SandboxLimits {
            timeout: Duration::from_millis(self.script.timeout_ms),
            loop_iteration_limit: self.script.loop_iteration_limit,
            recursion_limit: self.script.recursion_limit,
        }
    }

    /// Period of the background reconciliation pass; never zero
    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.scheduler.reconcile_interval_seconds.max(1))
    }

    pub fn retention_policy(&self) -> RetentionPolicy {
        RetentionPolicy {
            result_days: self.retention.result_days,
            cleanup_interval: Duration::from_secs(self.retention.cleanup_interval_seconds.max(1)),
        }
    }
}
