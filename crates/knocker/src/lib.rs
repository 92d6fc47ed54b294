//! Knocker - periodic site validation
//!
//! This library owns the per-site validation schedule: it probes sites over
//! HTTP, judges the response with the site's validation mode, applies the
//! retry policy and hands outcomes to a [`SiteStore`] and a [`Notifier`].

pub mod checker;
pub mod error;
pub mod executor;
pub mod memory;
pub mod retry;
pub mod scheduler;
pub mod sink;
pub mod site;
pub mod types;
pub mod validation;
pub mod validators;

// Re-export main types
pub use checker::{HttpProber, ProbeError, ProbeRequest, ProbeResponse, Prober, ProberOptions};
pub use error::{SchedulerError, ValidationError};
pub use executor::{JobReport, ValidationExecutor};
pub use memory::{MemoryStore, RecordedResult};
pub use retry::RetryTracker;
pub use scheduler::{EntrySnapshot, ReconcileReport, Scheduler, SchedulerOptions};
pub use sink::{Notifier, SiteStore};
pub use site::{Header, LastResult, PendingRetry, RetryPolicy, Site, SiteId, ValidationMode};
pub use types::{SiteStatus, ValidationOutcome};
pub use validators::{SandboxLimits, ScriptSandbox};

/// Default User-Agent sent when a site does not configure one
pub const DEFAULT_USER_AGENT: &str = concat!("knocker/", env!("CARGO_PKG_VERSION"));
