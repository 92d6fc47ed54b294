//! Validation strategies, one per [`ValidationMode`](crate::site::ValidationMode).
//!
//! Dispatch between them happens in exactly one place,
//! [`ValidationExecutor::attempt`](crate::executor::ValidationExecutor::attempt).

pub mod javascript;
pub mod status_code;
pub mod term_search;

pub use javascript::{SandboxLimits, ScriptSandbox};
