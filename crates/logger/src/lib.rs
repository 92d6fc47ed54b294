//! Tracing subscriber setup shared by the knocker binaries.

mod subscriber;

pub use subscriber::init_tracing_with_level;
