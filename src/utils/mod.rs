//! Shared helpers: tracing bootstrap, retry policies, metrics.

pub mod bootstrap;
pub mod metrics;
pub mod retry;
