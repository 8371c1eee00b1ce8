//! Process bootstrap and request metrics.

pub mod bootstrap;
pub mod metrics;
