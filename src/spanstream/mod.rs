//! Streaming detection of anomalous episodes in per-series time data.

pub mod classify;
pub mod config;
pub mod model;
pub mod pipeline;
pub mod server;
pub mod sink;
pub mod stages;
pub mod stats;
