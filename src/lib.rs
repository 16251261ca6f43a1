//! # spanstream
//!
//! Streaming detection and characterization of anomalous episodes in
//! per-series numeric time data.
//!
//! Raw metrics are summed into fixed-width tumbling windows; an external
//! classifier rules each window anomalous or not; temporally-adjacent
//! anomalous windows of one sign are assembled into spans, each summarized
//! by a single statistic; finished spans are counted into fixed,
//! epoch-aligned time bins. Stages run as independent tasks connected by
//! unbuffered channels, so backpressure propagates end to end and closing
//! the metric source drains the whole pipeline cleanly.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use spanstream::{Metric, Pipeline, PipelineConfig, ThresholdClassifier};
//! use tokio::sync::mpsc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = PipelineConfig::from_yaml_file("spanstream.yaml")?;
//! let classifier = Arc::new(ThresholdClassifier::new(config.classifier.threshold));
//!
//! let (tx, rx) = mpsc::channel::<Metric>(1);
//! let mut handle = Pipeline::new(&config, classifier)?.run(rx);
//!
//! // Feed metrics through `tx`, then drop it; drain `handle.spans` and
//! // `handle.bins` concurrently until both close.
//! # Ok(())
//! # }
//! ```

pub mod spanstream;

// Re-export the main API at the crate root.
pub use crate::spanstream::classify::{Classifier, ThresholdClassifier};
pub use crate::spanstream::config::{
    AssemblerSettings, ConfigError, PipelineConfig, ResolvedConfig,
};
pub use crate::spanstream::model::{
    Bin, Metric, Ruling, Span, SpanDiagnostic, ValueField, Window,
};
pub use crate::spanstream::pipeline::{Pipeline, PipelineHandle};
pub use crate::spanstream::sink::JsonlWriter;
pub use crate::spanstream::stages::{BinAggregator, SpanAssembler, WindowAggregator};
pub use crate::spanstream::stats::{Statistic, StatsError};
