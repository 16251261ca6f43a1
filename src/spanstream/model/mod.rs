//! Core data model for the span-detection pipeline.
//!
//! Records flow through the stages in one direction:
//!
//! ```text
//! Metric -> Window -> Ruling -> Span -> Bin
//! ```
//!
//! `Metric` and `Window` are frozen once emitted. A `Span` is mutable only
//! while it sits in the assembler's cache; it is stamped with its duration
//! and score exactly once, at flush time. A `Bin` is a live accumulator
//! whose current snapshot is re-emitted on every touch.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// A single raw data point for one series.
///
/// The `passthrough` payload is opaque to the pipeline: it is carried from
/// the metrics into the window they compose, and from there into the span,
/// untouched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metric {
    /// Stable identifier grouping metrics into one logical time series.
    pub series: String,
    pub timestamp: DateTime<Utc>,
    pub value: f64,
    #[serde(default)]
    pub passthrough: serde_json::Value,
}

/// A closed, fixed-duration aggregation slice of metrics for one series.
///
/// `start` is inclusive, `end` exclusive. The value is the sum of every
/// metric absorbed before the rollover that closed the window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Window {
    pub series: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub value: f64,
    #[serde(default)]
    pub passthrough: serde_json::Value,
}

/// A window plus its external anomaly classification.
///
/// Produced entirely by a [`Classifier`](crate::spanstream::classify::Classifier);
/// the pipeline only requires the anomaly flag and the two magnitude fields.
/// Which field feeds span statistics is chosen by [`ValueField`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ruling {
    pub window: Window,
    pub anomalous: bool,
    /// The classifier's anomaly rating for the window.
    pub score: f64,
    /// The window's normalized magnitude.
    pub normed: f64,
}

/// Selects which numeric field of a [`Ruling`] supplies the per-window
/// magnitude for span statistics.
///
/// The set is closed on purpose: the configured field name is resolved
/// against it once at startup, so a typo fails the stage before any data
/// flows instead of at first use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueField {
    Score,
    Normed,
}

impl ValueField {
    /// Field names accepted in configuration.
    pub const KNOWN: [&'static str; 2] = ["score", "normed"];

    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "score" => Some(ValueField::Score),
            "normed" => Some(ValueField::Normed),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ValueField::Score => "score",
            ValueField::Normed => "normed",
        }
    }

    /// Read the selected magnitude off a ruling. Total: every ruling
    /// carries both fields.
    pub fn extract(&self, ruling: &Ruling) -> f64 {
        match self {
            ValueField::Score => ruling.score,
            ValueField::Normed => ruling.normed,
        }
    }
}

/// A maximal run of temporally contiguous anomalous windows of one sign,
/// summarized by a single statistic.
///
/// `values` records every absorbed magnitude in arrival order. `duration_secs`
/// and `score` are zero until the span is flushed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Span {
    pub series: String,
    pub values: Vec<f64>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub duration_secs: i64,
    pub score: f64,
    #[serde(default)]
    pub passthrough: serde_json::Value,
}

impl Span {
    /// Open a new in-progress span from the first anomalous window of a run.
    pub fn open(window: &Window, value: f64) -> Self {
        Span {
            series: window.series.clone(),
            values: vec![value],
            start: window.start,
            end: window.end,
            duration_secs: 0,
            score: 0.0,
            passthrough: window.passthrough.clone(),
        }
    }

    /// The instant past which this span can no longer be extended.
    pub fn will_expire_at(&self, span_width: Duration) -> DateTime<Utc> {
        self.end + span_width
    }
}

/// A fixed-width, grid-aligned time bucket counting the spans that
/// intersect it.
///
/// `entries` lists the contributing series in insertion order; a series
/// appears once per contributing span, so duplicates are expected.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bin {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub count: u64,
    pub entries: Vec<String>,
}

impl Bin {
    pub fn new(start: DateTime<Utc>, width: Duration) -> Self {
        Bin {
            start,
            end: start + width,
            count: 0,
            entries: Vec::new(),
        }
    }
}

/// Read-only view of one in-progress span, for the diagnostic surface.
#[derive(Debug, Clone, Serialize)]
pub struct SpanDiagnostic {
    pub series: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// Latest window end observed for the series.
    pub last_seen: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
}
