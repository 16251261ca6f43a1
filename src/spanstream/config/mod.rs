//! Pipeline configuration: YAML loading, startup validation, and
//! resolution into the typed settings the stages consume.
//!
//! Validation is deliberately front-loaded: every width must be positive,
//! `last_date` must parse, and the configured value field must name a member
//! of the closed [`ValueField`] set. A bad configuration fails the pipeline
//! before any data flows. The one lenient knob is `statistic`, which falls
//! back to `sum` for unrecognized names (see [`Statistic::from_name`]).

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

use crate::spanstream::model::ValueField;
use crate::spanstream::stats::Statistic;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("'{option}' must be greater than zero (got {value})")]
    InvalidWidth { option: &'static str, value: i64 },

    #[error("unparseable last_date '{value}': expected 'today', 'yesterday', or an RFC 3339 timestamp")]
    InvalidLastDate {
        value: String,
        #[source]
        source: chrono::ParseError,
    },

    #[error("unknown value_field '{name}': known fields are {known:?}")]
    UnknownValueField {
        name: String,
        known: [&'static str; 2],
    },

    #[error("failed to read config file '{path}'")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file '{path}'")]
    Yaml {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
}

/// Top-level configuration as it appears in the YAML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub window: WindowConfig,
    pub span: SpanConfig,
    pub bin: BinConfig,
    #[serde(default)]
    pub classifier: ClassifierConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowConfig {
    /// Tumbling window width in seconds. Must be positive.
    pub window_width: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpanConfig {
    /// When set, the span-assembly stage consumes its input and emits
    /// nothing; no spans means no bins.
    #[serde(default)]
    pub disabled: bool,

    /// Maximum gap in seconds between a span's last anomalous window and
    /// the check that would expire it. Must be positive.
    pub span_width: i64,

    /// Statistic summarizing a span's magnitudes: sum, mean, median,
    /// midhinge, or trimean. Unrecognized names fall back to sum.
    #[serde(default = "default_statistic")]
    pub statistic: String,

    /// Which ruling field supplies the per-window magnitude. Unknown
    /// names are rejected at startup.
    #[serde(default = "default_value_field")]
    pub value_field: String,

    /// The date and time of the final piece of data being processed:
    /// "today", "yesterday", or an RFC 3339 timestamp. Spans that cannot
    /// expire before this instant are force-closed.
    #[serde(default = "default_last_date")]
    pub last_date: String,

    /// Period in seconds of the externally driven expiry sweep. Must be
    /// positive.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BinConfig {
    /// Bin width in seconds; bins are aligned to this grid from the Unix
    /// epoch. Must be positive.
    pub bin_width: i64,
}

/// Settings for the bundled reference classifier. Deployments with their
/// own [`Classifier`](crate::spanstream::classify::Classifier) ignore this.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    #[serde(default = "default_threshold")]
    pub threshold: f64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        ClassifierConfig {
            threshold: default_threshold(),
        }
    }
}

fn default_statistic() -> String {
    "sum".to_string()
}

fn default_value_field() -> String {
    "normed".to_string()
}

fn default_last_date() -> String {
    "today".to_string()
}

fn default_sweep_interval() -> i64 {
    60
}

fn default_threshold() -> f64 {
    3.0
}

impl PipelineConfig {
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        serde_yaml::from_str(&raw).map_err(|source| ConfigError::Yaml {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn from_yaml_str(raw: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(raw).map_err(|source| ConfigError::Yaml {
            path: "<inline>".to_string(),
            source,
        })
    }

    /// Validate and resolve into the typed settings the stages consume.
    /// `today`/`yesterday` are resolved against the real clock here, once.
    pub fn resolve(&self) -> Result<ResolvedConfig, ConfigError> {
        check_width("window_width", self.window.window_width)?;
        check_width("span_width", self.span.span_width)?;
        check_width("bin_width", self.bin.bin_width)?;
        check_width("sweep_interval", self.span.sweep_interval)?;

        let value_field = ValueField::from_name(&self.span.value_field).ok_or_else(|| {
            ConfigError::UnknownValueField {
                name: self.span.value_field.clone(),
                known: ValueField::KNOWN,
            }
        })?;

        Ok(ResolvedConfig {
            window_width: Duration::seconds(self.window.window_width),
            bin_width: Duration::seconds(self.bin.bin_width),
            sweep_interval: std::time::Duration::from_secs(self.span.sweep_interval as u64),
            assembler: AssemblerSettings {
                disabled: self.span.disabled,
                span_width: Duration::seconds(self.span.span_width),
                statistic: Statistic::from_name(&self.span.statistic),
                value_field,
                last_date: resolve_last_date(&self.span.last_date)?,
            },
            threshold: self.classifier.threshold,
        })
    }
}

fn check_width(option: &'static str, value: i64) -> Result<(), ConfigError> {
    if value <= 0 {
        return Err(ConfigError::InvalidWidth { option, value });
    }
    Ok(())
}

fn resolve_last_date(value: &str) -> Result<DateTime<Utc>, ConfigError> {
    match value {
        "today" => Ok(Utc::now()),
        "yesterday" => Ok(Utc::now() - Duration::hours(24)),
        other => DateTime::parse_from_rfc3339(other)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|source| ConfigError::InvalidLastDate {
                value: other.to_string(),
                source,
            }),
    }
}

/// Fully validated configuration, ready for [`Pipeline`](crate::spanstream::pipeline::Pipeline).
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub window_width: Duration,
    pub bin_width: Duration,
    pub sweep_interval: std::time::Duration,
    pub assembler: AssemblerSettings,
    pub threshold: f64,
}

/// Resolved settings for the span-assembly stage.
#[derive(Debug, Clone)]
pub struct AssemblerSettings {
    pub disabled: bool,
    pub span_width: Duration,
    pub statistic: Statistic,
    pub value_field: ValueField,
    pub last_date: DateTime<Utc>,
}
