//! Tumbling-window aggregation stage.
//!
//! Consumes a stream of [`Metric`] and emits a [`Window`] per series each
//! time the tumbling window rolls over. A rollover is only ever triggered
//! by a later arrival on the same series: a series that goes silent leaves
//! its accumulator open, and the stage drops open accumulators when the
//! input stream ends. A gap of several window widths still produces a
//! single rollover; skipped intervals are not backfilled.

use chrono::{DateTime, Duration, Utc};
use log::debug;
use std::collections::HashMap;
use tokio::sync::mpsc;

use crate::spanstream::model::{Metric, Window};

struct Accumulator {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    value: f64,
    passthrough: serde_json::Value,
}

/// Per-series tumbling-window sum over a fixed width.
pub struct WindowAggregator {
    width: Duration,
}

impl WindowAggregator {
    pub fn new(width: Duration) -> Self {
        WindowAggregator { width }
    }

    /// Spawn the stage task. The returned channel closes once the input is
    /// exhausted and every pending window has been handed downstream.
    pub fn connect(self, rx: mpsc::Receiver<Metric>) -> mpsc::Receiver<Window> {
        let (tx, out) = mpsc::channel(1);
        tokio::spawn(self.run(rx, tx));
        out
    }

    async fn run(self, mut rx: mpsc::Receiver<Metric>, tx: mpsc::Sender<Window>) {
        let mut accumulators: HashMap<String, Accumulator> = HashMap::new();

        while let Some(metric) = rx.recv().await {
            let acc = accumulators
                .entry(metric.series.clone())
                .or_insert_with(|| Accumulator {
                    start: metric.timestamp,
                    end: metric.timestamp,
                    value: 0.0,
                    passthrough: metric.passthrough.clone(),
                });

            let elapsed = metric.timestamp - acc.start;
            if elapsed.num_seconds() >= self.width.num_seconds() {
                // The end is exclusive, so the closed window extends one
                // width past the last absorbed metric.
                let window = Window {
                    series: metric.series.clone(),
                    start: acc.start,
                    end: acc.end + self.width,
                    value: acc.value,
                    passthrough: acc.passthrough.clone(),
                };
                acc.start = metric.timestamp;
                acc.value = 0.0;
                if tx.send(window).await.is_err() {
                    debug!("window output closed, stopping aggregator");
                    return;
                }
            }

            acc.value += metric.value;
            acc.end = metric.timestamp;
        }

        if !accumulators.is_empty() {
            debug!(
                "input exhausted with {} open window accumulator(s), dropped",
                accumulators.len()
            );
        }
    }
}
