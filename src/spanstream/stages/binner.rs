//! Bin aggregation stage.
//!
//! Maps finished spans onto a fixed time-bin grid aligned to the Unix
//! epoch. Every bin a span touches is incremented and its current snapshot
//! re-emitted immediately, so the same bin identity appears repeatedly
//! with a growing count as further spans land in it. Bins are never
//! finalized.

use chrono::{DateTime, Duration, Utc};
use log::debug;
use std::collections::HashMap;
use tokio::sync::mpsc;

use crate::spanstream::model::{Bin, Span};

/// Counts span intersections per grid-aligned time bucket.
pub struct BinAggregator {
    width: Duration,
}

impl BinAggregator {
    pub fn new(width: Duration) -> Self {
        BinAggregator { width }
    }

    /// Spawn the stage task; one [`Bin`] snapshot per touched bin.
    pub fn connect(self, rx: mpsc::Receiver<Span>) -> mpsc::Receiver<Bin> {
        let (tx, out) = mpsc::channel(1);
        tokio::spawn(self.run(rx, tx));
        out
    }

    async fn run(self, mut rx: mpsc::Receiver<Span>, tx: mpsc::Sender<Bin>) {
        let mut bins: HashMap<DateTime<Utc>, Bin> = HashMap::new();

        while let Some(span) = rx.recv().await {
            for bin_start in self.bin_starts(&span) {
                let snapshot = {
                    let bin = bins
                        .entry(bin_start)
                        .or_insert_with(|| Bin::new(bin_start, self.width));
                    bin.count += 1;
                    bin.entries.push(span.series.clone());
                    bin.clone()
                };
                if tx.send(snapshot).await.is_err() {
                    debug!("bin output closed, stopping aggregator");
                    return;
                }
            }
        }
    }

    /// Starts of every bin covering `[span.start, span.end]`, inclusive on
    /// both ends.
    fn bin_starts(&self, span: &Span) -> Vec<DateTime<Utc>> {
        let mut starts = Vec::new();
        let mut current = truncate(span.start, self.width);
        while current <= span.end {
            starts.push(current);
            current = current + self.width;
        }
        starts
    }
}

/// Floor a timestamp onto the bin grid anchored at the Unix epoch.
fn truncate(ts: DateTime<Utc>, width: Duration) -> DateTime<Utc> {
    let width_secs = width.num_seconds();
    let floored = ts.timestamp().div_euclid(width_secs) * width_secs;
    DateTime::from_timestamp(floored, 0).expect("bin start within representable time range")
}
