//! Stage wiring for the full pipeline.
//!
//! ```text
//! Metric -> WindowAggregator -> Classifier -> SpanAssembler -> tee -> spans
//!                                                                 \-> BinAggregator -> bins
//! ```
//!
//! Every hop is a capacity-1 bounded channel: a producer's send suspends
//! until its consumer is ready, so backpressure propagates from the bin
//! consumer all the way back to the metric source. Shutdown is a clean
//! cascade: close the metric sender and each stage closes its own output
//! once its input is exhausted. Because the tee feeds both outputs from
//! the same unbuffered stream, callers must drain `spans` and `bins`
//! concurrently.
//!
//! The expiry sweep runs beside the streaming consumer on a fixed period,
//! closing spans for series that went silent; it is the only place the
//! pipeline reads the real clock after startup.

use chrono::Utc;
use log::debug;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant};

use crate::spanstream::classify::Classifier;
use crate::spanstream::config::{ConfigError, PipelineConfig, ResolvedConfig};
use crate::spanstream::model::{Bin, Metric, Ruling, Span, Window};
use crate::spanstream::stages::{BinAggregator, SpanAssembler, WindowAggregator};

pub struct Pipeline {
    config: ResolvedConfig,
    classifier: Arc<dyn Classifier>,
}

/// Live endpoints of a running pipeline. Both receivers must be drained;
/// the assembler handle serves the diagnostic surface.
pub struct PipelineHandle {
    pub spans: mpsc::Receiver<Span>,
    pub bins: mpsc::Receiver<Bin>,
    pub assembler: SpanAssembler,
}

impl Pipeline {
    /// Validate the configuration and build a pipeline. Configuration
    /// errors are fatal here, before any data flows.
    pub fn new(
        config: &PipelineConfig,
        classifier: Arc<dyn Classifier>,
    ) -> Result<Self, ConfigError> {
        Ok(Pipeline {
            config: config.resolve()?,
            classifier,
        })
    }

    /// Spawn every stage and return the output endpoints.
    pub fn run(self, metrics: mpsc::Receiver<Metric>) -> PipelineHandle {
        let windows = WindowAggregator::new(self.config.window_width).connect(metrics);
        let rulings = connect_classifier(self.classifier, windows);

        let assembler = SpanAssembler::new(self.config.assembler.clone());
        let (span_tx, span_rx) = mpsc::channel(1);
        let done = assembler.connect(rulings, span_tx.clone());

        if self.config.assembler.disabled {
            drop(span_tx);
        } else {
            let sweep_assembler = assembler.clone();
            let period = self.config.sweep_interval;
            tokio::spawn(async move {
                let mut ticker = interval_at(Instant::now() + period, period);
                let mut done = done;
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            sweep_assembler.flush_expired(Utc::now(), &span_tx).await;
                        }
                        _ = done.changed() => break,
                    }
                }
                debug!("expiry sweep stopped");
            });
        }

        let (spans, bin_feed) = tee_spans(span_rx);
        let bins = BinAggregator::new(self.config.bin_width).connect(bin_feed);

        PipelineHandle {
            spans,
            bins,
            assembler,
        }
    }
}

fn connect_classifier(
    classifier: Arc<dyn Classifier>,
    mut windows: mpsc::Receiver<Window>,
) -> mpsc::Receiver<Ruling> {
    let (tx, rx) = mpsc::channel(1);
    tokio::spawn(async move {
        while let Some(window) = windows.recv().await {
            let ruling = classifier.classify(window).await;
            if tx.send(ruling).await.is_err() {
                break;
            }
        }
    });
    rx
}

/// Duplicate the span stream: one copy for the caller, one for binning.
/// A dropped consumer on either side stops that side only.
fn tee_spans(mut rx: mpsc::Receiver<Span>) -> (mpsc::Receiver<Span>, mpsc::Receiver<Span>) {
    let (out_tx, out_rx) = mpsc::channel(1);
    let (bin_tx, bin_rx) = mpsc::channel(1);
    tokio::spawn(async move {
        let mut out_open = true;
        let mut bin_open = true;
        while let Some(span) = rx.recv().await {
            if out_open && out_tx.send(span.clone()).await.is_err() {
                debug!("span consumer gone, continuing to feed bins");
                out_open = false;
            }
            if bin_open && bin_tx.send(span).await.is_err() {
                debug!("bin feed gone, continuing to feed span consumer");
                bin_open = false;
            }
            if !out_open && !bin_open {
                break;
            }
        }
    });
    (out_rx, bin_rx)
}
