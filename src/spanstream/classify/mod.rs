//! The classification seam between window aggregation and span assembly.
//!
//! Classification itself is an external collaborator: the pipeline only
//! requires something that turns each [`Window`] into a [`Ruling`]. The
//! bundled [`ThresholdClassifier`] is a deliberately simple reference
//! implementation so the binary runs end to end; real deployments plug in
//! their own.

use async_trait::async_trait;

use crate::spanstream::model::{Ruling, Window};

#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, window: Window) -> Ruling;
}

/// Flags a window as anomalous when the absolute aggregated value exceeds
/// a fixed threshold. `score` is the value as a multiple of the threshold;
/// `normed` is the raw window value.
pub struct ThresholdClassifier {
    threshold: f64,
}

impl ThresholdClassifier {
    pub fn new(threshold: f64) -> Self {
        ThresholdClassifier { threshold }
    }
}

#[async_trait]
impl Classifier for ThresholdClassifier {
    async fn classify(&self, window: Window) -> Ruling {
        let anomalous = window.value.abs() > self.threshold;
        let score = if self.threshold > 0.0 {
            window.value / self.threshold
        } else {
            window.value
        };
        Ruling {
            anomalous,
            score,
            normed: window.value,
            window,
        }
    }
}
