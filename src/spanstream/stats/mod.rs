//! Aggregate statistics used to summarize a span's magnitude sequence.
//!
//! Five statistics are supported: sum, mean, median, midhinge, and trimean.
//! Quartiles follow the Moore/McCabe convention (the sample is split into
//! halves, excluding the middle element for odd lengths); a single-element
//! sample is its own quartile. Every statistic refuses an empty sequence.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum StatsError {
    #[error("cannot compute {statistic} of an empty sequence")]
    EmptyInput { statistic: &'static str },
}

/// The statistic applied to a span's magnitudes at flush time.
///
/// Resolved from configuration by [`Statistic::from_name`]; an empty or
/// unrecognized name silently falls back to [`Statistic::Sum`]. That
/// fallback is intentional and documented behavior, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Statistic {
    #[default]
    Sum,
    Mean,
    Median,
    Midhinge,
    Trimean,
}

impl Statistic {
    /// Resolve a configured statistic name, case-insensitively.
    /// Unknown or empty names fall back to `Sum`.
    pub fn from_name(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "mean" => Statistic::Mean,
            "median" => Statistic::Median,
            "midhinge" => Statistic::Midhinge,
            "trimean" => Statistic::Trimean,
            _ => Statistic::Sum,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Statistic::Sum => "sum",
            Statistic::Mean => "mean",
            Statistic::Median => "median",
            Statistic::Midhinge => "midhinge",
            Statistic::Trimean => "trimean",
        }
    }

    /// Apply the statistic to a magnitude sequence.
    pub fn apply(&self, values: &[f64]) -> Result<f64, StatsError> {
        if values.is_empty() {
            return Err(StatsError::EmptyInput {
                statistic: self.as_str(),
            });
        }
        Ok(match self {
            Statistic::Sum => values.iter().sum(),
            Statistic::Mean => values.iter().sum::<f64>() / values.len() as f64,
            Statistic::Median => median(&sorted(values)),
            Statistic::Midhinge => {
                let (q1, _, q3) = quartiles(&sorted(values));
                (q1 + q3) / 2.0
            }
            Statistic::Trimean => {
                let (q1, q2, q3) = quartiles(&sorted(values));
                (q1 + 2.0 * q2 + q3) / 4.0
            }
        })
    }
}

fn sorted(values: &[f64]) -> Vec<f64> {
    let mut v = values.to_vec();
    v.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    v
}

/// Median of an already-sorted, non-empty slice.
fn median(sorted: &[f64]) -> f64 {
    let n = sorted.len();
    if n % 2 == 0 {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    } else {
        sorted[n / 2]
    }
}

/// Quartiles (Q1, Q2, Q3) of an already-sorted, non-empty slice.
fn quartiles(sorted: &[f64]) -> (f64, f64, f64) {
    let n = sorted.len();
    if n == 1 {
        return (sorted[0], sorted[0], sorted[0]);
    }
    // Moore/McCabe: halves exclude the middle element when n is odd.
    let lower = &sorted[..n / 2];
    let upper = if n % 2 == 0 {
        &sorted[n / 2..]
    } else {
        &sorted[n / 2 + 1..]
    };
    (median(lower), median(sorted), median(upper))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sum() {
        assert_eq!(Statistic::Sum.apply(&[1.0, 2.0, 3.0]).unwrap(), 6.0);
        assert_eq!(Statistic::Sum.apply(&[-2.0, -3.0]).unwrap(), -5.0);
    }

    #[test]
    fn test_mean() {
        assert_eq!(Statistic::Mean.apply(&[1.0, 2.0, 3.0]).unwrap(), 2.0);
        assert_eq!(Statistic::Mean.apply(&[1.0, 2.0]).unwrap(), 1.5);
    }

    #[test]
    fn test_median_odd_and_even() {
        assert_eq!(Statistic::Median.apply(&[3.0, 1.0, 2.0]).unwrap(), 2.0);
        assert_eq!(
            Statistic::Median.apply(&[1.0, 2.0, 3.0, 4.0]).unwrap(),
            2.5
        );
    }

    #[test]
    fn test_midhinge() {
        // [1,2,3]: Q1=1, Q3=3
        assert_eq!(Statistic::Midhinge.apply(&[1.0, 2.0, 3.0]).unwrap(), 2.0);
        // [0,1,2,10]: Q1=0.5, Q3=6
        assert_eq!(
            Statistic::Midhinge.apply(&[0.0, 1.0, 2.0, 10.0]).unwrap(),
            3.25
        );
    }

    #[test]
    fn test_trimean() {
        // [1,2,3]: (1 + 2*2 + 3) / 4
        assert_eq!(Statistic::Trimean.apply(&[1.0, 2.0, 3.0]).unwrap(), 2.0);
        // [0,1,2,10]: (0.5 + 2*1.5 + 6) / 4
        assert_eq!(
            Statistic::Trimean.apply(&[0.0, 1.0, 2.0, 10.0]).unwrap(),
            2.375
        );
    }

    #[test]
    fn test_quartiles_even_halves() {
        let (q1, q2, q3) = quartiles(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        assert_eq!((q1, q2, q3), (2.0, 3.5, 5.0));
    }

    #[test]
    fn test_single_element_is_its_own_quartile() {
        assert_eq!(Statistic::Midhinge.apply(&[4.0]).unwrap(), 4.0);
        assert_eq!(Statistic::Trimean.apply(&[4.0]).unwrap(), 4.0);
    }

    #[test]
    fn test_empty_input_is_an_error() {
        for stat in [
            Statistic::Sum,
            Statistic::Mean,
            Statistic::Median,
            Statistic::Midhinge,
            Statistic::Trimean,
        ] {
            assert!(stat.apply(&[]).is_err());
        }
    }

    #[test]
    fn test_name_resolution_falls_back_to_sum() {
        assert_eq!(Statistic::from_name("median"), Statistic::Median);
        assert_eq!(Statistic::from_name("Trimean"), Statistic::Trimean);
        assert_eq!(Statistic::from_name(""), Statistic::Sum);
        assert_eq!(Statistic::from_name("p99"), Statistic::Sum);
    }
}
