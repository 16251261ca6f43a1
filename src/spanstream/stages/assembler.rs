//! Span-assembly stage: the per-series state machine that merges runs of
//! anomalous windows into spans.
//!
//! Four things can happen to a ruling:
//! - active span, non-anomalous: expire the span or absorb the magnitude;
//! - active span, anomalous: extend the span (same sign) or flush it and
//!   open a new one (sign change);
//! - no active span, non-anomalous: nothing;
//! - no active span, anomalous: open a new span.
//!
//! The cache of in-progress spans is shared between the streaming consumer
//! and the externally driven entry points ([`SpanAssembler::flush_expired`],
//! [`SpanAssembler::flush_all`], [`SpanAssembler::dump`]). All of them take
//! the single coarse lock over the whole map; one cache serves every
//! series. The lock is held across the emit of the span being flushed,
//! never longer.

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};

use crate::spanstream::config::AssemblerSettings;
use crate::spanstream::model::{Ruling, Span, SpanDiagnostic};

#[derive(Default)]
struct SpanCache {
    /// At most one in-progress span per series.
    spans: HashMap<String, Span>,
    /// Latest window end observed per series, kept even when magnitude
    /// extraction fails so expiry checks see the time move.
    last_seen: HashMap<String, DateTime<Utc>>,
}

/// Assembles classified windows into spans. Cheap to clone; all clones
/// share the same cache and settings.
#[derive(Clone)]
pub struct SpanAssembler {
    settings: Arc<AssemblerSettings>,
    cache: Arc<Mutex<SpanCache>>,
}

impl SpanAssembler {
    pub fn new(settings: AssemblerSettings) -> Self {
        SpanAssembler {
            settings: Arc::new(settings),
            cache: Arc::new(Mutex::new(SpanCache::default())),
        }
    }

    /// Spawn the streaming consumer. Once the input is exhausted the task
    /// runs the end-of-data drain ([`Self::flush_all`]), drops its sender,
    /// and flips the returned watch to `true`.
    ///
    /// The caller owns the output channel; pass further clones of `out` to
    /// [`Self::flush_expired`] to route sweep-flushed spans into the same
    /// stream.
    pub fn connect(
        &self,
        rx: mpsc::Receiver<Ruling>,
        out: mpsc::Sender<Span>,
    ) -> watch::Receiver<bool> {
        let (done_tx, done_rx) = watch::channel(false);
        let assembler = self.clone();
        tokio::spawn(async move {
            assembler.run(rx, out, done_tx).await;
        });
        done_rx
    }

    async fn run(
        &self,
        mut rx: mpsc::Receiver<Ruling>,
        out: mpsc::Sender<Span>,
        done_tx: watch::Sender<bool>,
    ) {
        while let Some(ruling) = rx.recv().await {
            if self.settings.disabled {
                continue;
            }
            self.process(ruling, &out).await;
        }
        if !self.settings.disabled {
            self.flush_all(&out).await;
        }
        let _ = done_tx.send(true);
    }

    /// Apply one ruling to the per-series state machine.
    async fn process(&self, ruling: Ruling, out: &mpsc::Sender<Span>) {
        let series = ruling.window.series.clone();
        let mut cache = self.cache.lock().await;

        // The series' clock advances no matter what happens below.
        let now = ruling.window.end;
        cache.last_seen.insert(series.clone(), now);

        let value = self.settings.value_field.extract(&ruling);
        if !value.is_finite() {
            warn!(
                "dropping ruling for series '{}': non-finite {} value",
                series,
                self.settings.value_field.as_str()
            );
            return;
        }

        let active = cache
            .spans
            .get(&series)
            .map(|span| (sign_matches(span.values[0], value), self.is_expired(span, now)));

        match active {
            None => {
                if ruling.anomalous {
                    cache.spans.insert(series, Span::open(&ruling.window, value));
                }
            }
            Some((same_sign, _)) if ruling.anomalous => {
                if same_sign {
                    if let Some(span) = cache.spans.get_mut(&series) {
                        span.values.push(value);
                        span.end = now;
                    }
                } else {
                    // Sign change closes the span; this ruling opens the next.
                    self.flush_series(&mut cache, &series, out).await;
                    cache.spans.insert(series, Span::open(&ruling.window, value));
                }
            }
            Some((_, expired)) => {
                if expired {
                    self.flush_series(&mut cache, &series, out).await;
                } else {
                    // Absorbed while waiting to see whether the span
                    // resumes; the lifespan stays frozen.
                    if let Some(span) = cache.spans.get_mut(&series) {
                        span.values.push(value);
                    }
                }
            }
        }
    }

    /// Externally driven sweep: flush every span expired at `now`.
    ///
    /// Required because a series that stops producing data never triggers
    /// its own expiry check through the data path.
    pub async fn flush_expired(&self, now: DateTime<Utc>, out: &mpsc::Sender<Span>) {
        let mut cache = self.cache.lock().await;
        let expired: Vec<String> = cache
            .spans
            .iter()
            .filter(|(_, span)| self.is_expired(span, now))
            .map(|(series, _)| series.clone())
            .collect();
        for series in expired {
            self.flush_series(&mut cache, &series, out).await;
        }
    }

    /// End-of-data drain: flush every span whose nominal expiry lands
    /// strictly after the configured last date, i.e. the spans that were
    /// still open when processing intentionally stopped. Spans expiring at
    /// or before the last date are left for the ordinary expiry path.
    pub async fn flush_all(&self, out: &mpsc::Sender<Span>) {
        let mut cache = self.cache.lock().await;
        let stuck: Vec<String> = cache
            .spans
            .iter()
            .filter(|(_, span)| {
                span.will_expire_at(self.settings.span_width) > self.settings.last_date
            })
            .map(|(series, _)| series.clone())
            .collect();
        for series in stuck {
            self.flush_series(&mut cache, &series, out).await;
        }
    }

    /// Read-only snapshot of the in-progress spans, sorted by series.
    pub async fn dump(&self) -> Vec<SpanDiagnostic> {
        let cache = self.cache.lock().await;
        let mut diagnostics: Vec<SpanDiagnostic> = cache
            .spans
            .values()
            .map(|span| SpanDiagnostic {
                series: span.series.clone(),
                start: span.start,
                end: span.end,
                last_seen: cache.last_seen.get(&span.series).copied(),
                expires_at: span.will_expire_at(self.settings.span_width),
            })
            .collect();
        diagnostics.sort_by(|a, b| a.series.cmp(&b.series));
        diagnostics
    }

    /// Log the diagnostic snapshot, one line per in-progress span.
    pub async fn log_open_spans(&self) {
        let diagnostics = self.dump().await;
        info!("{} span(s) in progress", diagnostics.len());
        for d in &diagnostics {
            info!(
                "series '{}': start {} end {} last seen {} expires {}",
                d.series,
                d.start,
                d.end,
                d.last_seen
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| "never".to_string()),
                d.expires_at
            );
        }
    }

    fn is_expired(&self, span: &Span, now: DateTime<Utc>) -> bool {
        let will_expire_at = span.will_expire_at(self.settings.span_width);
        // Either the span is too old, or the stream ends before it could
        // ever expire naturally and it must not be left stuck.
        now > will_expire_at || will_expire_at >= self.settings.last_date
    }

    /// Remove the series' cache entry, stamp the span, and emit it.
    /// On statistic failure the span is logged and discarded; the entry is
    /// removed either way.
    async fn flush_series(&self, cache: &mut SpanCache, series: &str, out: &mpsc::Sender<Span>) {
        let Some(mut span) = cache.spans.remove(series) else {
            return;
        };
        cache.last_seen.remove(series);

        span.duration_secs = (span.end - span.start).num_seconds();
        match self.settings.statistic.apply(&span.values) {
            Ok(score) => {
                span.score = score;
                if out.send(span).await.is_err() {
                    debug!("span output closed, dropping flushed span");
                }
            }
            Err(err) => {
                warn!("discarding span for series '{}': {}", series, err);
            }
        }
    }
}

fn sign_matches(first: f64, value: f64) -> bool {
    (first >= 0.0) == (value >= 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spanstream::model::{ValueField, Window};
    use crate::spanstream::stats::Statistic;
    use chrono::Duration;

    fn ts(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    fn settings() -> AssemblerSettings {
        AssemblerSettings {
            disabled: false,
            span_width: Duration::seconds(300),
            statistic: Statistic::Sum,
            value_field: ValueField::Normed,
            last_date: ts(1_000_000),
        }
    }

    fn ruling(series: &str, start: i64, end: i64, anomalous: bool, normed: f64) -> Ruling {
        Ruling {
            window: Window {
                series: series.to_string(),
                start: ts(start),
                end: ts(end),
                value: normed,
                passthrough: serde_json::Value::Null,
            },
            anomalous,
            score: normed * 10.0,
            normed,
        }
    }

    /// Feed rulings through a connected assembler and wait for the drain.
    async fn drive(
        settings: AssemblerSettings,
        rulings: Vec<Ruling>,
    ) -> (SpanAssembler, mpsc::Sender<Span>, mpsc::Receiver<Span>) {
        let assembler = SpanAssembler::new(settings);
        let (ruling_tx, ruling_rx) = mpsc::channel(8);
        let (span_tx, span_rx) = mpsc::channel(16);
        let mut done = assembler.connect(ruling_rx, span_tx.clone());
        for r in rulings {
            ruling_tx.send(r).await.unwrap();
        }
        drop(ruling_tx);
        done.changed().await.unwrap();
        (assembler, span_tx, span_rx)
    }

    fn collect(mut rx: mpsc::Receiver<Span>) -> Vec<Span> {
        let mut spans = Vec::new();
        while let Ok(span) = rx.try_recv() {
            spans.push(span);
        }
        spans
    }

    #[tokio::test]
    async fn test_consistent_sign_run_merges_into_one_span() {
        let (assembler, span_tx, span_rx) = drive(
            settings(),
            vec![
                ruling("a", 0, 30, true, 1.0),
                ruling("a", 30, 60, true, 2.0),
                ruling("a", 60, 90, true, 3.0),
            ],
        )
        .await;

        assembler.flush_expired(ts(500), &span_tx).await;
        drop(span_tx);

        let spans = collect(span_rx);
        assert_eq!(spans.len(), 1);
        let span = &spans[0];
        assert_eq!(span.values, vec![1.0, 2.0, 3.0]);
        assert_eq!(span.start, ts(0));
        assert_eq!(span.end, ts(90));
        assert_eq!(span.duration_secs, 90);
        assert_eq!(span.score, 6.0);
    }

    #[tokio::test]
    async fn test_sign_change_produces_two_disjoint_spans() {
        let (assembler, span_tx, span_rx) = drive(
            settings(),
            vec![
                ruling("a", 0, 30, true, 2.0),
                ruling("a", 30, 60, true, -3.0),
            ],
        )
        .await;

        assembler.flush_expired(ts(500), &span_tx).await;
        drop(span_tx);

        let spans = collect(span_rx);
        assert_eq!(spans.len(), 2);
        assert_eq!(spans[0].values, vec![2.0]);
        assert_eq!(spans[1].values, vec![-3.0]);
        assert_eq!(spans[1].start, ts(30));
    }

    #[tokio::test]
    async fn test_non_anomalous_absorbed_without_extending_end() {
        let (assembler, span_tx, span_rx) = drive(
            settings(),
            vec![
                ruling("a", 0, 30, true, 2.0),
                ruling("a", 30, 60, false, 5.0),
            ],
        )
        .await;

        let diagnostics = assembler.dump().await;
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].end, ts(30));
        assert_eq!(diagnostics[0].last_seen, Some(ts(60)));

        assembler.flush_expired(ts(500), &span_tx).await;
        drop(span_tx);

        let spans = collect(span_rx);
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].values, vec![2.0, 5.0]);
        assert_eq!(spans[0].end, ts(30));
        assert_eq!(spans[0].score, 7.0);
    }

    #[tokio::test]
    async fn test_expired_span_flushed_by_data_path_without_absorbing() {
        // The non-anomalous ruling arrives 400s after the span's end,
        // past span_width: the span flushes and the magnitude is lost.
        let (_, span_tx, span_rx) = drive(
            settings(),
            vec![
                ruling("a", 0, 30, true, 2.0),
                ruling("a", 400, 430, false, 9.0),
            ],
        )
        .await;
        drop(span_tx);

        let spans = collect(span_rx);
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].values, vec![2.0]);
    }

    #[tokio::test]
    async fn test_flush_expired_spares_fresh_spans() {
        let (assembler, span_tx, span_rx) = drive(
            settings(),
            vec![
                ruling("old", 0, 30, true, 1.0),
                ruling("fresh", 600, 630, true, 1.0),
            ],
        )
        .await;

        // now = 500: old expired at 330, fresh expires at 930.
        assembler.flush_expired(ts(500), &span_tx).await;
        drop(span_tx);

        let spans = collect(span_rx);
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].series, "old");
        assert_eq!(assembler.dump().await.len(), 1);
    }

    #[tokio::test]
    async fn test_flush_all_is_strict_about_last_date() {
        let mut s = settings();
        s.last_date = ts(1000);
        // "boundary" expires exactly at last_date (700 + 300); "stuck"
        // expires strictly after. Only the latter is drained.
        let (assembler, span_tx, span_rx) = drive(
            s,
            vec![
                ruling("boundary", 600, 700, true, 1.0),
                ruling("stuck", 600, 800, true, 1.0),
            ],
        )
        .await;
        drop(span_tx);

        let spans = collect(span_rx);
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].series, "stuck");

        let remaining = assembler.dump().await;
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].series, "boundary");
    }

    #[tokio::test]
    async fn test_disabled_stage_consumes_and_emits_nothing() {
        let mut s = settings();
        s.disabled = true;
        let (assembler, span_tx, span_rx) = drive(
            s,
            vec![ruling("a", 0, 30, true, 2.0), ruling("a", 30, 60, true, 2.0)],
        )
        .await;
        drop(span_tx);

        assert!(collect(span_rx).is_empty());
        assert!(assembler.dump().await.is_empty());
    }

    #[tokio::test]
    async fn test_non_finite_magnitude_dropped_without_state_change() {
        let (assembler, span_tx, span_rx) = drive(
            settings(),
            vec![
                ruling("a", 0, 30, true, f64::NAN),
                ruling("a", 30, 60, true, 2.0),
            ],
        )
        .await;

        assembler.flush_expired(ts(500), &span_tx).await;
        drop(span_tx);

        let spans = collect(span_rx);
        assert_eq!(spans.len(), 1);
        // Only the finite ruling opened a span.
        assert_eq!(spans[0].values, vec![2.0]);
        assert_eq!(spans[0].start, ts(30));
    }

    #[tokio::test]
    async fn test_is_expired_is_monotonic_in_now() {
        let assembler = SpanAssembler::new(settings());
        let span = Span::open(
            &Window {
                series: "a".to_string(),
                start: ts(0),
                end: ts(30),
                value: 1.0,
                passthrough: serde_json::Value::Null,
            },
            1.0,
        );
        let mut seen_expired = false;
        for now in (0..1200).step_by(60) {
            let expired = assembler.is_expired(&span, ts(now));
            if seen_expired {
                assert!(expired, "expired span un-expired at t={now}");
            }
            seen_expired = expired;
        }
        assert!(seen_expired);
    }

    #[tokio::test]
    async fn test_configured_statistic_applied_at_flush() {
        let mut s = settings();
        s.statistic = Statistic::Mean;
        let (assembler, span_tx, span_rx) = drive(
            s,
            vec![
                ruling("a", 0, 30, true, 1.0),
                ruling("a", 30, 60, true, 2.0),
                ruling("a", 60, 90, true, 3.0),
            ],
        )
        .await;

        assembler.flush_expired(ts(500), &span_tx).await;
        drop(span_tx);

        let spans = collect(span_rx);
        assert_eq!(spans[0].score, 2.0);
    }

    #[tokio::test]
    async fn test_score_field_feeds_statistics_when_configured() {
        let mut s = settings();
        s.value_field = ValueField::Score;
        let (assembler, span_tx, span_rx) =
            drive(s, vec![ruling("a", 0, 30, true, 2.0)]).await;

        assembler.flush_expired(ts(500), &span_tx).await;
        drop(span_tx);

        let spans = collect(span_rx);
        // score = normed * 10 in the fixture.
        assert_eq!(spans[0].values, vec![20.0]);
    }
}
