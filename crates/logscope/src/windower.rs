//! Fixed-window metric aggregation.
//!
//! The [`Windower`] folds a time-ordered record stream into epoch-aligned
//! windows shared by every [`MetricKey`]. Each window keeps running Welford
//! statistics, the maximum and a P² p95 estimate, so nothing is buffered per
//! record. Sealed windows tile time: skipped buckets are sealed as empty
//! heartbeat windows.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Duration, TimeZone, Utc};
use tracing::{debug, warn};

use crate::config::WindowerConfig;
use crate::error::{ConfigError, IngestionError, RejectReason};
use crate::quantile::P2Quantile;
use crate::types::{LogRecord, MetricKey, MetricWindow, TimeRange};

/// Running statistics for one metric in the open window.
#[derive(Debug, Clone, Default)]
struct Accumulator {
    count: u64,
    sum: f64,
    mean: f64,
    m2: f64,
    max: f64,
    p95: P2Quantile,
    services: BTreeSet<String>,
}

impl Accumulator {
    fn push(&mut self, value: f64, service: Option<&str>, contributes: bool) {
        self.count += 1;
        self.sum += value;
        #[allow(clippy::cast_precision_loss)]
        let n = self.count as f64;
        let delta = value - self.mean;
        self.mean += delta / n;
        self.m2 += delta * (value - self.mean);
        if self.count == 1 || value > self.max {
            self.max = value;
        }
        self.p95.observe(value);
        if contributes {
            if let Some(service) = service {
                self.services.insert(service.to_string());
            }
        }
    }

    fn seal(self, key: MetricKey, span: TimeRange, carried_mean: f64) -> MetricWindow {
        let window = MetricWindow::empty(key, span.start, span.end);
        if self.count == 0 {
            return window.with_stats(0, carried_mean, 0.0);
        }

        let mut window = if key.is_counter() {
            window.with_stats(self.count, self.sum, 0.0)
        } else {
            #[allow(clippy::cast_precision_loss)]
            let variance = self.m2 / self.count as f64;
            let p95 = self.p95.estimate().unwrap_or(self.mean);
            window
                .with_stats(self.count, self.mean, variance.max(0.0).sqrt())
                .with_extremes(self.max, p95)
        };
        window.services = self.services;
        window
    }
}

/// Splits a record stream into sealed [`MetricWindow`]s.
#[derive(Debug)]
pub struct Windower {
    config: WindowerConfig,
    window_size: Duration,
    open: Option<TimeRange>,
    /// End of the last sealed window; records before it are late.
    watermark: Option<DateTime<Utc>>,
    accumulators: HashMap<MetricKey, Accumulator>,
    last_means: HashMap<MetricKey, f64>,
    dropped_values: u64,
}

impl Windower {
    /// Creates a windower.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] for a zero window size or heartbeat cap.
    pub fn new(config: WindowerConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let window_size = config.window_size();
        Ok(Self {
            config,
            window_size,
            open: None,
            watermark: None,
            accumulators: HashMap::new(),
            last_means: HashMap::new(),
            dropped_values: 0,
        })
    }

    /// The window currently accepting records, if any.
    #[must_use]
    pub const fn open_window(&self) -> Option<TimeRange> {
        self.open
    }

    /// The configured window size.
    #[must_use]
    pub const fn window_size(&self) -> Duration {
        self.window_size
    }

    /// Negative or non-finite metric values skipped so far.
    #[must_use]
    pub const fn dropped_values(&self) -> u64 {
        self.dropped_values
    }

    /// Start of the epoch-aligned window containing `ts`.
    #[must_use]
    pub fn align(&self, ts: DateTime<Utc>) -> DateTime<Utc> {
        let size = self.window_size.num_milliseconds().max(1);
        let start = ts.timestamp_millis().div_euclid(size) * size;
        Utc.timestamp_millis_opt(start).single().unwrap_or(ts)
    }

    /// The window starting at `start`, or `None` past the end of the date range.
    fn span_at(&self, start: DateTime<Utc>) -> Option<TimeRange> {
        start
            .checked_add_signed(self.window_size)
            .map(|end| TimeRange::new(start, end))
    }

    /// Folds one record into the open window.
    ///
    /// Returns the windows sealed because the record crossed a boundary: the
    /// previously open window for every metric, followed by heartbeat windows
    /// for any skipped buckets.
    ///
    /// # Errors
    ///
    /// Returns [`IngestionError::LateRecord`] when the record belongs to a window
    /// that has already been sealed or precedes the open one, and
    /// [`IngestionError::Rejected`] when its window would end past the
    /// representable date range.
    ///
    /// Negative or non-finite metric values are skipped and counted in
    /// [`Windower::dropped_values`]; the rest of the record still counts.
    pub fn ingest(&mut self, record: &LogRecord) -> Result<Vec<MetricWindow>, IngestionError> {
        let ts = record.timestamp;
        let Some(span) = self.span_at(self.align(ts)) else {
            return Err(RejectReason::InvalidTimestamp(ts.to_rfc3339()).into());
        };
        let sealed = match self.open {
            Some(open) if open.contains(&ts) => Vec::new(),
            Some(open) if ts < open.start => {
                return Err(IngestionError::LateRecord {
                    timestamp: ts,
                    window_start: open.start,
                });
            }
            Some(_) => self.roll_to(ts),
            None => {
                if let Some(watermark) = self.watermark {
                    if ts < watermark {
                        return Err(IngestionError::LateRecord {
                            timestamp: ts,
                            window_start: watermark,
                        });
                    }
                }
                self.open = Some(span);
                Vec::new()
            }
        };

        let service = record.service.as_deref();
        for key in MetricKey::ALL {
            if let Some(value) = key.observe(record) {
                if !value.is_finite() || value < 0.0 {
                    warn!(metric = %key, value, timestamp = %ts, "Skipped invalid metric value");
                    self.dropped_values += 1;
                    continue;
                }
                let contributes = !key.is_counter() || value > 0.0;
                self.accumulators
                    .entry(key)
                    .or_default()
                    .push(value, service, contributes);
            }
        }

        Ok(sealed)
    }

    /// Seals every window ending at or before `now`.
    ///
    /// Used to make progress on wall-clock time when the input goes quiet. The
    /// window containing `now` becomes the open window.
    pub fn advance_to(&mut self, now: DateTime<Utc>) -> Vec<MetricWindow> {
        match self.open {
            Some(open) if open.end <= now => self.roll_to(now),
            _ => Vec::new(),
        }
    }

    /// Seals the open window at end of stream.
    pub fn flush(&mut self) -> Vec<MetricWindow> {
        match self.open.take() {
            Some(open) => self.seal(open),
            None => Vec::new(),
        }
    }

    /// Seals the open window, emits heartbeats up to the bucket containing
    /// `ts`, and opens that bucket.
    fn roll_to(&mut self, ts: DateTime<Utc>) -> Vec<MetricWindow> {
        let Some(open) = self.open else {
            return Vec::new();
        };
        let mut sealed = self.seal(open);

        let target = self.align(ts);
        let mut next = open.end;
        let mut heartbeats = 0usize;
        while next < target {
            if heartbeats == self.config.max_heartbeat_windows {
                warn!(
                    from = %next,
                    to = %target,
                    cap = self.config.max_heartbeat_windows,
                    "Gap exceeds heartbeat cap, realigning windows"
                );
                break;
            }
            let Some(span) = self.span_at(next) else {
                break;
            };
            sealed.extend(self.seal(span));
            next = span.end;
            heartbeats += 1;
        }
        if heartbeats > 0 {
            debug!(count = heartbeats, "Emitted heartbeat windows");
        }

        self.open = self.span_at(target);
        if self.open.is_none() {
            warn!(%target, "No window fits before the end of the date range");
        }
        sealed
    }

    fn seal(&mut self, span: TimeRange) -> Vec<MetricWindow> {
        let windows: Vec<MetricWindow> = MetricKey::ALL
            .into_iter()
            .map(|key| {
                let acc = self.accumulators.remove(&key).unwrap_or_default();
                let carried = self.last_means.get(&key).copied().unwrap_or(0.0);
                let window = acc.seal(key, span, carried);
                if !window.is_empty() {
                    self.last_means.insert(key, window.mean);
                }
                window
            })
            .collect();

        debug!(
            window_start = %span.start,
            window_end = %span.end,
            samples = windows.iter().map(|w| w.sample_count).max().unwrap_or(0),
            "Sealed window"
        );
        self.watermark = Some(span.end);
        windows
    }
}
