//! Poll loop metrics using OpenTelemetry.

use crate::service::PollReport;
use opentelemetry::KeyValue;
use opentelemetry::metrics::{Counter, Gauge, Histogram, Meter};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Metrics collector for poll passes and commands.
///
/// # Examples
///
/// ```rust,no_run
/// use opentelemetry::global;
/// use sitewatch::metrics::WatchMetrics;
///
/// let metrics = WatchMetrics::new(global::meter("sitewatch"));
///
/// let timer = metrics.start_pass();
/// // ... run the pass ...
/// # let report = sitewatch::service::PollReport::default();
/// metrics.record_pass(timer, &report);
/// ```
#[derive(Clone)]
pub struct WatchMetrics {
    passes: Counter<u64>,
    passes_skipped: Counter<u64>,
    pass_duration: Histogram<f64>,
    checks: Counter<u64>,
    notifications: Counter<u64>,
    save_failures: Counter<u64>,
    watched_resources: Gauge<i64>,
    since_last_pass: Gauge<i64>,
    last_pass: Arc<parking_lot::Mutex<Option<Instant>>>,
}

impl WatchMetrics {
    /// Create a new metrics collector with the provided meter.
    pub fn new(meter: Meter) -> Self {
        let passes = meter
            .u64_counter("sitewatch.poll.passes")
            .with_description("Number of completed poll passes")
            .build();

        let passes_skipped = meter
            .u64_counter("sitewatch.poll.skipped")
            .with_description("Poll passes skipped because one was already running")
            .build();

        let pass_duration = meter
            .f64_histogram("sitewatch.poll.duration")
            .with_description("Duration of poll passes in seconds")
            .with_unit("s")
            .build();

        let checks = meter
            .u64_counter("sitewatch.checks")
            .with_description("Resource checks by outcome")
            .build();

        let notifications = meter
            .u64_counter("sitewatch.notifications")
            .with_description("Notifications handed to the host by result")
            .build();

        let save_failures = meter
            .u64_counter("sitewatch.save.failures")
            .with_description("Number of failed graph saves")
            .build();

        let watched_resources = meter
            .i64_gauge("sitewatch.resources.watched")
            .with_description("Number of resources being watched")
            .build();

        let since_last_pass = meter
            .i64_gauge("sitewatch.poll.since_last")
            .with_description("Time since the last completed poll pass in seconds")
            .with_unit("s")
            .build();

        Self {
            passes,
            passes_skipped,
            pass_duration,
            checks,
            notifications,
            save_failures,
            watched_resources,
            since_last_pass,
            last_pass: Arc::new(parking_lot::Mutex::new(None)),
        }
    }

    /// Start timing a pass and refresh the time-since-last-pass gauge.
    pub fn start_pass(&self) -> Instant {
        self.update_since_last_pass();
        Instant::now()
    }

    /// Record a completed pass started at `start`.
    pub fn record_pass(&self, start: Instant, report: &PollReport) {
        self.passes.add(1, &[]);
        self.pass_duration.record(start.elapsed().as_secs_f64(), &[]);

        let unchanged = report.checked.saturating_sub(report.changed + report.failed);
        for (outcome, count) in [
            ("unchanged", unchanged),
            ("changed", report.changed),
            ("failed", report.failed),
        ] {
            self.checks
                .add(count as u64, &[KeyValue::new("outcome", outcome)]);
        }
        self.notifications
            .add(report.notified as u64, &[KeyValue::new("result", "delivered")]);
        self.notifications.add(
            report.failed_deliveries as u64,
            &[KeyValue::new("result", "failed")],
        );
        if !report.saved {
            self.save_failures.add(1, &[]);
        }

        *self.last_pass.lock() = Some(Instant::now());
    }

    /// Record a pass that did not run.
    pub fn record_skipped(&self) {
        self.passes_skipped.add(1, &[]);
        self.update_since_last_pass();
    }

    /// Record a failed save outside a pass.
    pub fn record_save_failure(&self) {
        self.save_failures.add(1, &[]);
    }

    /// Update the watched resource gauge.
    pub fn update_watched_count(&self, count: usize) {
        self.watched_resources.record(count as i64, &[]);
    }

    /// Time since the last completed pass, if there was one.
    pub fn since_last_pass(&self) -> Option<Duration> {
        self.last_pass.lock().map(|at| at.elapsed())
    }

    fn update_since_last_pass(&self) {
        if let Some(age) = self.since_last_pass() {
            self.since_last_pass.record(age.as_secs() as i64, &[]);
        }
    }
}
