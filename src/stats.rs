//! Throughput accounting for one test session.
//!
//! [`Stats`] keeps cumulative and per-interval byte/packet counters over a
//! measurement window opened by [`Stats::start`] and closed by
//! [`Stats::stop`]. Outside that window every accounting call is a no-op.
//! Reports are handed to an optional [`IntervalReporter`].

use crate::clock::{elapsed_micros, Clock, MonotonicClock};
use crate::interval_reporter::{IntervalReport, IntervalReporter, SummaryReport};
use std::time::Duration;

/// Frozen counters of a closed measurement window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatsSnapshot {
    pub total_bytes: u64,
    pub total_packets: u64,
    /// Microseconds from `start()` to `stop()`
    pub elapsed_micros: u32,
}

impl StatsSnapshot {
    pub fn elapsed_secs(&self) -> f64 {
        self.elapsed_micros as f64 / 1e6
    }
}

#[derive(Debug)]
pub struct Stats<C: Clock = MonotonicClock> {
    clock: C,
    reporter: Option<IntervalReporter>,
    pacing_interval_micros: u32,
    running: bool,
    t0: u32,
    t1: u32,
    t3: u32,
    total_bytes: u64,
    interval_bytes: u64,
    total_packets: u64,
    interval_packets: u64,
}

/// Megabits per second for `bytes` moved in `micros`.
fn megabits_per_second(bytes: u64, micros: u32) -> f64 {
    if micros == 0 {
        return 0.0;
    }
    let secs = micros as f64 / 1e6;
    (bytes as f64 * 8.0) / 1e6 / secs
}

impl<C: Clock> Stats<C> {
    /// Creates an idle engine reporting every `pacing_interval`.
    pub fn new(pacing_interval: Duration, clock: C) -> Self {
        Self {
            clock,
            reporter: None,
            pacing_interval_micros: pacing_interval.as_micros().min(u32::MAX as u128) as u32,
            running: false,
            t0: 0,
            t1: 0,
            t3: 0,
            total_bytes: 0,
            interval_bytes: 0,
            total_packets: 0,
            interval_packets: 0,
        }
    }

    pub fn with_reporter(mut self, reporter: IntervalReporter) -> Self {
        self.reporter = Some(reporter);
        self
    }

    /// Opens a measurement window and emits the report header.
    pub fn start(&mut self) {
        let now = self.clock.now_micros();
        self.t0 = now;
        self.t1 = now;
        self.total_bytes = 0;
        self.interval_bytes = 0;
        self.total_packets = 0;
        self.interval_packets = 0;
        self.running = true;

        if let Some(reporter) = &self.reporter {
            reporter.header();
        }
    }

    /// Accounts one transfer of `n` bytes as one packet.
    pub fn add_bytes(&mut self, n: usize) {
        if !self.running {
            return;
        }
        self.total_bytes += n as u64;
        self.interval_bytes += n as u64;
        self.total_packets += 1;
        self.interval_packets += 1;
    }

    /// Emits an interval report when the pacing interval has been exceeded,
    /// or unconditionally when `final_tick` is set. Returns the report.
    pub fn tick(&mut self, final_tick: bool) -> Option<IntervalReport> {
        if !self.running {
            return None;
        }

        let t2 = self.clock.now_micros();
        let dt = elapsed_micros(t2, self.t1);
        if !final_tick && dt <= self.pacing_interval_micros {
            return None;
        }

        let report = IntervalReport {
            interval_start: Duration::from_micros(elapsed_micros(self.t1, self.t0) as u64),
            interval_end: Duration::from_micros(elapsed_micros(t2, self.t0) as u64),
            bytes: self.interval_bytes,
            packets: self.interval_packets,
            megabits_per_second: megabits_per_second(self.interval_bytes, dt),
        };

        self.t1 = t2;
        self.interval_bytes = 0;
        self.interval_packets = 0;

        if let Some(reporter) = &self.reporter {
            reporter.report(report.clone());
        }
        Some(report)
    }

    /// Closes the window: final interval report, then the summary.
    /// Returns the summary, or `None` when the window was not open.
    pub fn stop(&mut self) -> Option<SummaryReport> {
        if !self.running {
            return None;
        }

        self.tick(true);
        self.running = false;
        self.t3 = self.clock.now_micros();

        let elapsed = elapsed_micros(self.t3, self.t0);
        let summary = SummaryReport {
            elapsed: Duration::from_micros(elapsed as u64),
            bytes: self.total_bytes,
            packets: self.total_packets,
            megabits_per_second: megabits_per_second(self.total_bytes, elapsed),
        };

        if let Some(reporter) = &self.reporter {
            reporter.summary(summary.clone());
        }
        Some(summary)
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    pub fn interval_bytes(&self) -> u64 {
        self.interval_bytes
    }

    pub fn total_packets(&self) -> u64 {
        self.total_packets
    }

    pub fn interval_packets(&self) -> u64 {
        self.interval_packets
    }

    /// Counters and duration of the last closed window.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            total_bytes: self.total_bytes,
            total_packets: self.total_packets,
            elapsed_micros: elapsed_micros(self.t3, self.t0),
        }
    }
}
