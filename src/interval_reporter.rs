//! Throughput report delivery.
//!
//! The stats engine never prints. It hands header, interval and summary
//! reports to an [`IntervalReporter`], which forwards them over a channel to
//! a separate printing task, keeping formatting and console I/O off the
//! transfer loop.

use std::time::Duration;
use tokio::sync::mpsc;

/// Column header printed when a measurement window opens.
pub const REPORT_HEADER: &str = "Interval           Transfer     Bitrate";

const SUMMARY_RULE: &str = "------------------------------------------------------------";

/// Throughput over one reporting interval.
///
/// # Examples
///
/// ```
/// use edgeperf3::interval_reporter::{format_interval, IntervalReport};
/// use std::time::Duration;
///
/// let report = IntervalReport {
///     interval_start: Duration::from_secs(0),
///     interval_end: Duration::from_secs(1),
///     bytes: 1_250_000,
///     packets: 306,
///     megabits_per_second: 10.0,
/// };
///
/// assert_eq!(
///     format_interval(&report),
///     " 0.00-1.00  sec  1250000 Bytes  10.00 Mbits/sec"
/// );
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct IntervalReport {
    pub interval_start: Duration,
    pub interval_end: Duration,
    pub bytes: u64,
    pub packets: u64,
    pub megabits_per_second: f64,
}

/// Totals for a whole measurement window.
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryReport {
    pub elapsed: Duration,
    pub bytes: u64,
    pub packets: u64,
    pub megabits_per_second: f64,
}

/// Message consumed by the printing task
#[derive(Debug, Clone, PartialEq)]
pub enum IntervalMessage {
    /// A measurement window opened
    Header,
    /// One pacing interval elapsed
    Report(IntervalReport),
    /// A measurement window closed
    Summary(SummaryReport),
    /// Stop the reporter task
    Complete,
}

/// Cloneable sending side of the report channel.
///
/// # Examples
///
/// ```
/// use edgeperf3::interval_reporter::{IntervalMessage, IntervalReporter};
///
/// #[tokio::main]
/// async fn main() {
///     let (reporter, mut receiver) = IntervalReporter::new();
///     reporter.header();
///     reporter.complete();
///
///     assert_eq!(receiver.recv().await, Some(IntervalMessage::Header));
///     assert_eq!(receiver.recv().await, Some(IntervalMessage::Complete));
/// }
/// ```
#[derive(Debug, Clone)]
pub struct IntervalReporter {
    sender: mpsc::UnboundedSender<IntervalMessage>,
}

impl IntervalReporter {
    /// Returns the handle and the receiving end for [`run_reporter_task`].
    pub fn new() -> (Self, mpsc::UnboundedReceiver<IntervalMessage>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    pub fn header(&self) {
        let _ = self.sender.send(IntervalMessage::Header);
    }

    pub fn report(&self, report: IntervalReport) {
        let _ = self.sender.send(IntervalMessage::Report(report));
    }

    pub fn summary(&self, summary: SummaryReport) {
        let _ = self.sender.send(IntervalMessage::Summary(summary));
    }

    /// Ends the printing task
    pub fn complete(&self) {
        let _ = self.sender.send(IntervalMessage::Complete);
    }
}

/// Prints reports until `Complete` arrives or every sender is gone.
pub async fn run_reporter_task(mut receiver: mpsc::UnboundedReceiver<IntervalMessage>) {
    while let Some(msg) = receiver.recv().await {
        match msg {
            IntervalMessage::Header => println!("{}", REPORT_HEADER),
            IntervalMessage::Report(report) => println!("{}", format_interval(&report)),
            IntervalMessage::Summary(summary) => {
                for line in format_summary(&summary) {
                    println!("{}", line);
                }
            }
            IntervalMessage::Complete => break,
        }
    }
}

/// Formats one interval line: start-end seconds, bytes, Mbit/s.
pub fn format_interval(report: &IntervalReport) -> String {
    format!(
        "{:5.2}-{:<5.2} sec {:8} Bytes  {:5.2} Mbits/sec",
        report.interval_start.as_secs_f64(),
        report.interval_end.as_secs_f64(),
        report.bytes,
        report.megabits_per_second
    )
}

/// Formats the closing rule and the total line.
pub fn format_summary(summary: &SummaryReport) -> [String; 2] {
    [
        SUMMARY_RULE.to_string(),
        format!(
            "Total: {:5.2} sec {:8} Bytes  {:5.2} Mbits/sec",
            summary.elapsed.as_secs_f64(),
            summary.bytes,
            summary.megabits_per_second
        ),
    ]
}
