//! edgeperf3 - an iperf3-compatible test server
//!
//! This library implements the server side of the iperf3 wire protocol for
//! constrained network endpoints: one client session at a time, one TCP or
//! UDP data stream, forward or reverse direction.
//!
//! # Features
//!
//! - iperf3 control protocol (cookie, parameter and result exchange)
//! - TCP and UDP data channels, client-to-server and reverse
//! - Interval and summary throughput reports
//! - iperf3 JSON result documents
//! - Asynchronous I/O using tokio

pub mod buffer_pool;
pub mod clock;
pub mod config;
pub mod error;
pub mod interval_reporter;
pub mod protocol;
pub mod results;
pub mod server;
pub mod session;
pub mod stats;
pub mod transfer;
pub mod transport;

pub use clock::{Clock, ManualClock, MonotonicClock};
pub use config::{Config, Protocol};
pub use error::{Error, Result};
pub use interval_reporter::{IntervalMessage, IntervalReporter};
pub use server::Server;
pub use session::{Session, SessionReport, SessionState};
pub use stats::{Stats, StatsSnapshot};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
