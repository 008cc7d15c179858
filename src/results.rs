//! Result documents exchanged after the test.
//!
//! The server reports one stream built from its [`StatsSnapshot`]. Fields it
//! does not measure (CPU load, retransmits, jitter, errors) carry zero. The
//! client's document is only parsed for logging.

use crate::config::Protocol;
use crate::stats::StatsSnapshot;
use crate::Result;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

/// Stream id the server reports its single stream under.
pub const SERVER_STREAM_ID: u32 = 1;

/// Congestion algorithm named in TCP results.
pub const REPORTED_CONGESTION: &str = "cubic";

/// Per-stream entry in the server result document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamResult {
    pub id: u32,
    pub bytes: u64,
    pub retransmits: i64,
    pub jitter: f64,
    pub errors: u64,
    pub packets: u64,
    pub start_time: f64,
    pub end_time: f64,
}

/// Server result document sent after EXCHANGE_RESULTS
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerResults {
    pub cpu_util_total: f64,
    pub cpu_util_user: f64,
    pub cpu_util_system: f64,
    pub sender_has_retransmits: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub congestion_used: Option<String>,
    pub streams: Vec<StreamResult>,
}

impl ServerResults {
    pub fn from_snapshot(snapshot: &StatsSnapshot, transport: Protocol) -> Self {
        let congestion_used = match transport {
            Protocol::Tcp => Some(REPORTED_CONGESTION.to_string()),
            Protocol::Udp => None,
        };

        Self {
            cpu_util_total: 0.0,
            cpu_util_user: 0.0,
            cpu_util_system: 0.0,
            sender_has_retransmits: 0,
            congestion_used,
            streams: vec![StreamResult {
                id: SERVER_STREAM_ID,
                bytes: snapshot.total_bytes,
                retransmits: 0,
                jitter: 0.0,
                errors: 0,
                packets: snapshot.total_packets,
                start_time: 0.0,
                end_time: snapshot.elapsed_secs(),
            }],
        }
    }
}

/// Builds and serializes the server result document.
///
/// # Examples
///
/// ```
/// use edgeperf3::results::build_server_result;
/// use edgeperf3::stats::StatsSnapshot;
/// use edgeperf3::Protocol;
///
/// let snapshot = StatsSnapshot { total_bytes: 40960, total_packets: 10, elapsed_micros: 2_000_000 };
/// let bytes = build_server_result(&snapshot, Protocol::Udp).unwrap();
/// let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
///
/// assert_eq!(json["streams"][0]["bytes"], 40960);
/// assert_eq!(json["streams"][0]["end_time"], 2.0);
/// assert!(json.get("congestion_used").is_none());
/// ```
pub fn build_server_result(snapshot: &StatsSnapshot, transport: Protocol) -> Result<Vec<u8>> {
    let results = ServerResults::from_snapshot(snapshot, transport);
    Ok(serde_json::to_vec(&results)?)
}

/// Stream entry of a client result document. Every field is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ClientStreamResult {
    pub id: Option<i64>,
    pub bytes: Option<u64>,
    pub retransmits: Option<i64>,
    pub jitter: Option<f64>,
    pub errors: Option<i64>,
    pub packets: Option<i64>,
    pub start_time: Option<f64>,
    pub end_time: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ClientResults {
    pub cpu_util_total: Option<f64>,
    pub cpu_util_user: Option<f64>,
    pub cpu_util_system: Option<f64>,
    pub sender_has_retransmits: Option<i64>,
    pub congestion_used: Option<String>,
    pub streams: Vec<ClientStreamResult>,
}

/// Parses the client's result document for diagnostics.
///
/// A malformed document is logged and yields `None`; it never fails the
/// session.
pub fn parse_client_result(bytes: &[u8]) -> Option<ClientResults> {
    debug!("Client results received: {}", String::from_utf8_lossy(bytes));

    match serde_json::from_slice::<ClientResults>(bytes) {
        Ok(results) => {
            for stream in &results.streams {
                info!(
                    "Client stream {}: {} bytes, {} packets, {:.3} s",
                    stream.id.unwrap_or_default(),
                    stream.bytes.unwrap_or_default(),
                    stream.packets.unwrap_or_default(),
                    stream.end_time.unwrap_or_default() - stream.start_time.unwrap_or_default()
                );
            }
            Some(results)
        }
        Err(e) => {
            warn!("Failed to parse client results: {}", e);
            None
        }
    }
}
