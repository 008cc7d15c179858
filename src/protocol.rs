//! iperf3 control-channel wire format.
//!
//! The control channel carries three kinds of units:
//!
//! - **Commands**: one unsigned byte, see [`Command`]
//! - **Length-prefixed payloads**: a 4-byte big-endian length followed by
//!   exactly that many bytes of JSON, with no terminator
//! - **Cookie**: exactly [`COOKIE_SIZE`] opaque bytes sent once by the client
//!   on the control channel and once on the data channel

use crate::config::Protocol;
use crate::{Error, Result};
use serde_json::Value;
use std::fmt;
use std::future::poll_fn;
use std::io;
use std::pin::Pin;
use std::task::Poll;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};

/// Length of the client session cookie.
pub const COOKIE_SIZE: usize = 37;

/// Datagram the server answers the client's first UDP datagram with.
pub const UDP_HANDSHAKE_REPLY: [u8; 4] = [0x12, 0x34, 0x56, 0x78];

/// Control-channel command codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    TestStart = 1,
    TestRunning = 2,
    TestEnd = 4,
    ParamExchange = 9,
    CreateStreams = 10,
    ServerTerminate = 11,
    ClientTerminate = 12,
    ExchangeResults = 13,
    DisplayResults = 14,
    IperfStart = 15,
    IperfDone = 16,
    /// Sent as -1 on the wire
    AccessDenied = 0xFF,
}

impl Command {
    pub fn as_byte(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for Command {
    type Error = u8;

    fn try_from(byte: u8) -> std::result::Result<Self, u8> {
        Ok(match byte {
            1 => Command::TestStart,
            2 => Command::TestRunning,
            4 => Command::TestEnd,
            9 => Command::ParamExchange,
            10 => Command::CreateStreams,
            11 => Command::ServerTerminate,
            12 => Command::ClientTerminate,
            13 => Command::ExchangeResults,
            14 => Command::DisplayResults,
            15 => Command::IperfStart,
            16 => Command::IperfDone,
            0xFF => Command::AccessDenied,
            other => return Err(other),
        })
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Command::TestStart => "TEST_START",
            Command::TestRunning => "TEST_RUNNING",
            Command::TestEnd => "TEST_END",
            Command::ParamExchange => "PARAM_EXCHANGE",
            Command::CreateStreams => "CREATE_STREAMS",
            Command::ServerTerminate => "SERVER_TERMINATE",
            Command::ClientTerminate => "CLIENT_TERMINATE",
            Command::ExchangeResults => "EXCHANGE_RESULTS",
            Command::DisplayResults => "DISPLAY_RESULTS",
            Command::IperfStart => "IPERF_START",
            Command::IperfDone => "IPERF_DONE",
            Command::AccessDenied => "ACCESS_DENIED",
        };
        write!(f, "{}({})", name, self.as_byte())
    }
}

/// Opaque client session identifier.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Cookie([u8; COOKIE_SIZE]);

impl Cookie {
    pub fn new(bytes: [u8; COOKIE_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; COOKIE_SIZE] {
        &self.0
    }
}

impl fmt::Display for Cookie {
    /// Printable part of the cookie; clients NUL-terminate it.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let end = self.0.iter().position(|&b| b == 0).unwrap_or(COOKIE_SIZE);
        write!(f, "{}", String::from_utf8_lossy(&self.0[..end]))
    }
}

impl fmt::Debug for Cookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Cookie({:?})", self.to_string())
    }
}

/// Encodes a payload length in network byte order.
pub fn encode_length(len: u32) -> [u8; 4] {
    len.to_be_bytes()
}

/// Decodes a network-byte-order payload length.
pub fn decode_length(bytes: [u8; 4]) -> u32 {
    u32::from_be_bytes(bytes)
}

/// Reads a full cookie, failing with [`Error::ShortCookie`] if the peer
/// closes before all [`COOKIE_SIZE`] bytes arrive.
pub async fn read_cookie<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Cookie> {
    let mut bytes = [0u8; COOKIE_SIZE];
    let mut received = 0;

    while received < COOKIE_SIZE {
        let n = reader.read(&mut bytes[received..]).await?;
        if n == 0 {
            return Err(Error::ShortCookie {
                received,
                expected: COOKIE_SIZE,
            });
        }
        received += n;
    }

    Ok(Cookie(bytes))
}

pub async fn write_command<W: AsyncWrite + Unpin>(writer: &mut W, command: Command) -> Result<()> {
    writer.write_all(&[command.as_byte()]).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads one command byte, waiting for it.
pub async fn read_command<R: AsyncRead + Unpin>(reader: &mut R) -> Result<u8> {
    Ok(reader.read_u8().await?)
}

/// Reads one command byte only if it is already buffered.
///
/// Returns `Ok(None)` without waiting when nothing is pending. A closed
/// channel is reported as [`io::ErrorKind::UnexpectedEof`].
pub async fn poll_command<R: AsyncRead + Unpin>(reader: &mut R) -> io::Result<Option<u8>> {
    let mut byte = [0u8; 1];
    let got = poll_fn(|cx| {
        let mut buf = ReadBuf::new(&mut byte);
        match Pin::new(&mut *reader).poll_read(cx, &mut buf) {
            Poll::Pending => Poll::Ready(Ok(false)),
            Poll::Ready(Ok(())) if buf.filled().is_empty() => Poll::Ready(Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "control channel closed",
            ))),
            Poll::Ready(Ok(())) => Poll::Ready(Ok(true)),
            Poll::Ready(Err(e)) => Poll::Ready(Err(e)),
        }
    })
    .await?;
    Ok(got.then_some(byte[0]))
}

/// Reads a 4-byte big-endian length prefix.
pub async fn read_length<R: AsyncRead + Unpin>(reader: &mut R) -> Result<u32> {
    let mut len_bytes = [0u8; 4];
    reader.read_exact(&mut len_bytes).await?;
    Ok(decode_length(len_bytes))
}

/// Writes `payload` behind its length prefix.
pub async fn write_length_prefixed<W: AsyncWrite + Unpin>(writer: &mut W, payload: &[u8]) -> Result<()> {
    let len = u32::try_from(payload.len())
        .map_err(|_| Error::Protocol(format!("payload of {} bytes is too long", payload.len())))?;
    let mut framed = Vec::with_capacity(4 + payload.len());
    framed.extend_from_slice(&encode_length(len));
    framed.extend_from_slice(payload);
    writer.write_all(&framed).await?;
    writer.flush().await?;
    Ok(())
}

/// Test parameters sent by the client after PARAM_EXCHANGE.
///
/// Only `reverse` and `udp` steer the session; the rest are kept for
/// logging. Missing or mistyped fields fall back to `false` / `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TestParams {
    pub reverse: bool,
    pub udp: bool,
    pub tcp: Option<bool>,
    pub time: Option<u64>,
    pub len: Option<u64>,
    pub parallel: Option<u64>,
    pub omit: Option<u64>,
    pub client_version: Option<String>,
}

impl TestParams {
    /// Parses the parameter JSON object.
    ///
    /// # Examples
    ///
    /// ```
    /// use edgeperf3::protocol::TestParams;
    /// use edgeperf3::Protocol;
    ///
    /// let params = TestParams::parse(br#"{"reverse":true,"udp":false,"time":10}"#).unwrap();
    /// assert!(params.reverse);
    /// assert_eq!(params.transport(), Protocol::Tcp);
    /// assert_eq!(params.time, Some(10));
    /// ```
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let value: Value = serde_json::from_slice(bytes)?;
        Ok(Self::from_value(&value))
    }

    pub fn from_value(value: &Value) -> Self {
        let flag = |key: &str| value.get(key).and_then(Value::as_bool);
        let number = |key: &str| value.get(key).and_then(Value::as_u64);

        Self {
            reverse: flag("reverse").unwrap_or(false),
            udp: flag("udp").unwrap_or(false),
            tcp: flag("tcp"),
            time: number("time"),
            len: number("len"),
            parallel: number("parallel"),
            omit: number("omit"),
            client_version: value
                .get("client_version")
                .and_then(Value::as_str)
                .map(str::to_string),
        }
    }

    pub fn transport(&self) -> Protocol {
        if self.udp {
            Protocol::Udp
        } else {
            Protocol::Tcp
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_wire_values() {
        assert_eq!(Command::TestStart.as_byte(), 1);
        assert_eq!(Command::TestRunning.as_byte(), 2);
        assert_eq!(Command::TestEnd.as_byte(), 4);
        assert_eq!(Command::ParamExchange.as_byte(), 9);
        assert_eq!(Command::CreateStreams.as_byte(), 10);
        assert_eq!(Command::ExchangeResults.as_byte(), 13);
        assert_eq!(Command::DisplayResults.as_byte(), 14);
        assert_eq!(Command::IperfDone.as_byte(), 16);
        assert_eq!(Command::AccessDenied.as_byte(), (-1i8) as u8);
    }

    #[test]
    fn test_command_try_from() {
        for byte in 0..=255u8 {
            if let Ok(command) = Command::try_from(byte) {
                assert_eq!(command.as_byte(), byte);
            }
        }
        assert_eq!(Command::try_from(4), Ok(Command::TestEnd));
        assert_eq!(Command::try_from(3), Err(3));
    }

    #[test]
    fn test_command_display() {
        assert_eq!(Command::TestEnd.to_string(), "TEST_END(4)");
        assert_eq!(Command::IperfDone.to_string(), "IPERF_DONE(16)");
    }

    #[test]
    fn test_length_is_big_endian() {
        assert_eq!(encode_length(0x0102_0304), [1, 2, 3, 4]);
        assert_eq!(decode_length([0, 0, 0x01, 0x2c]), 300);
    }

    #[test]
    fn test_cookie_display_stops_at_nul() {
        let mut bytes = [0u8; COOKIE_SIZE];
        bytes[..6].copy_from_slice(b"abc123");
        assert_eq!(Cookie::new(bytes).to_string(), "abc123");
    }

    #[tokio::test]
    async fn test_read_cookie_full() {
        let mut input: &[u8] = b"COOKIE-0123456789abcdefghijklmnopqrstuvwxyz";
        let cookie = read_cookie(&mut input).await.unwrap();
        assert_eq!(&cookie.as_bytes()[..], b"COOKIE-0123456789abcdefghijklmnopqrst");
        assert_eq!(input, b"uvwxyz");
    }

    #[tokio::test]
    async fn test_read_cookie_short() {
        let mut input: &[u8] = b"too-short";
        match read_cookie(&mut input).await {
            Err(Error::ShortCookie { received, expected }) => {
                assert_eq!(received, 9);
                assert_eq!(expected, COOKIE_SIZE);
            }
            other => panic!("Expected ShortCookie, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_poll_command_without_data() {
        let (mut client, mut server) = tokio::io::duplex(64);
        assert_eq!(poll_command(&mut server).await.unwrap(), None);

        client.write_all(&[Command::TestEnd.as_byte()]).await.unwrap();
        assert_eq!(poll_command(&mut server).await.unwrap(), Some(4));
        assert_eq!(poll_command(&mut server).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_poll_command_closed_channel() {
        let (client, mut server) = tokio::io::duplex(64);
        drop(client);
        let err = poll_command(&mut server).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[tokio::test]
    async fn test_write_length_prefixed() {
        let mut out = Vec::new();
        write_length_prefixed(&mut out, b"{\"a\":1}").await.unwrap();
        assert_eq!(&out[..4], &[0, 0, 0, 7]);
        assert_eq!(&out[4..], b"{\"a\":1}");

        let mut reader: &[u8] = &out;
        assert_eq!(read_length(&mut reader).await.unwrap(), 7);
    }

    #[test]
    fn test_params_reverse_tcp() {
        let params = TestParams::parse(br#"{"reverse":true,"udp":false}"#).unwrap();
        assert!(params.reverse);
        assert!(!params.udp);
        assert_eq!(params.transport(), Protocol::Tcp);
    }

    #[test]
    fn test_params_empty_object_defaults() {
        let params = TestParams::parse(b"{}").unwrap();
        assert_eq!(params, TestParams::default());
        assert_eq!(params.transport(), Protocol::Tcp);
    }

    #[test]
    fn test_params_non_boolean_flags_default_to_false() {
        let params = TestParams::parse(br#"{"reverse":1,"udp":"yes"}"#).unwrap();
        assert!(!params.reverse);
        assert!(!params.udp);
    }

    #[test]
    fn test_params_full_client_document() {
        let json = br#"{"tcp":true,"omit":0,"time":10,"num":0,"blockcount":0,"parallel":1,
            "len":131072,"pacing_timer":1000,"client_version":"3.9","udp":true}"#;
        let params = TestParams::parse(json).unwrap();
        assert!(params.udp);
        assert_eq!(params.transport(), Protocol::Udp);
        assert_eq!(params.tcp, Some(true));
        assert_eq!(params.time, Some(10));
        assert_eq!(params.len, Some(131072));
        assert_eq!(params.parallel, Some(1));
        assert_eq!(params.omit, Some(0));
        assert_eq!(params.client_version.as_deref(), Some("3.9"));
    }

    #[test]
    fn test_params_invalid_json() {
        assert!(matches!(TestParams::parse(b"{\"reverse\":"), Err(Error::Json(_))));
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            /// Property: length framing round-trips every u32
            #[test]
            fn prop_length_roundtrip(len in any::<u32>()) {
                prop_assert_eq!(decode_length(encode_length(len)), len);
            }

            /// Property: any payload written with a prefix reads back with its exact length
            #[test]
            fn prop_length_prefix_matches_payload(payload in proptest::collection::vec(any::<u8>(), 0..2048)) {
                let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
                let mut out = Vec::new();
                runtime.block_on(write_length_prefixed(&mut out, &payload)).unwrap();

                let mut reader: &[u8] = &out;
                let len = runtime.block_on(read_length(&mut reader)).unwrap();
                prop_assert_eq!(len as usize, payload.len());
                prop_assert_eq!(reader, &payload[..]);
            }
        }
    }
}
