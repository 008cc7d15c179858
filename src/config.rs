use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Data-channel transport requested by the client.
///
/// The server never picks this itself: the client's parameter exchange
/// carries a `udp` flag and the session selects the transport from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Protocol {
    /// Connection-oriented byte stream
    Tcp,
    /// Addressed datagrams
    Udp,
}

/// Server configuration.
///
/// Use the builder methods to customize the defaults.
///
/// # Examples
///
/// ```
/// use edgeperf3::Config;
/// use std::time::Duration;
///
/// let config = Config::server(5201)
///     .with_interval(Duration::from_millis(500))
///     .with_test_deadline(Duration::from_secs(60));
///
/// assert_eq!(config.chunk_size(), 4096);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Control port; TCP data connections arrive on the same listener and
    /// UDP data is bound to the same port number
    pub port: u16,

    /// Bind address (unspecified IPv4 address when not set)
    pub bind_addr: Option<IpAddr>,

    /// Pacing interval for throughput reports
    pub interval: Duration,

    /// Transfer buffer size in bytes; one data chunk is half of it
    pub transfer_buffer_size: usize,

    /// Largest parameter JSON the server accepts
    pub param_buffer_size: usize,

    /// Receive buffer for the client's result JSON
    pub result_buffer_size: usize,

    /// Upper bound on the transfer phase; `None` waits for TEST_END forever
    pub test_deadline: Option<Duration>,

    /// Abort when the data-channel cookie differs from the control cookie
    pub verify_cookie: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 5201,
            bind_addr: None,
            interval: Duration::from_millis(1000),
            transfer_buffer_size: 8 * 1024,
            param_buffer_size: 4 * 1024,
            result_buffer_size: 1024,
            test_deadline: None,
            verify_cookie: false,
        }
    }
}

impl Config {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a configuration listening on `port`.
    pub fn server(port: u16) -> Self {
        Self {
            port,
            ..Default::default()
        }
    }

    pub fn with_bind_addr(mut self, addr: IpAddr) -> Self {
        self.bind_addr = Some(addr);
        self
    }

    /// Sets the report pacing interval.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Sets the transfer buffer size. Chunks sent or received per loop
    /// iteration are half of this.
    pub fn with_transfer_buffer_size(mut self, size: usize) -> Self {
        self.transfer_buffer_size = size;
        self
    }

    pub fn with_param_buffer_size(mut self, size: usize) -> Self {
        self.param_buffer_size = size;
        self
    }

    /// Sets the capacity for the client's result JSON. A client declaring
    /// a longer document has its session aborted.
    pub fn with_result_buffer_size(mut self, size: usize) -> Self {
        self.result_buffer_size = size;
        self
    }

    /// Bounds the transfer phase. A client that has not sent TEST_END by
    /// then has its session aborted.
    pub fn with_test_deadline(mut self, deadline: Duration) -> Self {
        self.test_deadline = Some(deadline);
        self
    }

    pub fn with_verify_cookie(mut self, verify: bool) -> Self {
        self.verify_cookie = verify;
        self
    }

    /// Bytes moved per transfer-loop iteration.
    pub fn chunk_size(&self) -> usize {
        self.transfer_buffer_size / 2
    }

    /// Address the control listener and the UDP data socket bind to.
    pub fn listen_addr(&self) -> SocketAddr {
        let ip = self
            .bind_addr
            .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        SocketAddr::new(ip, self.port)
    }

    /// Checks the configuration before the server binds anything.
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size() == 0 {
            return Err(Error::Config(format!(
                "transfer buffer of {} bytes leaves no room for a chunk",
                self.transfer_buffer_size
            )));
        }
        if self.param_buffer_size == 0 {
            return Err(Error::Config("parameter buffer must not be empty".to_string()));
        }
        if self.result_buffer_size == 0 {
            return Err(Error::Config("result buffer must not be empty".to_string()));
        }
        if self.interval.is_zero() {
            return Err(Error::Config("report interval must be positive".to_string()));
        }
        Ok(())
    }
}
