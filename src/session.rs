//! Control-channel state machine for one client session.
//!
//! A [`Session`] walks the states of [`SessionState`] strictly in order.
//! Every step either advances one state or ends the session with an
//! [`Error`]; there is no way back. The caller owns the retry loop.

use crate::buffer_pool::PooledBuffer;
use crate::clock::Clock;
use crate::config::{Config, Protocol};
use crate::interval_reporter::{IntervalReporter, SummaryReport};
use crate::protocol::{
    read_command, read_cookie, read_length, write_command, write_length_prefixed, Command, Cookie,
    TestParams,
};
use crate::results::{build_server_result, parse_client_result, ClientResults};
use crate::stats::{Stats, StatsSnapshot};
use crate::transfer::{run_transfer, Direction};
use crate::transport::{DataChannel, DataListener};
use crate::{Error, Result};
use log::{debug, info, warn};
use std::fmt;
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Position of a session in the control protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SessionState {
    Listen,
    CookieReceived,
    ParamsExchanged,
    StreamsCreated,
    TestRunning,
    TestEnded,
    ResultsExchanged,
    Done,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Listen => "LISTEN",
            SessionState::CookieReceived => "COOKIE_RECEIVED",
            SessionState::ParamsExchanged => "PARAMS_EXCHANGED",
            SessionState::StreamsCreated => "STREAMS_CREATED",
            SessionState::TestRunning => "TEST_RUNNING",
            SessionState::TestEnded => "TEST_ENDED",
            SessionState::ResultsExchanged => "RESULTS_EXCHANGED",
            SessionState::Done => "DONE",
        };
        f.write_str(name)
    }
}

/// What a completed session observed.
#[derive(Debug, Clone)]
pub struct SessionReport {
    pub cookie: Cookie,
    pub params: TestParams,
    /// Address the data channel was opened with
    pub data_peer: SocketAddr,
    pub snapshot: StatsSnapshot,
    pub summary: Option<SummaryReport>,
    pub client_results: Option<ClientResults>,
    /// Whether the client closed the session with IPERF_DONE
    pub acknowledged: bool,
}

/// One client session over a control stream.
///
/// The session owns its transfer chunk and result buffer for its whole
/// lifetime; nothing is shared with other sessions.
pub struct Session<S, L, C: Clock> {
    control: S,
    listener: L,
    config: Config,
    stats: Stats<C>,
    chunk: PooledBuffer,
    result_buffer: Vec<u8>,
    state: SessionState,
}

impl<S, L, C> Session<S, L, C>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
    L: DataListener + Send,
    C: Clock + Send,
{
    /// Creates a session in [`SessionState::Listen`].
    ///
    /// `chunk` is the transfer buffer; its length is the chunk size moved
    /// per transfer-loop iteration.
    pub fn new(control: S, listener: L, config: Config, clock: C, chunk: PooledBuffer) -> Self {
        let stats = Stats::new(config.interval, clock);
        let result_buffer = vec![0u8; config.result_buffer_size];

        Self {
            control,
            listener,
            config,
            stats,
            chunk,
            result_buffer,
            state: SessionState::Listen,
        }
    }

    /// Sends throughput reports to `reporter`.
    pub fn with_reporter(mut self, reporter: IntervalReporter) -> Self {
        self.stats = self.stats.with_reporter(reporter);
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    fn transition(&mut self, next: SessionState) {
        debug!("Session state {} -> {}", self.state, next);
        self.state = next;
    }

    async fn send(&mut self, command: Command) -> Result<()> {
        debug!("Sending {}", command);
        write_command(&mut self.control, command).await
    }

    /// Runs the session to completion.
    ///
    /// On error the session stays in the state it had reached, which
    /// [`Session::state`] reports.
    pub async fn run(&mut self) -> Result<SessionReport> {
        let cookie = read_cookie(&mut self.control).await?;
        info!("Session cookie: {}", cookie);
        self.transition(SessionState::CookieReceived);

        let params = self.exchange_params().await?;
        self.transition(SessionState::ParamsExchanged);

        let transport = params.transport();
        self.send(Command::CreateStreams).await?;
        let opened = self.listener.open(transport).await?;
        info!("Data channel ({:?}) open with {}", transport, opened.peer);
        self.check_data_cookie(&cookie, opened.cookie.as_ref())?;
        let data_peer = opened.peer;
        let mut channel = opened.channel;
        self.transition(SessionState::StreamsCreated);

        self.send(Command::TestStart).await?;
        self.send(Command::TestRunning).await?;
        self.stats.start();
        self.transition(SessionState::TestRunning);

        let direction = Direction::from_reverse(params.reverse);
        info!("Test running: {:?}, direction {:?}", transport, direction);
        let transferred = run_transfer(
            &mut self.control,
            &mut channel,
            &mut self.stats,
            direction,
            &mut self.chunk,
            self.config.test_deadline,
        )
        .await;

        let summary = self.stats.stop();
        self.transition(SessionState::TestEnded);
        if let Err(e) = transferred {
            close_channel(&mut channel).await;
            return Err(e);
        }

        let snapshot = self.stats.snapshot();
        let client_results = self.exchange_results(&snapshot, transport).await?;
        self.transition(SessionState::ResultsExchanged);

        self.send(Command::DisplayResults).await?;
        let acknowledged = self.await_done().await;
        self.transition(SessionState::Done);

        close_channel(&mut channel).await;
        if let Err(e) = self.control.shutdown().await {
            debug!("Control channel shutdown failed: {}", e);
        }

        Ok(SessionReport {
            cookie,
            params,
            data_peer,
            snapshot,
            summary,
            client_results,
            acknowledged,
        })
    }

    async fn exchange_params(&mut self) -> Result<TestParams> {
        self.send(Command::ParamExchange).await?;

        let declared = read_length(&mut self.control).await?;
        debug!("Parameter length: {} bytes", declared);
        if declared as usize > self.config.param_buffer_size {
            return Err(Error::ParamsTooLarge {
                declared,
                capacity: self.config.param_buffer_size,
            });
        }

        let mut body = vec![0u8; declared as usize];
        self.control.read_exact(&mut body).await?;
        debug!("Parameters: {}", String::from_utf8_lossy(&body));

        let params = match TestParams::parse(&body) {
            Ok(params) => params,
            Err(e) => {
                warn!("Unparseable test parameters, using defaults: {}", e);
                TestParams::default()
            }
        };

        info!(
            "Test parameters: reverse={}, udp={}, time={:?}, len={:?}, client_version={:?}",
            params.reverse, params.udp, params.time, params.len, params.client_version
        );
        if let Some(parallel) = params.parallel.filter(|&n| n > 1) {
            warn!("Client requested {} parallel streams; serving one", parallel);
        }

        Ok(params)
    }

    fn check_data_cookie(&self, control: &Cookie, data: Option<&Cookie>) -> Result<()> {
        match data {
            Some(data) if data != control => {
                if self.config.verify_cookie {
                    return Err(Error::Protocol(format!(
                        "data channel cookie {} does not match session cookie {}",
                        data, control
                    )));
                }
                warn!("Data channel cookie {} does not match session cookie {}", data, control);
            }
            _ => {}
        }
        Ok(())
    }

    async fn exchange_results(
        &mut self,
        snapshot: &StatsSnapshot,
        transport: Protocol,
    ) -> Result<Option<ClientResults>> {
        self.send(Command::ExchangeResults).await?;

        let declared = read_length(&mut self.control).await?;
        debug!("Client result length: {} bytes", declared);
        let capacity = self.result_buffer.len();
        if declared as usize > capacity {
            return Err(Error::ResultTooLarge { declared, capacity });
        }

        let body = &mut self.result_buffer[..declared as usize];
        self.control.read_exact(body).await?;
        let client_results = parse_client_result(body);
        if let Some(results) = &client_results {
            let client_bytes: u64 = results.streams.iter().filter_map(|s| s.bytes).sum();
            info!(
                "Client reported {} bytes, server counted {}",
                client_bytes, snapshot.total_bytes
            );
        }

        let document = build_server_result(snapshot, transport)?;
        debug!("Server results: {}", String::from_utf8_lossy(&document));
        write_length_prefixed(&mut self.control, &document).await?;

        Ok(client_results)
    }

    async fn await_done(&mut self) -> bool {
        match read_command(&mut self.control).await {
            Ok(byte) if byte == Command::IperfDone.as_byte() => {
                info!("Client acknowledged results");
                true
            }
            Ok(byte) => {
                match Command::try_from(byte) {
                    Ok(command) => warn!("Expected IPERF_DONE, got {}", command),
                    Err(unknown) => warn!("Expected IPERF_DONE, got unknown command byte {}", unknown),
                }
                false
            }
            Err(e) => {
                warn!("Control channel closed before IPERF_DONE: {}", e);
                false
            }
        }
    }
}

async fn close_channel<D: DataChannel>(channel: &mut D) {
    if let Err(e) = channel.close().await {
        debug!("Data channel close failed: {}", e);
    }
}
