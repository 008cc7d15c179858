use crate::buffer_pool::BufferPool;
use crate::clock::MonotonicClock;
use crate::config::Config;
use crate::interval_reporter::IntervalReporter;
use crate::session::{Session, SessionReport};
use crate::transport::SocketDataListener;
use crate::Result;
use log::{error, info};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

/// iperf3-compatible test server.
///
/// The `Server` serves one client session at a time. While a session runs,
/// further control connections wait in the listen backlog. A session that
/// fails is logged and the server goes back to accepting.
///
/// TCP data connections are accepted on the control listener. UDP data is
/// received on a socket bound to the same address and port number.
///
/// # Examples
///
/// ```no_run
/// use edgeperf3::{Config, Server};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let server = Server::bind(Config::server(5201)).await?;
/// println!("Listening on {}", server.local_addr()?);
/// server.run().await?;
/// # Ok(())
/// # }
/// ```
pub struct Server {
    config: Config,
    listener: TcpListener,
    chunk_pool: Arc<BufferPool>,
    reporter: Option<IntervalReporter>,
}

impl Server {
    /// Validates `config` and binds the control listener.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Config`] for an invalid configuration and
    /// [`crate::Error::Io`] when the port cannot be bound.
    pub async fn bind(config: Config) -> Result<Self> {
        config.validate()?;

        let addr = config.listen_addr();
        let listener = TcpListener::bind(addr).await?;
        info!("edgeperf3 server listening on {}", listener.local_addr()?);

        // Sessions never overlap, so one pooled chunk is enough.
        let chunk_pool = Arc::new(BufferPool::new(config.chunk_size(), 1));

        Ok(Self {
            config,
            listener,
            chunk_pool,
            reporter: None,
        })
    }

    /// Sends every session's throughput reports to `reporter`.
    pub fn with_reporter(mut self, reporter: IntervalReporter) -> Self {
        self.reporter = Some(reporter);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accepts one control connection and runs its session to the end.
    pub async fn serve_one(&self) -> Result<SessionReport> {
        let (stream, peer) = self.listener.accept().await?;
        self.serve_connection(stream, peer).await
    }

    async fn serve_connection(&self, stream: TcpStream, peer: SocketAddr) -> Result<SessionReport> {
        info!("Accepted control connection from {}", peer);
        let udp_addr = self.local_addr()?;
        let data_listener = SocketDataListener::new(&self.listener, udp_addr);

        let mut session = Session::new(
            stream,
            data_listener,
            self.config.clone(),
            MonotonicClock::new(),
            self.chunk_pool.lease(),
        );
        if let Some(reporter) = &self.reporter {
            session = session.with_reporter(reporter.clone());
        }

        match session.run().await {
            Ok(report) => {
                info!(
                    "Session with {} complete: {} bytes in {:.2} s",
                    peer,
                    report.snapshot.total_bytes,
                    report.snapshot.elapsed_secs()
                );
                Ok(report)
            }
            Err(e) => {
                error!("Session with {} aborted in state {}: {}", peer, session.state(), e);
                Err(e)
            }
        }
    }

    /// Serves sessions until the process is stopped.
    pub async fn run(&self) -> Result<()> {
        self.run_until(CancellationToken::new()).await
    }

    /// Serves sessions until `shutdown` is cancelled.
    ///
    /// Cancellation is observed while waiting for a client; a running
    /// session is always finished first.
    pub async fn run_until(&self, shutdown: CancellationToken) -> Result<()> {
        loop {
            let accepted = tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = self.listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, peer)) => {
                    // Session failures are already logged.
                    if let Err(e) = self.serve_connection(stream, peer).await {
                        if !e.is_session_fatal() {
                            return Err(e);
                        }
                    }
                }
                Err(e) => error!("Error accepting connection: {}", e),
            }
        }

        info!("Server shutting down");
        if let Some(reporter) = &self.reporter {
            reporter.complete();
        }
        Ok(())
    }
}
