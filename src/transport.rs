//! Data-channel transports.
//!
//! The session talks to the data channel only through [`DataChannel`] and
//! obtains it through a [`DataListener`]. [`DataLink`] is the production
//! channel: a TCP stream or a UDP socket paired with the client address
//! learned from its first datagram. [`SocketDataListener`] opens either one
//! on the server's port.

use crate::config::Protocol;
use crate::protocol::{read_cookie, Cookie, UDP_HANDSHAKE_REPLY};
use crate::{Error, Result};
use log::{debug, info, warn};
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream, UdpSocket};

/// One side of the bulk-transfer link.
pub trait DataChannel: Send {
    /// Sends one chunk and returns how many bytes the transport accepted.
    fn send_chunk(&mut self, chunk: &[u8]) -> impl Future<Output = io::Result<usize>> + Send;

    /// Receives data that is already pending, without waiting.
    ///
    /// Returns `Ok(None)` when nothing is pending, including after the peer
    /// closed its sending side. Only socket failures are errors.
    fn try_receive(&mut self, buf: &mut [u8]) -> io::Result<Option<usize>>;

    /// Resolves once data may be pending.
    fn readable(&self) -> impl Future<Output = io::Result<()>> + Send;

    fn close(&mut self) -> impl Future<Output = io::Result<()>> + Send;
}

/// A freshly opened data channel.
#[derive(Debug)]
pub struct OpenedChannel<C> {
    pub channel: C,
    pub peer: SocketAddr,
    /// Cookie sent on the data channel; UDP clients send none
    pub cookie: Option<Cookie>,
}

/// Opens the data channel once the client has been told to create streams.
pub trait DataListener {
    type Channel: DataChannel;

    fn open(
        &mut self,
        transport: Protocol,
    ) -> impl Future<Output = Result<OpenedChannel<Self::Channel>>> + Send;
}

/// Production data channel.
#[derive(Debug)]
pub enum DataLink {
    /// `drained` is set once the client has half-closed the stream; the
    /// link then stays idle until the session ends it.
    Stream { stream: TcpStream, drained: bool },
    Datagram { socket: UdpSocket, peer: SocketAddr },
}

impl DataLink {
    pub fn stream(stream: TcpStream) -> Self {
        DataLink::Stream {
            stream,
            drained: false,
        }
    }
}

impl DataChannel for DataLink {
    async fn send_chunk(&mut self, chunk: &[u8]) -> io::Result<usize> {
        match self {
            DataLink::Stream { stream, .. } => stream.write(chunk).await,
            DataLink::Datagram { socket, peer } => socket.send_to(chunk, *peer).await,
        }
    }

    fn try_receive(&mut self, buf: &mut [u8]) -> io::Result<Option<usize>> {
        let received = match self {
            DataLink::Stream { drained: true, .. } => return Ok(None),
            DataLink::Stream { stream, drained } => match stream.try_read(buf) {
                Ok(0) if !buf.is_empty() => {
                    info!("Client closed the data stream, waiting for TEST_END");
                    *drained = true;
                    return Ok(None);
                }
                other => other,
            },
            DataLink::Datagram { socket, .. } => socket.try_recv_from(buf).map(|(n, _from)| n),
        };

        match received {
            Ok(n) => Ok(Some(n)),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn readable(&self) -> io::Result<()> {
        match self {
            DataLink::Stream { drained: true, .. } => std::future::pending().await,
            DataLink::Stream { stream, .. } => stream.readable().await,
            DataLink::Datagram { socket, .. } => socket.readable().await,
        }
    }

    async fn close(&mut self) -> io::Result<()> {
        match self {
            DataLink::Stream { stream, .. } => stream.shutdown().await,
            DataLink::Datagram { .. } => Ok(()),
        }
    }
}

/// Opens data channels on the server's sockets.
///
/// TCP data connections arrive on the control listener itself; UDP data is
/// bound to `udp_addr`, normally the same address and port number.
pub struct SocketDataListener<'a> {
    listener: &'a TcpListener,
    udp_addr: SocketAddr,
}

impl<'a> SocketDataListener<'a> {
    pub fn new(listener: &'a TcpListener, udp_addr: SocketAddr) -> Self {
        Self { listener, udp_addr }
    }

    async fn open_stream(&self) -> Result<OpenedChannel<DataLink>> {
        let (mut stream, peer) = self
            .listener
            .accept()
            .await
            .map_err(|e| Error::DataChannel(format!("accept failed: {}", e)))?;
        info!("Data connection established from {}", peer);

        let cookie = match read_cookie(&mut stream).await {
            Ok(cookie) => {
                debug!("Received data cookie: {}", cookie);
                Some(cookie)
            }
            Err(e) => {
                warn!("No data cookie from {}: {}", peer, e);
                None
            }
        };

        Ok(OpenedChannel {
            channel: DataLink::stream(stream),
            peer,
            cookie,
        })
    }

    async fn open_datagram(&self) -> Result<OpenedChannel<DataLink>> {
        let socket = UdpSocket::bind(self.udp_addr)
            .await
            .map_err(|e| Error::DataChannel(format!("bind {} failed: {}", self.udp_addr, e)))?;

        let mut hello = [0u8; 64];
        let (n, peer) = socket
            .recv_from(&mut hello)
            .await
            .map_err(|e| Error::DataChannel(format!("UDP handshake failed: {}", e)))?;
        info!("Received UDP handshake ({} bytes) from {}", n, peer);

        socket
            .send_to(&UDP_HANDSHAKE_REPLY, peer)
            .await
            .map_err(|e| Error::DataChannel(format!("UDP handshake reply failed: {}", e)))?;

        Ok(OpenedChannel {
            channel: DataLink::Datagram { socket, peer },
            peer,
            cookie: None,
        })
    }
}

impl DataListener for SocketDataListener<'_> {
    type Channel = DataLink;

    async fn open(&mut self, transport: Protocol) -> Result<OpenedChannel<DataLink>> {
        match transport {
            Protocol::Tcp => self.open_stream().await,
            Protocol::Udp => self.open_datagram().await,
        }
    }
}
