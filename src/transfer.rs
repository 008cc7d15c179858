//! Bulk-transfer phase of a test.
//!
//! Every iteration first polls the control channel without blocking and
//! stops as soon as TEST_END is seen, before touching the data channel.
//! Then it moves at most one chunk in the session's [`Direction`] and gives
//! the stats engine one tick. The transport variant (stream or datagram) is
//! hidden behind [`DataChannel`], so each direction has a single step
//! function serving both transports.

use crate::clock::Clock;
use crate::protocol::{poll_command, Command};
use crate::stats::Stats;
use crate::transport::DataChannel;
use crate::{Error, Result};
use log::{debug, error, info, warn};
use std::io;
use std::time::Duration;
use tokio::io::AsyncRead;
use tokio::time::{timeout, Instant};

/// Byte written into every outgoing chunk.
pub const FILL_BYTE: u8 = 0xAA;

/// How long one iteration waits on a transport that is not ready before
/// returning to poll the control channel.
pub const TRANSPORT_WAIT: Duration = Duration::from_millis(1);

/// Iterations between explicit yields to the scheduler. Transports that
/// are always ready never suspend the loop on their own.
const YIELD_EVERY: u32 = 32;

/// Which way test data flows, from the server's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Normal test: the client sends, the server counts what arrives
    Receive,
    /// Reverse test: the server sends
    Send,
}

impl Direction {
    pub fn from_reverse(reverse: bool) -> Self {
        if reverse {
            Direction::Send
        } else {
            Direction::Receive
        }
    }
}

/// Runs the transfer loop until the client sends TEST_END.
///
/// `chunk` is the session's transfer buffer; its length is the chunk size.
/// The stats window must already be open and is left open; the caller
/// closes it however the loop ends.
///
/// # Errors
///
/// - [`Error::ClientTerminated`] when the client sends CLIENT_TERMINATE
/// - [`Error::Connection`] when the control channel fails or closes
/// - [`Error::DataChannel`] when the data channel fails
/// - [`Error::DeadlineExceeded`] when `deadline` passes first
pub async fn run_transfer<R, D, C>(
    control: &mut R,
    data: &mut D,
    stats: &mut Stats<C>,
    direction: Direction,
    chunk: &mut [u8],
    deadline: Option<Duration>,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    D: DataChannel,
    C: Clock,
{
    if direction == Direction::Send {
        chunk.fill(FILL_BYTE);
    }
    let started = Instant::now();
    let mut iterations = 0u32;

    while stats.is_running() {
        if let Some(byte) = poll_control(control).await? {
            match Command::try_from(byte) {
                Ok(Command::TestEnd) => {
                    info!("TEST_END received, stopping test");
                    return Ok(());
                }
                Ok(Command::ClientTerminate) => return Err(Error::ClientTerminated),
                Ok(command) => warn!("Ignoring {} during test", command),
                Err(unknown) => warn!("Ignoring unknown command byte {} during test", unknown),
            }
        }

        if let Some(limit) = deadline {
            if started.elapsed() >= limit {
                return Err(Error::DeadlineExceeded(limit));
            }
        }

        let step = match direction {
            Direction::Send => send_step(data, chunk, stats).await,
            Direction::Receive => receive_step(data, chunk, stats).await,
        };
        if let Err(e) = step {
            error!("Data channel error during test: {}", e);
            return Err(Error::DataChannel(e.to_string()));
        }

        stats.tick(false);

        iterations = iterations.wrapping_add(1);
        if iterations % YIELD_EVERY == 0 {
            tokio::task::yield_now().await;
        }
    }

    Ok(())
}

async fn poll_control<R: AsyncRead + Unpin>(control: &mut R) -> Result<Option<u8>> {
    poll_command(control)
        .await
        .map_err(|e| Error::Connection(format!("control channel failed during test: {}", e)))
}

/// Offers one chunk to the transport and accounts what it accepted.
async fn send_step<D: DataChannel, C: Clock>(
    data: &mut D,
    chunk: &[u8],
    stats: &mut Stats<C>,
) -> io::Result<()> {
    match timeout(TRANSPORT_WAIT, data.send_chunk(chunk)).await {
        Ok(sent) => stats.add_bytes(sent?),
        Err(_) => debug!("Data channel not writable, retrying next iteration"),
    }
    Ok(())
}

/// Takes whatever is pending, up to one chunk, and accounts it. An empty
/// channel waits briefly for data so an idle test does not spin.
async fn receive_step<D: DataChannel, C: Clock>(
    data: &mut D,
    chunk: &mut [u8],
    stats: &mut Stats<C>,
) -> io::Result<()> {
    match data.try_receive(chunk)? {
        Some(n) => stats.add_bytes(n),
        None => {
            if let Ok(ready) = timeout(TRANSPORT_WAIT, data.readable()).await {
                ready?;
            }
        }
    }
    Ok(())
}
