//! Bidirectional byte pump for one tunneled connection
//!
//! A session runs two copy tasks, client to remote ("to origin") and remote to client
//! ("from origin"), sharing one [`CloseLatch`]. Whichever task finishes first trips the
//! latch and the other stops at its next await point, so neither socket outlives the
//! session. A clean end of stream is passed on as a write shutdown before the latch
//! trips, which lets the peer see EOF rather than a reset. That shutdown gives up as
//! soon as the latch trips or after [`SHUTDOWN_GRACE`].

use std::fmt;
use std::io;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};

const COPY_BUFFER_SIZE: usize = 16 * 1024;

/// Upper bound on passing a clean end of stream on to the destination.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Remote endpoint to TLS client
    FromOrigin,
    /// TLS client to remote endpoint
    ToOrigin,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::FromOrigin => f.write_str("from origin"),
            Direction::ToOrigin => f.write_str("to origin"),
        }
    }
}

/// One-shot close signal shared by both directions of a session.
///
/// Closing is idempotent and visible to every clone.
#[derive(Debug, Clone, Default)]
pub struct CloseLatch {
    token: CancellationToken,
}

impl CloseLatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn close(&self) {
        self.token.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once [`close`](Self::close) has been called on any clone.
    pub async fn closed(&self) {
        self.token.cancelled().await;
    }
}

/// Outcome of one copy direction.
#[derive(Debug)]
pub struct PumpReport {
    pub direction: Direction,
    /// Bytes accepted by the destination's writes
    pub bytes: u64,
    /// `None` when the source reached a clean end of stream
    pub error: Option<io::Error>,
}

impl PumpReport {
    /// True when this direction was stopped by the other one finishing first.
    pub fn was_aborted(&self) -> bool {
        matches!(&self.error, Some(e) if e.kind() == io::ErrorKind::ConnectionAborted)
    }
}

#[derive(Debug)]
pub struct SessionReport {
    pub connection_id: u64,
    pub to_origin: PumpReport,
    pub from_origin: PumpReport,
}

/// A client stream paired with its remote stream.
pub struct ConnectionSession<C, R> {
    connection_id: u64,
    client: C,
    remote: R,
}

impl<C, R> ConnectionSession<C, R>
where
    C: AsyncRead + AsyncWrite + Send + 'static,
    R: AsyncRead + AsyncWrite + Send + 'static,
{
    pub fn new(connection_id: u64, client: C, remote: R) -> Self {
        Self {
            connection_id,
            client,
            remote,
        }
    }

    /// Pump bytes both ways until either direction ends. Both streams are dropped by
    /// the time this returns.
    pub async fn run(self) -> SessionReport {
        let connection_id = self.connection_id;
        let latch = CloseLatch::new();

        let (client_read, client_write) = tokio::io::split(self.client);
        let (remote_read, remote_write) = tokio::io::split(self.remote);

        let from_origin = tokio::spawn(
            pump(
                connection_id,
                Direction::FromOrigin,
                remote_read,
                client_write,
                latch.clone(),
            )
            .in_current_span(),
        );
        let to_origin = tokio::spawn(
            pump(
                connection_id,
                Direction::ToOrigin,
                client_read,
                remote_write,
                latch.clone(),
            )
            .in_current_span(),
        );

        let (from_origin, to_origin) = tokio::join!(from_origin, to_origin);

        SessionReport {
            connection_id,
            to_origin: to_origin.unwrap_or_else(|e| PumpReport::panicked(Direction::ToOrigin, e)),
            from_origin: from_origin
                .unwrap_or_else(|e| PumpReport::panicked(Direction::FromOrigin, e)),
        }
    }
}

impl PumpReport {
    fn panicked(direction: Direction, e: tokio::task::JoinError) -> Self {
        Self {
            direction,
            bytes: 0,
            error: Some(io::Error::other(e.to_string())),
        }
    }
}

async fn pump<Rd, Wr>(
    connection_id: u64,
    direction: Direction,
    mut reader: Rd,
    mut writer: Wr,
    latch: CloseLatch,
) -> PumpReport
where
    Rd: AsyncRead + Unpin,
    Wr: AsyncWrite + Unpin,
{
    let mut bytes = 0u64;

    let result = tokio::select! {
        result = copy_counted(&mut reader, &mut writer, &mut bytes) => result,
        _ = latch.closed() => Err(io::Error::new(
            io::ErrorKind::ConnectionAborted,
            "opposite direction closed the session",
        )),
    };

    if result.is_ok() {
        // A peer that stopped reading can hold the shutdown forever
        tokio::select! {
            shutdown = writer.shutdown() => {
                if let Err(e) = shutdown {
                    debug!("#{}: shutdown {} failed: {}", connection_id, direction, e);
                }
            }
            _ = latch.closed() => {
                debug!("#{}: shutdown {} abandoned, session closing", connection_id, direction);
            }
            _ = tokio::time::sleep(SHUTDOWN_GRACE) => {
                debug!(
                    "#{}: shutdown {} timed out after {:?}",
                    connection_id, direction, SHUTDOWN_GRACE
                );
            }
        }
    }
    latch.close();

    info!("#{}: copied {} bytes {}", connection_id, bytes, direction);
    match &result {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::ConnectionAborted => {
            debug!("#{}: stopped copying {}: {}", connection_id, direction, e);
        }
        Err(e) => {
            warn!("#{}: error copying {}: {}", connection_id, direction, e);
        }
    }

    PumpReport {
        direction,
        bytes,
        error: result.err(),
    }
}

/// Like `tokio::io::copy`, but flushes every chunk. `bytes` counts what each write
/// accepted, so it stays accurate when a write fails or the copy is cancelled part way.
async fn copy_counted<Rd, Wr>(reader: &mut Rd, writer: &mut Wr, bytes: &mut u64) -> io::Result<()>
where
    Rd: AsyncRead + Unpin,
    Wr: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; COPY_BUFFER_SIZE];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }

        let mut pending = &buf[..n];
        while !pending.is_empty() {
            let written = writer.write(pending).await?;
            if written == 0 {
                return Err(io::ErrorKind::WriteZero.into());
            }
            *bytes += written as u64;
            pending = &pending[written..];
        }
        writer.flush().await?;
    }
}
